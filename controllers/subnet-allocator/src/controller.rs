//! Main controller implementation.
//!
//! Wires the Kubernetes client, cloud inventory, lease lock and allocator
//! together, then runs the TenantCluster and NodePool watchers alongside the
//! probe server until one of them exits.

use crate::config::Config;
use crate::error::ControllerError;
use crate::probes::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{NodePool, TenantCluster};
use ipam::{Allocator, KubeAllocationStore, LeaseLock};
use kube::{Api, Client};
use std::sync::Arc;
use subnet_inventory::InventoryClient;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for subnet allocation.
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    node_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: Config, metrics: Metrics) -> Result<Self, ControllerError> {
        info!("Initializing Subnet Allocator Controller");

        let kube_client = Client::try_default().await?;

        let inventory = InventoryClient::new(
            config.inventory_url.clone(),
            config.inventory_token.clone(),
            config.inventory_account.clone(),
            config.inventory_region.clone(),
        )?;
        // Fail at startup rather than on the first allocation
        inventory.validate_token().await?;

        let lock = LeaseLock::new(
            kube_client.clone(),
            &config.lock_namespace,
            &config.lock_name,
            &config.lock_identity(),
            config.lock_ttl,
        );

        let allocator = Allocator::new(
            config.allocator_config(),
            Arc::new(KubeAllocationStore::new(kube_client.clone())),
            Arc::new(inventory),
            Arc::new(lock),
        );
        let reconciler = Arc::new(Reconciler::new(allocator, metrics.clone(), config.lock_ttl));

        let (cluster_api, node_pool_api): (Api<TenantCluster>, Api<NodePool>) =
            match config.watch_namespace.as_deref() {
                Some(ns) => (
                    Api::namespaced(kube_client.clone(), ns),
                    Api::namespaced(kube_client, ns),
                ),
                None => (Api::all(kube_client.clone()), Api::all(kube_client)),
            };

        let watcher = Arc::new(Watcher::new(reconciler, cluster_api, node_pool_api));

        let cluster_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_clusters().await })
        };
        let node_pool_watcher = tokio::spawn(async move { watcher.watch_node_pools().await });
        // Readiness is reported by the watchers themselves once they are running
        let probe_server = tokio::spawn(probes::serve(config.probe_addr, metrics));

        Ok(Self {
            cluster_watcher,
            node_pool_watcher,
            probe_server,
        })
    }

    /// Runs the controller until a watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Subnet Allocator Controller running");

        // All tasks should run forever
        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("TenantCluster watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("TenantCluster watcher error: {e}")))?;
            }
            result = &mut self.node_pool_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NodePool watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("NodePool watcher error: {e}")))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {e}")))??;
            }
        }

        Ok(())
    }
}
