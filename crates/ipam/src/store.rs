//! Object store seam.
//!
//! The allocator reads and writes clusters, node pools and network pools
//! through [`AllocationStore`]. [`KubeAllocationStore`] is the API server
//! implementation; tests use [`MockAllocationStore`](crate::MockAllocationStore).

use crate::error::StoreError;
use crds::{
    AllocationTarget, HasNetworkAllocation, NetworkPool, NodePool, ObjectKey, TargetKind,
    TargetRef, TenantCluster, ANNOTATION_SUBNET_CIDR,
};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "subnet-allocator";

/// Read/write access to the objects that hold network allocations.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait AllocationStore: Send + Sync {
    /// Fetch one cluster or node pool
    async fn get_target(&self, target: &TargetRef) -> Result<AllocationTarget, StoreError>;

    /// List every object of `kind` across all namespaces
    async fn list_targets(&self, kind: TargetKind) -> Result<Vec<AllocationTarget>, StoreError>;

    /// Write the object's allocation fields back, guarded by its resourceVersion
    async fn update_target(&self, target: &AllocationTarget) -> Result<(), StoreError>;

    /// Fetch a NetworkPool
    async fn get_network_pool(&self, key: &ObjectKey) -> Result<NetworkPool, StoreError>;
}

/// [`AllocationStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeAllocationStore {
    client: Client,
}

impl std::fmt::Debug for KubeAllocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeAllocationStore").finish_non_exhaustive()
    }
}

impl KubeAllocationStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn classify(err: kube::Error, kind: &'static str, key: &ObjectKey) -> StoreError {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                kind,
                key: key.clone(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                kind,
                key: key.clone(),
                message: resp.message.clone(),
            },
            other => StoreError::Kube(other),
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl AllocationStore for KubeAllocationStore {
    async fn get_target(&self, target: &TargetRef) -> Result<AllocationTarget, StoreError> {
        let key = &target.key;
        match target.kind {
            TargetKind::Cluster => {
                let api: Api<TenantCluster> = Api::namespaced(self.client.clone(), &key.namespace);
                api.get(&key.name)
                    .await
                    .map(AllocationTarget::Cluster)
                    .map_err(|e| Self::classify(e, "TenantCluster", key))
            }
            TargetKind::NodePool => {
                let api: Api<NodePool> = Api::namespaced(self.client.clone(), &key.namespace);
                api.get(&key.name)
                    .await
                    .map(AllocationTarget::NodePool)
                    .map_err(|e| Self::classify(e, "NodePool", key))
            }
        }
    }

    async fn list_targets(&self, kind: TargetKind) -> Result<Vec<AllocationTarget>, StoreError> {
        let lp = ListParams::default();
        let targets: Vec<AllocationTarget> = match kind {
            TargetKind::Cluster => {
                let api: Api<TenantCluster> = Api::all(self.client.clone());
                api.list(&lp)
                    .await?
                    .items
                    .into_iter()
                    .map(AllocationTarget::Cluster)
                    .collect()
            }
            TargetKind::NodePool => {
                let api: Api<NodePool> = Api::all(self.client.clone());
                api.list(&lp)
                    .await?
                    .items
                    .into_iter()
                    .map(AllocationTarget::NodePool)
                    .collect()
            }
        };
        debug!("Listed {} {} objects", targets.len(), kind);
        Ok(targets)
    }

    async fn update_target(&self, target: &AllocationTarget) -> Result<(), StoreError> {
        let key = target.key().ok_or(StoreError::Unnamed(match target.kind() {
            TargetKind::Cluster => "TenantCluster",
            TargetKind::NodePool => "NodePool",
        }))?;
        let pp = Self::patch_params();
        let resource_version = target.resource_version();

        // resourceVersion in a merge patch makes the API server reject stale writes with 409
        match target {
            AllocationTarget::Cluster(cluster) => {
                let patch = json!({
                    "metadata": { "resourceVersion": resource_version },
                    "status": cluster.status,
                });
                let api: Api<TenantCluster> = Api::namespaced(self.client.clone(), &key.namespace);
                api.patch_status(&key.name, &pp, &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Self::classify(e, "TenantCluster", &key))?;
            }
            AllocationTarget::NodePool(pool) => {
                let annotations = BTreeMap::from([(ANNOTATION_SUBNET_CIDR, pool.allocated_cidr())]);
                let patch = json!({
                    "metadata": {
                        "resourceVersion": resource_version,
                        "annotations": annotations,
                    },
                });
                let api: Api<NodePool> = Api::namespaced(self.client.clone(), &key.namespace);
                api.patch(&key.name, &pp, &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Self::classify(e, "NodePool", &key))?;
            }
        }

        debug!("Updated {} {}", target.kind(), key);
        Ok(())
    }

    async fn get_network_pool(&self, key: &ObjectKey) -> Result<NetworkPool, StoreError> {
        let api: Api<NetworkPool> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| Self::classify(e, "NetworkPool", key))
    }
}
