//! Kubernetes resource watchers.
//!
//! Both target kinds are driven by `kube_runtime::Controller` through one
//! generic `watch_resource()` helper. Deleting an object needs no action: its
//! subnet is freed once the collector stops seeing it.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{NodePool, ObjectKey, TargetKind, TargetRef, TenantCluster};
use futures::StreamExt;
use kube::api::ListParams;
use kube::{Api, Resource};
use kube_runtime::{controller::{Action, Config as ControllerConfig}, watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

fn target_of<K: Resource>(kind: TargetKind, obj: &K) -> Result<TargetRef, ControllerError> {
    ObjectKey::of(obj)
        .map(|key| TargetRef { kind, key })
        .ok_or_else(|| ControllerError::InvalidObject(format!("{kind} without a name")))
}

async fn watch_resource<K>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    kind: TargetKind,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
{
    info!("Starting {} watcher", kind);

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| async move {
        let target = target_of(kind, obj.as_ref())?;
        if obj.meta().deletion_timestamp.is_some() {
            debug!("{} is being deleted, nothing to release", target);
            ctx.forget(&target);
            return Ok(Action::await_change());
        }
        ctx.reconcile(target).await
    };

    let error_policy = move |obj: Arc<K>, err: &ControllerError, ctx: Arc<Reconciler>| {
        match target_of(kind, obj.as_ref()) {
            Ok(target) => ctx.error_action(&target, err),
            Err(_) => {
                error!("Reconciliation error for unnamed {}: {}", kind, err);
                Action::await_change()
            }
        }
    };

    // Debounce batches bursts of events for the same object; allocations are
    // serialized by the lock anyway, so concurrency stays small.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(2);

    // A missing CRD or RBAC rule fails here instead of leaving the watcher
    // retrying while the pod reports ready
    api.list(&ListParams::default().limit(1)).await?;
    let metrics = reconciler.metrics().clone();
    metrics.watcher_started(kind);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(move |res| async move {
            match res {
                Ok((obj_ref, _)) => debug!("Reconciled {} {}", kind, obj_ref.name),
                Err(e) => debug!("Controller error for {}: {}", kind, e),
            }
        })
        .await;

    metrics.watcher_stopped(kind);
    Ok(())
}

/// Watches TenantCluster and NodePool resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    cluster_api: Api<TenantCluster>,
    node_pool_api: Api<NodePool>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        cluster_api: Api<TenantCluster>,
        node_pool_api: Api<NodePool>,
    ) -> Self {
        Self {
            reconciler,
            cluster_api,
            node_pool_api,
        }
    }

    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.cluster_api.clone(),
            Arc::clone(&self.reconciler),
            TargetKind::Cluster,
        )
        .await
    }

    pub async fn watch_node_pools(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.node_pool_api.clone(),
            Arc::clone(&self.reconciler),
            TargetKind::NodePool,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::NodePoolSpec;

    #[test]
    fn test_target_of_defaults_namespace() {
        let pool = NodePool::new("workers", NodePoolSpec::default());
        let target = target_of(TargetKind::NodePool, &pool).unwrap();
        assert_eq!(target, TargetRef::node_pool("default", "workers"));
    }

    #[test]
    fn test_target_of_unnamed_object() {
        let mut pool = NodePool::new("workers", NodePoolSpec::default());
        pool.metadata.name = None;
        assert!(matches!(
            target_of(TargetKind::NodePool, &pool),
            Err(ControllerError::InvalidObject(_))
        ));
    }
}
