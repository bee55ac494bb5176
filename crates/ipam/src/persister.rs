//! Persister
//!
//! Writes a chosen subnet into the target object. The object is re-fetched
//! right before the write so the update carries its latest resourceVersion;
//! a conflict from the store is returned as is.

use crate::cidr::{self, ZoneLayout};
use crate::error::IpamError;
use crate::store::AllocationStore;
use chrono::Utc;
use crds::{AllocationTarget, HasNetworkAllocation, TargetRef, ZoneSubnet};
use ipnet::Ipv4Net;
use std::sync::Arc;
use tracing::info;

/// Records allocations on clusters and node pools
#[derive(Clone)]
pub struct AllocationPersister {
    store: Arc<dyn AllocationStore>,
}

impl std::fmt::Debug for AllocationPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationPersister").finish_non_exhaustive()
    }
}

impl From<ZoneLayout> for ZoneSubnet {
    fn from(layout: ZoneLayout) -> Self {
        ZoneSubnet {
            name: layout.zone,
            cidr: layout.network.to_string(),
            private: layout.private.to_string(),
            public: layout.public.to_string(),
        }
    }
}

impl AllocationPersister {
    pub fn new(store: Arc<dyn AllocationStore>) -> Self {
        Self { store }
    }

    /// Write `subnet` to the object named by `target`.
    ///
    /// Clusters additionally get their availability zone layout and allocation
    /// timestamp. Fails with [`IpamError::AlreadyAllocated`] instead of
    /// overwriting an existing CIDR.
    pub async fn persist(&self, subnet: Ipv4Net, target: &TargetRef) -> Result<(), IpamError> {
        let mut object = self.store.get_target(target).await?;
        if let Some(existing) = object.allocated_cidr() {
            return Err(IpamError::AlreadyAllocated {
                target: target.to_string(),
                cidr: existing.to_string(),
            });
        }

        object.set_allocated_cidr(subnet.to_string());
        if let AllocationTarget::Cluster(cluster) = &mut object {
            let zones: Vec<ZoneSubnet> =
                cidr::zone_layout(subnet, &cluster.spec.availability_zones)?
                    .into_iter()
                    .map(ZoneSubnet::from)
                    .collect();
            let status = cluster.status.get_or_insert_with(Default::default);
            status.network.get_or_insert_with(Default::default).zones = zones;
            status.last_allocated = Some(Utc::now());
        }

        self.store.update_target(&object).await?;
        info!("Persisted {} for {}", subnet, target);
        Ok(())
    }
}
