//! Allocation Checker
//!
//! Idempotency gate in front of the allocation. An object that already
//! carries a CIDR is terminal and must never be allocated again.

use crate::error::IpamError;
use crate::store::AllocationStore;
use crds::{HasNetworkAllocation, TargetRef};
use std::sync::Arc;
use tracing::debug;

/// Decides whether an object still needs an allocation
#[derive(Clone)]
pub struct AllocationChecker {
    store: Arc<dyn AllocationStore>,
}

impl std::fmt::Debug for AllocationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationChecker").finish_non_exhaustive()
    }
}

impl AllocationChecker {
    pub fn new(store: Arc<dyn AllocationStore>) -> Self {
        Self { store }
    }

    /// Returns `true` only when the object's allocation field is empty.
    ///
    /// Lookup failures (including a missing object) are errors, never "proceed".
    pub async fn check(&self, target: &TargetRef) -> Result<bool, IpamError> {
        let object = self.store.get_target(target).await?;
        match object.allocated_cidr() {
            Some(cidr) => {
                debug!("{} already allocated {}, skipping", target, cidr);
                Ok(false)
            }
            None => Ok(true),
        }
    }
}
