//! Reconciliation logic for TenantCluster and NodePool resources.
//!
//! Every reconciliation runs one allocation pass and turns the outcome into a
//! requeue decision:
//!
//! - allocated or already allocated: wait for the next change
//! - lock held by another allocator: retry once the lock TTL has passed
//! - error: Fibonacci backoff per object, dropped on the next success or on deletion

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::probes::{Metrics, OUTCOME_ERROR};
use crds::TargetRef;
use ipam::{AllocationOutcome, Allocator};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reconciles allocation targets through the [`Allocator`].
#[derive(Debug)]
pub struct Reconciler {
    allocator: Allocator,
    metrics: Metrics,
    lock_ttl: Duration,
    /// Backoff per object (kind + namespace/name)
    backoff_states: Mutex<HashMap<TargetRef, FibonacciBackoff>>,
}

impl Reconciler {
    pub fn new(allocator: Allocator, metrics: Metrics, lock_ttl: Duration) -> Self {
        Self {
            allocator,
            metrics,
            lock_ttl,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Run one allocation pass for `target`.
    pub async fn reconcile(&self, target: TargetRef) -> Result<Action, ControllerError> {
        info!("Reconciling {}", target);

        match self.allocator.allocate(&target).await {
            Ok(outcome) => {
                self.metrics.record(target.kind, outcome.as_str());
                self.forget(&target);
                Ok(self.action_for(outcome))
            }
            Err(e) => {
                self.metrics.record(target.kind, OUTCOME_ERROR);
                Err(e.into())
            }
        }
    }

    /// Requeue decision for a successful pass
    pub fn action_for(&self, outcome: AllocationOutcome) -> Action {
        match outcome {
            AllocationOutcome::Allocated(_) | AllocationOutcome::AlreadyAllocated => {
                Action::await_change()
            }
            AllocationOutcome::LockHeld => Action::requeue(self.lock_ttl),
        }
    }

    /// Requeue decision after a failed pass; advances the object's backoff
    pub fn error_action(&self, target: &TargetRef, err: &ControllerError) -> Action {
        let delay = self.next_backoff(target);
        error!("Reconciliation of {} failed: {} (retry in {:?})", target, err, delay);
        Action::requeue(delay)
    }

    fn next_backoff(&self, target: &TargetRef) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states.entry(target.clone()).or_default().next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                FibonacciBackoff::default().next_backoff()
            }
        }
    }

    /// Drop the backoff of an object that reconciled cleanly or is being deleted
    pub fn forget(&self, target: &TargetRef) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(target);
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
