//! Allocation Orchestrator
//!
//! Entry point called by the reconciler, once per target object. The whole
//! pass from the idempotency check to the write runs under the distributed
//! lock, so reservations are read after acquiring it and the chosen block is
//! persisted before anyone else can collect.
//!
//! Soft conditions come back as [`AllocationOutcome`]s; only hard failures are
//! returned as errors. The lock is released after every pass that acquired it,
//! whatever the result. Release is advisory: a failure is logged and the TTL
//! takes care of the rest.

use crate::checker::AllocationChecker;
use crate::cidr;
use crate::collector::ReservationCollector;
use crate::error::{IpamError, StoreError};
use crate::lock::{DistributedLock, LockError, LockToken};
use crate::persister::AllocationPersister;
use crate::store::AllocationStore;
use crds::{
    AllocationTarget, HasNetworkAllocation, NodePool, ObjectKey, TargetKind, TargetRef,
    ANNOTATION_SUBNET_MASK_BITS,
};
use ipnet::Ipv4Net;
use std::fmt;
use std::sync::Arc;
use subnet_inventory::SubnetInventory;
use tracing::{debug, info, warn};

/// Installation-wide allocation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Range used when an object references no NetworkPool
    pub default_range: Ipv4Net,
    /// Default prefix length for clusters
    pub cluster_mask_bits: u8,
    /// Default prefix length for node pools
    pub node_pool_mask_bits: u8,
}

impl AllocatorConfig {
    /// Default prefix length for objects of `kind`
    pub fn mask_bits(&self, kind: TargetKind) -> u8 {
        match kind {
            TargetKind::Cluster => self.cluster_mask_bits,
            TargetKind::NodePool => self.node_pool_mask_bits,
        }
    }
}

/// Successful results of an allocation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// A new subnet was chosen and persisted
    Allocated(Ipv4Net),
    /// The object already had a CIDR; nothing was written
    AlreadyAllocated,
    /// Another allocator holds the lock; try again on the next pass
    LockHeld,
}

impl AllocationOutcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationOutcome::Allocated(_) => "allocated",
            AllocationOutcome::AlreadyAllocated => "already_allocated",
            AllocationOutcome::LockHeld => "lock_held",
        }
    }
}

impl fmt::Display for AllocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationOutcome::Allocated(subnet) => write!(f, "allocated {subnet}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Allocates subnets to clusters and node pools
pub struct Allocator {
    config: AllocatorConfig,
    store: Arc<dyn AllocationStore>,
    lock: Arc<dyn DistributedLock>,
    checker: AllocationChecker,
    collector: ReservationCollector,
    persister: AllocationPersister,
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("lock", &self.lock.name())
            .finish_non_exhaustive()
    }
}

impl Allocator {
    pub fn new(
        config: AllocatorConfig,
        store: Arc<dyn AllocationStore>,
        inventory: Arc<dyn SubnetInventory>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self {
            config,
            checker: AllocationChecker::new(Arc::clone(&store)),
            collector: ReservationCollector::new(Arc::clone(&store), inventory, config.default_range),
            persister: AllocationPersister::new(Arc::clone(&store)),
            store,
            lock,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Run one allocation pass for `target`.
    pub async fn allocate(&self, target: &TargetRef) -> Result<AllocationOutcome, IpamError> {
        let token = match self.lock.lock().await {
            Ok(token) => {
                debug!("Acquired lock {} for {}", self.lock.name(), target);
                token
            }
            Err(LockError::AlreadyExists { holder, .. }) => {
                info!(
                    "Lock {} held by {}, skipping {} until next pass",
                    self.lock.name(),
                    holder,
                    target
                );
                return Ok(AllocationOutcome::LockHeld);
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.allocate_locked(target).await;
        self.release(token, target).await;

        match &result {
            Ok(AllocationOutcome::Allocated(subnet)) => info!("Allocated {} to {}", subnet, target),
            Ok(outcome) => debug!("{}: {}", target, outcome),
            Err(e) => warn!("Allocation for {} failed: {}", target, e),
        }
        result
    }

    async fn allocate_locked(&self, target: &TargetRef) -> Result<AllocationOutcome, IpamError> {
        if !self.checker.check(target).await? {
            return Ok(AllocationOutcome::AlreadyAllocated);
        }

        let object = self.store.get_target(target).await?;
        let range = self.resolve_range(&object, target).await?;
        let mask = self.mask_bits(&object, target)?;
        debug!("Allocating /{} for {} from {}", mask, target, range);

        let reserved = self.collector.collect(Some(range)).await?;
        let subnet = cidr::free_subnet(range, mask, &reserved)?;

        self.persister.persist(subnet, target).await?;
        Ok(AllocationOutcome::Allocated(subnet))
    }

    /// Release only what this pass acquired; a lease taken over in the
    /// meantime belongs to its new holder and is left alone.
    async fn release(&self, token: LockToken, target: &TargetRef) {
        match self.lock.unlock(token).await {
            Ok(()) => debug!("Released lock {} after {}", self.lock.name(), target),
            Err(LockError::NotFound { name }) => {
                warn!("Lock {} expired or was taken over before {} finished", name, target);
            }
            Err(e) => warn!(
                "Failed to release lock {}, it will expire after its TTL: {}",
                self.lock.name(),
                e
            ),
        }
    }

    /// Effective network range: the referenced NetworkPool, or the default.
    ///
    /// Node pools without a reference of their own inherit their cluster's.
    async fn resolve_range(
        &self,
        object: &AllocationTarget,
        target: &TargetRef,
    ) -> Result<Ipv4Net, IpamError> {
        let pool_name = match object {
            AllocationTarget::Cluster(cluster) => cluster.network_pool_ref().map(str::to_string),
            AllocationTarget::NodePool(pool) => match pool.network_pool_ref() {
                Some(name) => Some(name.to_string()),
                None => self.inherited_pool(pool, target).await?,
            },
        };

        let Some(pool_name) = pool_name else {
            return Ok(self.config.default_range);
        };

        let key = ObjectKey::new(target.key.namespace.clone(), pool_name);
        let pool = self.store.get_network_pool(&key).await?;
        let range = pool
            .spec
            .cidr_block
            .trim()
            .parse::<Ipv4Net>()
            .map_err(|e| IpamError::MalformedNetworkPool {
                pool: key.clone(),
                value: pool.spec.cidr_block.clone(),
                reason: e.to_string(),
            })?;
        debug!("{} uses network pool {} ({})", target, key, range);
        Ok(range.trunc())
    }

    async fn inherited_pool(
        &self,
        pool: &NodePool,
        target: &TargetRef,
    ) -> Result<Option<String>, IpamError> {
        let cluster_name = pool.spec.cluster_name.trim();
        if cluster_name.is_empty() {
            return Ok(None);
        }

        let cluster = TargetRef::cluster(target.key.namespace.clone(), cluster_name);
        match self.store.get_target(&cluster).await {
            Ok(object) => Ok(object.network_pool_ref().map(str::to_string)),
            Err(StoreError::NotFound { .. }) => {
                debug!("{} not found, {} uses the default range", cluster, target);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mask_bits(&self, object: &AllocationTarget, target: &TargetRef) -> Result<u8, IpamError> {
        let Some(raw) = object.mask_bits_override() else {
            return Ok(self.config.mask_bits(target.kind));
        };
        cidr::parse_mask_bits(raw).ok_or_else(|| IpamError::InvalidAnnotation {
            target: target.to_string(),
            annotation: ANNOTATION_SUBNET_MASK_BITS,
            value: raw.to_string(),
        })
    }
}
