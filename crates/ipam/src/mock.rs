//! In-memory store and lock for unit testing
//!
//! `MockAllocationStore` keeps clusters, node pools and network pools in
//! memory, assigns resourceVersions and rejects stale writes the way the API
//! server does. `MemoryLock` is a TTL lock whose state can be shared between
//! several "allocators" to exercise contention.

use crate::error::StoreError;
use crate::lock::{DistributedLock, LockError, LockToken};
use crate::store::AllocationStore;
use crds::{
    AllocationTarget, HasNetworkAllocation, NetworkPool, NetworkPoolSpec, NodePool, ObjectKey,
    TargetKind, TargetRef, TenantCluster,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Mock AllocationStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockAllocationStore {
    clusters: Arc<Mutex<BTreeMap<ObjectKey, TenantCluster>>>,
    node_pools: Arc<Mutex<BTreeMap<ObjectKey, NodePool>>>,
    network_pools: Arc<Mutex<BTreeMap<ObjectKey, NetworkPool>>>,
    // Last resourceVersion handed out
    version: Arc<AtomicU64>,
    writes: Arc<Mutex<Vec<TargetRef>>>,
    gets: Arc<AtomicUsize>,
    // Held for writing by a test to stall list_targets
    list_gate: Arc<RwLock<()>>,
}

fn key_of<K: kube::Resource>(resource: &K) -> ObjectKey {
    ObjectKey::of(resource).unwrap_or_else(|| ObjectKey::new("default", ""))
}

impl MockAllocationStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Add (or replace) a cluster, assigning a fresh resourceVersion
    pub fn insert_cluster(&self, mut cluster: TenantCluster) {
        cluster.metadata.resource_version = Some(self.next_version());
        self.clusters
            .lock()
            .unwrap()
            .insert(key_of(&cluster), cluster);
    }

    /// Add (or replace) a node pool, assigning a fresh resourceVersion
    pub fn insert_node_pool(&self, mut pool: NodePool) {
        pool.metadata.resource_version = Some(self.next_version());
        self.node_pools.lock().unwrap().insert(key_of(&pool), pool);
    }

    /// Add a NetworkPool with the given cidrBlock
    pub fn add_network_pool(&self, namespace: &str, name: &str, cidr_block: &str) {
        let mut pool = NetworkPool::new(
            name,
            NetworkPoolSpec {
                cidr_block: cidr_block.to_string(),
            },
        );
        pool.metadata.namespace = Some(namespace.to_string());
        pool.metadata.resource_version = Some(self.next_version());
        self.network_pools
            .lock()
            .unwrap()
            .insert(ObjectKey::new(namespace, name), pool);
    }

    /// Current copy of a cluster
    pub fn cluster(&self, namespace: &str, name: &str) -> Option<TenantCluster> {
        self.clusters
            .lock()
            .unwrap()
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Current copy of a node pool
    pub fn node_pool(&self, namespace: &str, name: &str) -> Option<NodePool> {
        self.node_pools
            .lock()
            .unwrap()
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Simulate a concurrent modification by another writer
    pub fn touch(&self, target: &TargetRef) {
        let version = self.next_version();
        match target.kind {
            TargetKind::Cluster => {
                if let Some(c) = self.clusters.lock().unwrap().get_mut(&target.key) {
                    c.metadata.resource_version = Some(version);
                }
            }
            TargetKind::NodePool => {
                if let Some(np) = self.node_pools.lock().unwrap().get_mut(&target.key) {
                    np.metadata.resource_version = Some(version);
                }
            }
        }
    }

    /// Every successful update_target call, in order
    pub fn writes(&self) -> Vec<TargetRef> {
        self.writes.lock().unwrap().clone()
    }

    /// Number of get_target calls served
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Gate read by every list_targets call; hold its write guard to stall listing
    pub fn list_gate(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.list_gate)
    }

    fn conflict(kind: &'static str, key: &ObjectKey, stored: Option<&str>) -> StoreError {
        StoreError::Conflict {
            kind,
            key: key.clone(),
            message: format!(
                "the object has been modified (current resourceVersion {})",
                stored.unwrap_or("<none>")
            ),
        }
    }
}

#[async_trait::async_trait]
impl AllocationStore for MockAllocationStore {
    async fn get_target(&self, target: &TargetRef) -> Result<AllocationTarget, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let key = &target.key;
        let found = match target.kind {
            TargetKind::Cluster => self
                .clusters
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .map(AllocationTarget::Cluster),
            TargetKind::NodePool => self
                .node_pools
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .map(AllocationTarget::NodePool),
        };
        found.ok_or_else(|| StoreError::NotFound {
            kind: match target.kind {
                TargetKind::Cluster => "TenantCluster",
                TargetKind::NodePool => "NodePool",
            },
            key: key.clone(),
        })
    }

    async fn list_targets(&self, kind: TargetKind) -> Result<Vec<AllocationTarget>, StoreError> {
        let _gate = self.list_gate.read().await;
        let targets: Vec<AllocationTarget> = match kind {
            TargetKind::Cluster => self
                .clusters
                .lock()
                .unwrap()
                .values()
                .cloned()
                .map(AllocationTarget::Cluster)
                .collect(),
            TargetKind::NodePool => self
                .node_pools
                .lock()
                .unwrap()
                .values()
                .cloned()
                .map(AllocationTarget::NodePool)
                .collect(),
        };
        Ok(targets)
    }

    async fn update_target(&self, target: &AllocationTarget) -> Result<(), StoreError> {
        let version = self.next_version();
        let key = target.key().ok_or(StoreError::Unnamed(match target.kind() {
            TargetKind::Cluster => "TenantCluster",
            TargetKind::NodePool => "NodePool",
        }))?;
        let expected = target.resource_version();

        match target {
            AllocationTarget::Cluster(cluster) => {
                let mut clusters = self.clusters.lock().unwrap();
                let stored = clusters.get_mut(&key).ok_or_else(|| StoreError::NotFound {
                    kind: "TenantCluster",
                    key: key.clone(),
                })?;
                if stored.metadata.resource_version.as_deref() != expected {
                    return Err(Self::conflict(
                        "TenantCluster",
                        &key,
                        stored.metadata.resource_version.as_deref(),
                    ));
                }
                stored.status = cluster.status.clone();
                stored.metadata.resource_version = Some(version);
            }
            AllocationTarget::NodePool(pool) => {
                let mut pools = self.node_pools.lock().unwrap();
                let stored = pools.get_mut(&key).ok_or_else(|| StoreError::NotFound {
                    kind: "NodePool",
                    key: key.clone(),
                })?;
                if stored.metadata.resource_version.as_deref() != expected {
                    return Err(Self::conflict(
                        "NodePool",
                        &key,
                        stored.metadata.resource_version.as_deref(),
                    ));
                }
                if let Some(cidr) = pool.allocated_cidr() {
                    stored.set_allocated_cidr(cidr.to_string());
                }
                stored.metadata.resource_version = Some(version);
            }
        }

        self.writes.lock().unwrap().push(TargetRef {
            kind: target.kind(),
            key,
        });
        Ok(())
    }

    async fn get_network_pool(&self, key: &ObjectKey) -> Result<NetworkPool, StoreError> {
        self.network_pools
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "NetworkPool",
                key: key.clone(),
            })
    }
}

#[derive(Debug, Clone)]
struct Holder {
    owner: String,
    generation: u64,
    expires: Instant,
}

/// In-memory TTL lock. Clones made with [`MemoryLock::for_owner`] share the
/// same token, so they contend with each other like separate replicas. Each
/// acquisition gets a new generation, which plays the role of the Lease's
/// resourceVersion in the returned [`LockToken`].
#[derive(Debug, Clone)]
pub struct MemoryLock {
    name: String,
    owner: String,
    ttl: Duration,
    holder: Arc<Mutex<Option<Holder>>>,
    generation: Arc<AtomicU64>,
    acquisitions: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl MemoryLock {
    /// Create a free lock owned (when acquired) by "allocator-0"
    pub fn new(name: &str, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            owner: "allocator-0".to_string(),
            ttl,
            holder: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            acquisitions: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle on the same token for a different owner
    pub fn for_owner(&self, owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..self.clone()
        }
    }

    /// True while an unexpired holder exists
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Owner of the unexpired token, if any
    pub fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap()
            .as_ref()
            .filter(|h| h.expires > Instant::now())
            .map(|h| h.owner.clone())
    }

    /// Let the current token run out immediately
    pub fn expire_now(&self) {
        if let Some(h) = self.holder.lock().unwrap().as_mut() {
            h.expires = Instant::now();
        }
    }

    /// Successful lock calls across all owners
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Successful unlock calls across all owners
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DistributedLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lock(&self) -> Result<LockToken, LockError> {
        let now = Instant::now();
        let mut holder = self.holder.lock().unwrap();
        if let Some(current) = holder.as_ref().filter(|h| h.expires > now) {
            return Err(LockError::AlreadyExists {
                name: self.name.clone(),
                holder: current.owner.clone(),
            });
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *holder = Some(Holder {
            owner: self.owner.clone(),
            generation,
            expires: now + self.ttl,
        });
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(LockToken::new(generation.to_string()))
    }

    async fn unlock(&self, token: LockToken) -> Result<(), LockError> {
        let mut holder = self.holder.lock().unwrap();
        let owned = holder.as_ref().is_some_and(|h| {
            h.generation.to_string() == token.version() && h.expires > Instant::now()
        });
        if !owned {
            return Err(LockError::NotFound {
                name: self.name.clone(),
            });
        }
        *holder = None;
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
