//! Network allocation capability
//!
//! Clusters and node pools persist their allocation in different places
//! (status vs. annotation). `HasNetworkAllocation` hides that difference and
//! `AllocationTarget` dispatches over the concrete kinds with a plain `match`.

use crate::{NodePool, TenantCluster};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation holding a node pool's allocated subnet
pub const ANNOTATION_SUBNET_CIDR: &str = "infrastructure.tenantops.io/subnet-cidr";

/// Annotation requesting a non-default prefix length for the allocation
pub const ANNOTATION_SUBNET_MASK_BITS: &str = "infrastructure.tenantops.io/subnet-mask-bits";

/// Read/write access to the CIDR an object was allocated.
pub trait HasNetworkAllocation {
    /// Allocated CIDR string, `None` while unallocated (empty string counts as unset)
    fn allocated_cidr(&self) -> Option<&str>;

    /// Record the allocated CIDR on the object (in memory only)
    fn set_allocated_cidr(&mut self, cidr: String);

    /// Name of the referenced NetworkPool, if any
    fn network_pool_ref(&self) -> Option<&str>;

    /// Raw value of the mask bits override annotation, if any
    fn mask_bits_override(&self) -> Option<&str>;
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl HasNetworkAllocation for TenantCluster {
    fn allocated_cidr(&self) -> Option<&str> {
        non_empty(
            self.status
                .as_ref()
                .and_then(|s| s.network.as_ref())
                .map(|n| n.cidr.as_str()),
        )
    }

    fn set_allocated_cidr(&mut self, cidr: String) {
        let status = self.status.get_or_insert_with(Default::default);
        status.network.get_or_insert_with(Default::default).cidr = cidr;
    }

    fn network_pool_ref(&self) -> Option<&str> {
        non_empty(self.spec.network_pool_ref.as_deref())
    }

    fn mask_bits_override(&self) -> Option<&str> {
        non_empty(self.annotations().get(ANNOTATION_SUBNET_MASK_BITS).map(String::as_str))
    }
}

impl HasNetworkAllocation for NodePool {
    fn allocated_cidr(&self) -> Option<&str> {
        non_empty(self.annotations().get(ANNOTATION_SUBNET_CIDR).map(String::as_str))
    }

    fn set_allocated_cidr(&mut self, cidr: String) {
        self.annotations_mut()
            .insert(ANNOTATION_SUBNET_CIDR.to_string(), cidr);
    }

    fn network_pool_ref(&self) -> Option<&str> {
        non_empty(self.spec.network_pool_ref.as_deref())
    }

    fn mask_bits_override(&self) -> Option<&str> {
        non_empty(self.annotations().get(ANNOTATION_SUBNET_MASK_BITS).map(String::as_str))
    }
}

/// Kinds of objects that receive network allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    Cluster,
    NodePool,
}

impl TargetKind {
    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Cluster => "cluster",
            TargetKind::NodePool => "node_pool",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Cluster => write!(f, "TenantCluster"),
            TargetKind::NodePool => write!(f, "NodePool"),
        }
    }
}

/// Namespace/name pair of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource; objects without a namespace land in "default"
    pub fn of<K: kube::Resource>(resource: &K) -> Option<Self> {
        let name = resource.meta().name.clone()?;
        let namespace = resource
            .meta()
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Some(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifies the object an allocation is made for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub key: ObjectKey,
}

impl TargetRef {
    pub fn cluster(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Cluster,
            key: ObjectKey::new(namespace, name),
        }
    }

    pub fn node_pool(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::NodePool,
            key: ObjectKey::new(namespace, name),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// A concrete object that can hold a network allocation
#[derive(Debug, Clone)]
pub enum AllocationTarget {
    Cluster(TenantCluster),
    NodePool(NodePool),
}

impl AllocationTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            AllocationTarget::Cluster(_) => TargetKind::Cluster,
            AllocationTarget::NodePool(_) => TargetKind::NodePool,
        }
    }

    pub fn key(&self) -> Option<ObjectKey> {
        match self {
            AllocationTarget::Cluster(c) => ObjectKey::of(c),
            AllocationTarget::NodePool(np) => ObjectKey::of(np),
        }
    }

    /// Version the object was read at; stores reject writes carrying a stale one
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            AllocationTarget::Cluster(c) => c.metadata.resource_version.as_deref(),
            AllocationTarget::NodePool(np) => np.metadata.resource_version.as_deref(),
        }
    }

    fn inner(&self) -> &dyn HasNetworkAllocation {
        match self {
            AllocationTarget::Cluster(c) => c,
            AllocationTarget::NodePool(np) => np,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn HasNetworkAllocation {
        match self {
            AllocationTarget::Cluster(c) => c,
            AllocationTarget::NodePool(np) => np,
        }
    }
}

impl HasNetworkAllocation for AllocationTarget {
    fn allocated_cidr(&self) -> Option<&str> {
        self.inner().allocated_cidr()
    }

    fn set_allocated_cidr(&mut self, cidr: String) {
        self.inner_mut().set_allocated_cidr(cidr);
    }

    fn network_pool_ref(&self) -> Option<&str> {
        self.inner().network_pool_ref()
    }

    fn mask_bits_override(&self) -> Option<&str> {
        self.inner().mask_bits_override()
    }
}
