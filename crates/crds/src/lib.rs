//! Tenant IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the subnet allocator:
//! tenant clusters and node pools receive network allocations, network pools
//! define alternate address ranges they can opt into.

pub mod allocation;
pub mod cluster;
pub mod network_pool;
pub mod node_pool;

pub use allocation::*;
pub use cluster::*;
pub use network_pool::*;
pub use node_pool::*;

/// API group shared by every CRD in this crate
pub const API_GROUP: &str = "infrastructure.tenantops.io";
