//! TenantCluster CRD
//!
//! A tenant Kubernetes cluster. Its network CIDR is allocated by the subnet
//! allocator and recorded in `status.network`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.tenantops.io",
    version = "v1alpha1",
    kind = "TenantCluster",
    namespaced,
    status = "TenantClusterStatus",
    printcolumn = r#"{"name":"CIDR","type":"string","jsonPath":".status.network.cidr"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterSpec {
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name of a NetworkPool in the same namespace to allocate from.
    /// The installation default range is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_pool_ref: Option<String>,

    /// Availability zones the cluster network is spread across
    #[serde(default)]
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterStatus {
    /// Allocated network (observed state)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ClusterNetworkStatus>,

    /// When the network was allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_allocated: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkStatus {
    /// Allocated CIDR in `a.b.c.d/n` notation. Empty means unallocated.
    #[serde(default)]
    pub cidr: String,

    /// Per availability zone layout carved out of `cidr`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ZoneSubnet>,
}

/// Subnets of one availability zone
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSubnet {
    /// Availability zone name (e.g. "eu-central-1a")
    pub name: String,
    /// Zone share of the cluster network
    pub cidr: String,
    /// Lower half of the zone share
    pub private: String,
    /// Upper half of the zone share
    pub public: String,
}
