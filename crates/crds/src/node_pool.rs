//! NodePool CRD
//!
//! A group of worker machines belonging to a tenant cluster. The allocated
//! subnet lives in the `infrastructure.tenantops.io/subnet-cidr` annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.tenantops.io",
    version = "v1alpha1",
    kind = "NodePool",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Name of the TenantCluster (same namespace) this pool belongs to
    pub cluster_name: String,

    /// Name of a NetworkPool to allocate from. Falls back to the cluster's
    /// pool, then to the installation default range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_pool_ref: Option<String>,

    /// Availability zones machines are placed in
    #[serde(default)]
    pub availability_zones: Vec<String>,

    /// Instance type for workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Scaling bounds
    #[serde(default)]
    pub scaling: NodePoolScaling,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolScaling {
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: u32,
}
