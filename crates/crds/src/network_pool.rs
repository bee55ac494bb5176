//! NetworkPool CRD
//!
//! An operator-defined address range clusters and node pools can allocate from
//! instead of the installation default.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.tenantops.io",
    version = "v1alpha1",
    kind = "NetworkPool",
    namespaced,
    printcolumn = r#"{"name":"CIDR","type":"string","jsonPath":".spec.cidrBlock"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPoolSpec {
    /// Address range in CIDR notation (e.g. "10.163.0.0/16")
    pub cidr_block: String,
}
