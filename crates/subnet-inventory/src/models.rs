//! Inventory API data models

use serde::{Deserialize, Serialize};

/// Paginated response wrapper from the inventory API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// A subnet provisioned in the cloud account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSubnet {
    /// Provider subnet ID (e.g. "subnet-0a1b2c3d")
    pub id: String,
    /// CIDR block in `a.b.c.d/n` notation
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Provider lifecycle state ("pending", "available")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl CloudSubnet {
    pub fn new(id: impl Into<String>, cidr_block: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cidr_block: cidr_block.into(),
            vpc_id: None,
            availability_zone: None,
            state: None,
        }
    }
}
