//! SubnetInventory trait for mocking
//!
//! The concrete `InventoryClient` implements this trait, and tests can use
//! `MockSubnetInventory` instead of a live inventory endpoint.

use crate::error::InventoryError;
use crate::models::CloudSubnet;

/// Source of the subnets currently provisioned in the target account/region.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SubnetInventory: Send + Sync {
    /// Lists every subnet, following pagination to the end
    async fn list_subnets(&self) -> Result<Vec<CloudSubnet>, InventoryError>;
}
