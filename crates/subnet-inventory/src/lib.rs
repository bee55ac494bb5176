//! Cloud Subnet Inventory Client
//!
//! Lists the subnets currently provisioned in a tenant account/region. The
//! subnet allocator treats every returned CIDR block as a reservation so new
//! allocations never collide with networks that exist outside Kubernetes.
//!
//! # Example
//!
//! ```no_run
//! use subnet_inventory::{InventoryClient, SubnetInventory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InventoryClient::new(
//!     "http://inventory.infra:8080".to_string(),
//!     "your-api-token".to_string(),
//!     "123456789012".to_string(),
//!     "eu-central-1".to_string(),
//! )?;
//!
//! for subnet in client.list_subnets().await? {
//!     println!("{} {}", subnet.id, subnet.cidr_block);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod inventory_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::InventoryClient;
pub use error::InventoryError;
pub use inventory_trait::SubnetInventory;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSubnetInventory;
