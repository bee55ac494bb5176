//! Mock SubnetInventory for unit testing
//!
//! Stores subnets in memory and can be told to fail, so reservation
//! collection can be tested without a running inventory endpoint.

use crate::error::InventoryError;
use crate::inventory_trait::SubnetInventory;
use crate::models::CloudSubnet;
use std::sync::{Arc, Mutex};

/// Mock SubnetInventory for testing
#[derive(Debug, Clone, Default)]
pub struct MockSubnetInventory {
    subnets: Arc<Mutex<Vec<CloudSubnet>>>,
    failure: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<u32>>,
}

impl MockSubnetInventory {
    /// Create an empty mock inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subnet (for test setup)
    pub fn add_subnet(&self, id: &str, cidr_block: &str) {
        self.subnets
            .lock()
            .unwrap()
            .push(CloudSubnet::new(id, cidr_block));
    }

    /// Make every following `list_subnets` call fail with an API error
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Number of `list_subnets` calls served so far
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl SubnetInventory for MockSubnetInventory {
    async fn list_subnets(&self) -> Result<Vec<CloudSubnet>, InventoryError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(InventoryError::Api(message));
        }
        Ok(self.subnets.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_lists_added_subnets() {
        let inventory = MockSubnetInventory::new();
        inventory.add_subnet("subnet-1", "10.1.0.0/24");

        let subnets = inventory.list_subnets().await.unwrap();
        assert_eq!(subnets, vec![CloudSubnet::new("subnet-1", "10.1.0.0/24")]);
        assert_eq!(inventory.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let inventory = MockSubnetInventory::new();
        inventory.fail_with("throttled");

        let err = inventory.list_subnets().await.unwrap_err();
        assert!(matches!(err, InventoryError::Api(msg) if msg == "throttled"));
    }
}
