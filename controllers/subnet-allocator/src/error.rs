//! Controller-specific error types.
//!
//! Library errors (allocation, inventory, Kubernetes) are wrapped as they are;
//! the remaining variants cover startup and the watch loops.

use ipam::IpamError;
use kube::Error as KubeError;
use subnet_inventory::InventoryError;
use thiserror::Error;

/// Errors that can occur in the Subnet Allocator Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud subnet inventory error
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Allocation pass failed
    #[error("Allocation failed: {0}")]
    Allocation(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object cannot be reconciled (e.g. it has no name)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
