//! Allocation error types.
//!
//! Soft conditions (already allocated, lock held elsewhere, lock already
//! released) never surface here; the orchestrator resolves them into an
//! [`AllocationOutcome`](crate::AllocationOutcome). Everything in this module
//! is a hard failure for the reconciliation framework to retry.

use crate::lock::LockError;
use crds::ObjectKey;
use ipnet::Ipv4Net;
use subnet_inventory::InventoryError;
use thiserror::Error;

/// Errors from the object store backing clusters, node pools and network pools.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// Optimistic concurrency check failed; message is the API server's
    #[error("conflict updating {kind} {key}: {message}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        message: String,
    },

    /// Object has no name and cannot be addressed
    #[error("{0} object has no name")]
    Unnamed(&'static str),

    /// Any other Kubernetes API failure
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

/// Errors that can occur while allocating a subnet.
#[derive(Debug, Error)]
pub enum IpamError {
    /// The network range has no free block of the requested size
    #[error("no free /{mask} subnet left in {range}")]
    NoRoom { range: Ipv4Net, mask: u8 },

    /// A split asked for more subnets than the parent network can hold
    #[error("cannot split {network} into {count} subnets: insufficient address space")]
    InsufficientAddressSpace { network: Ipv4Net, count: usize },

    /// Requested prefix is shorter than the range's or longer than /32
    #[error("invalid prefix length /{mask} for range {range}")]
    InvalidPrefixLength { range: Ipv4Net, mask: u8 },

    /// A persisted CIDR string failed to parse
    #[error("malformed reservation {value:?} from {owner}: {reason}")]
    MalformedReservation {
        owner: String,
        value: String,
        reason: String,
    },

    /// A NetworkPool's cidrBlock failed to parse
    #[error("network pool {pool} has malformed cidrBlock {value:?}: {reason}")]
    MalformedNetworkPool {
        pool: ObjectKey,
        value: String,
        reason: String,
    },

    /// An allocation annotation carries an unusable value
    #[error("invalid annotation {annotation}={value:?} on {target}")]
    InvalidAnnotation {
        target: String,
        annotation: &'static str,
        value: String,
    },

    /// Write-once violation: the persister found a CIDR already set
    #[error("{target} already has CIDR {cidr}, refusing to overwrite")]
    AlreadyAllocated { target: String, cidr: String },

    /// Object store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Cloud subnet inventory failure
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Lock backend failure (not contention, which is a soft condition)
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// A reservation lookup task panicked or was cancelled
    #[error("reservation collection task failed: {0}")]
    Collection(String),
}
