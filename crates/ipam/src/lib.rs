//! Subnet allocation for tenant clusters and node pools.
//!
//! One allocation pass, driven by [`Allocator::allocate`]:
//!
//! 1. acquire the installation-wide [`DistributedLock`]
//! 2. skip objects that already carry a CIDR ([`AllocationChecker`])
//! 3. resolve the network range (installation default or a referenced NetworkPool)
//! 4. gather reservations from clusters, node pools and the cloud inventory
//!    ([`ReservationCollector`])
//! 5. pick the lowest free block ([`cidr::free_subnet`])
//! 6. write it back to the object ([`AllocationPersister`])
//! 7. release the lock (advisory, failures are only logged)
//!
//! Nothing is cached between passes; every pass recomputes from the live
//! sources while holding the lock.

pub mod checker;
pub mod cidr;
pub mod collector;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod persister;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

#[cfg(test)]
mod test_utils;

pub use checker::AllocationChecker;
pub use collector::{Reservation, ReservationCollector, ReservationSource};
pub use error::{IpamError, StoreError};
pub use lock::{DistributedLock, LeaseLock, LockError, LockIdentity, LockToken};
pub use orchestrator::{AllocationOutcome, Allocator, AllocatorConfig};
pub use persister::AllocationPersister;
pub use store::{AllocationStore, KubeAllocationStore};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MemoryLock, MockAllocationStore};
