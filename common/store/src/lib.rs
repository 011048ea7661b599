//! Durable ownership and checkpoint storage for partitioned stream
//! processors.
//!
//! Processor instances never talk to each other directly. They converge on a
//! partition assignment by reading and compare-and-set-writing ownership
//! records through the [`OwnershipStore`] contract. The store is the single
//! source of truth for who owns what; every committed write mints a fresh
//! eTag, and a write carrying a stale eTag must fail without mutating the
//! record.

pub mod error;
pub mod memory;
pub mod records;
pub mod store;
pub mod util;

pub use error::{Result, StoreError};
pub use memory::InMemoryOwnershipStore;
pub use records::{Checkpoint, PartitionOwnership};
pub use store::OwnershipStore;
