//! Error type for the fallible parts of the map API.

use std::collections::TryReserveError;
use thiserror::Error;

/// A unified error type for map operations that can fail.
///
/// Lookups, inserts, and removals are infallible by design; only checked
/// access ([`at`](crate::ChainedHashMap::at)) and fallible growth
/// ([`try_reserve`](crate::ChainedHashMap::try_reserve)) report errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    /// Checked access was attempted for a key the map does not contain.
    #[error("key not found")]
    KeyNotFound,

    /// The allocator refused to provide storage for the requested growth.
    /// The map is left exactly as it was before the call.
    #[error("allocation failed: {0}")]
    AllocationFailed(#[from] TryReserveError),

    /// The requested capacity needs more buckets than the index encoding
    /// supports.
    #[error("requested capacity of {0} buckets exceeds the supported maximum")]
    CapacityOverflow(u64),
}
