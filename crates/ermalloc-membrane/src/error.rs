//! Allocation engine errors.
//!
//! Corruption findings are not errors; they travel as
//! [`CorruptionReport`](ermalloc_core::CorruptionReport) values.

use ermalloc_core::PolicyError;
use thiserror::Error;

/// Failure of an allocation engine entry point.
///
/// Every failing call leaves existing allocations and records untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The raw allocator could not reserve or resize the physical block.
    #[error("out of memory reserving {requested} bytes")]
    OutOfMemory { requested: usize },
    /// A size computation overflowed.
    #[error("allocation size overflows")]
    InvalidSize,
    /// A policy or chain was rejected.
    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),
    /// An unprotected block was adopted but its size cannot be determined.
    #[error("size of unprotected block {ptr:#x} is unknown")]
    UnknownSize { ptr: usize },
    /// The pointer has no allocation record.
    #[error("pointer {ptr:#x} is not a protected allocation")]
    NotProtected { ptr: usize },
    /// A read or write range leaves the logical region.
    #[error("range {offset}+{len} exceeds logical size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}
