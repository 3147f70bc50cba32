//! Policy configuration errors.

use thiserror::Error;

/// Errors raised while building policies or computing their layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Redundancy copy count outside the supported range.
    #[error("redundancy needs between {min} and {max} copies, got {requested}")]
    InvalidCopies { requested: u32, min: u8, max: u8 },
    /// Reed-Solomon parity length outside the supported range.
    #[error("reed-solomon needs between {min} and {max} parity bytes, got {requested}")]
    InvalidEcc { requested: u32, min: u8, max: u8 },
    /// More policies than a chain can hold.
    #[error("a policy chain holds at most {max} policies, got {requested}")]
    TooManyPolicies { requested: usize, max: usize },
    /// A policy discriminant that names no known policy.
    #[error("unknown policy kind {0}")]
    UnknownKind(u32),
    /// The physical size of a layout does not fit in `usize`.
    #[error("physical size for {logical} logical bytes overflows usize")]
    SizeOverflow { logical: usize },
}
