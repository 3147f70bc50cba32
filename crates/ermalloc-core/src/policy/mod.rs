//! Policy kinds and the capability set every policy implements.

mod nil;
mod redundancy;
mod reed_solomon;

pub use nil::NilPolicy;
pub use redundancy::RedundancyPolicy;
pub use reed_solomon::ReedSolomonPolicy;

use crate::error::PolicyError;
use crate::report::CorruptionReport;

/// Maximum number of policies attached to one allocation.
pub const MAX_POLICIES: usize = 3;

/// Discriminant of a policy, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// No transformation.
    Nil,
    /// N-modular redundancy with majority vote.
    Redundancy,
    /// Blockwise Reed-Solomon parity.
    ReedSolomon,
}

impl PolicyKind {
    /// Decode the C discriminant (`Nil = 0`, `Redundancy = 1`,
    /// `ReedSolomon = 2`).
    pub fn from_raw(raw: u32) -> Result<Self, PolicyError> {
        match raw {
            0 => Ok(Self::Nil),
            1 => Ok(Self::Redundancy),
            2 => Ok(Self::ReedSolomon),
            other => Err(PolicyError::UnknownKind(other)),
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Redundancy => "redundancy",
            Self::ReedSolomon => "reed-solomon",
        }
    }
}

/// Capabilities of one policy implementation.
///
/// All operations work on a *buffer*: the policy's data region followed by
/// its overhead. `buffer.len()` is always a value returned by
/// [`physical_size_for`](Self::physical_size_for).
pub trait PolicyCodec {
    /// Policy discriminant.
    fn kind(&self) -> PolicyKind;

    /// Buffer size needed for `logical_size` data bytes, or `None` on overflow.
    ///
    /// Monotonic in `logical_size` and never smaller than it.
    fn physical_size_for(&self, logical_size: usize) -> Option<usize>;

    /// Data region length of a buffer of `physical_size` bytes.
    fn data_len(&self, physical_size: usize) -> usize;

    /// Rewrite the overhead from the data region, which is taken as correct.
    fn encode(&self, buffer: &mut [u8]);

    /// Verify the buffer and repair what the policy can.
    ///
    /// After return the data region holds the best-known content.
    fn verify_and_correct(&self, buffer: &mut [u8]) -> CorruptionReport;

    /// Cheap check for any inconsistency, without repairing.
    fn is_corrupted(&self, buffer: &[u8]) -> bool;
}

/// A policy instance: kind plus its configuration.
///
/// Instances are immutable; protection changes build a new chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Identity layout.
    #[default]
    Nil,
    /// Majority-voted copies.
    Redundancy(RedundancyPolicy),
    /// Parity blocks decoded with Reed-Solomon.
    ReedSolomon(ReedSolomonPolicy),
}

impl Policy {
    /// Triple modular redundancy.
    #[must_use]
    pub const fn tmr() -> Self {
        Self::Redundancy(RedundancyPolicy::TRIPLE)
    }

    /// Redundancy with `copies` total copies.
    pub fn redundancy(copies: u32) -> Result<Self, PolicyError> {
        Ok(Self::Redundancy(RedundancyPolicy::new(copies)?))
    }

    /// Reed-Solomon with `ecc` parity bytes per block.
    pub fn reed_solomon(ecc: u32) -> Result<Self, PolicyError> {
        Ok(Self::ReedSolomon(ReedSolomonPolicy::new(ecc)?))
    }

    /// Policy discriminant.
    #[must_use]
    pub const fn kind(&self) -> PolicyKind {
        match self {
            Self::Nil => PolicyKind::Nil,
            Self::Redundancy(_) => PolicyKind::Redundancy,
            Self::ReedSolomon(_) => PolicyKind::ReedSolomon,
        }
    }

    /// Implementation for this variant.
    #[must_use]
    pub fn codec(&self) -> &dyn PolicyCodec {
        match self {
            Self::Nil => &NilPolicy,
            Self::Redundancy(policy) => policy,
            Self::ReedSolomon(policy) => policy,
        }
    }
}
