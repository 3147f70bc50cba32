//! N-modular redundancy.
//!
//! The buffer holds `copies` equal segments: the data region followed by
//! `copies - 1` replicas. Verification votes byte-wise across segments:
//!
//! - every copy agrees: nothing to do;
//! - a strict majority agrees: dissenting copies are overwritten and one
//!   corrected position is counted;
//! - no majority: the position is unrecoverable, copies are left as found and
//!   the data region keeps its own byte.
//!
//! With three copies this is triple modular redundancy, `physical = 3 * n`.

use super::{PolicyCodec, PolicyKind};
use crate::error::PolicyError;
use crate::report::CorruptionReport;

/// Redundancy configuration: total number of copies, primary included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedundancyPolicy {
    copies: u8,
}

impl RedundancyPolicy {
    /// Smallest accepted copy count. Two copies detect but cannot correct.
    pub const MIN_COPIES: u8 = 2;
    /// Largest accepted copy count.
    pub const MAX_COPIES: u8 = 15;
    /// Copy count used when a caller does not specify one.
    pub const DEFAULT_COPIES: u8 = 3;
    /// Triple modular redundancy.
    pub const TRIPLE: Self = Self {
        copies: Self::DEFAULT_COPIES,
    };

    /// Build a configuration with `copies` total copies.
    pub fn new(copies: u32) -> Result<Self, PolicyError> {
        match u8::try_from(copies) {
            Ok(n) if (Self::MIN_COPIES..=Self::MAX_COPIES).contains(&n) => Ok(Self { copies: n }),
            _ => Err(PolicyError::InvalidCopies {
                requested: copies,
                min: Self::MIN_COPIES,
                max: Self::MAX_COPIES,
            }),
        }
    }

    /// Total number of copies.
    #[must_use]
    pub const fn copies(self) -> usize {
        self.copies as usize
    }

    fn segment_len(self, buffer_len: usize) -> usize {
        buffer_len / self.copies()
    }

    fn vote(self, buffer: &[u8], segment: usize, offset: usize) -> Vote {
        let copies = self.copies();
        let mut best = buffer[offset];
        let mut best_count = 0;
        for candidate in 0..copies {
            let value = buffer[candidate * segment + offset];
            let count = (0..copies)
                .filter(|&c| buffer[c * segment + offset] == value)
                .count();
            if count > best_count {
                best = value;
                best_count = count;
            }
        }

        if best_count == copies {
            Vote::Unanimous
        } else if best_count * 2 > copies {
            Vote::Majority(best)
        } else {
            Vote::Split
        }
    }
}

impl Default for RedundancyPolicy {
    fn default() -> Self {
        Self::TRIPLE
    }
}

enum Vote {
    Unanimous,
    Majority(u8),
    Split,
}

impl PolicyCodec for RedundancyPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Redundancy
    }

    fn physical_size_for(&self, logical_size: usize) -> Option<usize> {
        logical_size.checked_mul(self.copies())
    }

    fn data_len(&self, physical_size: usize) -> usize {
        self.segment_len(physical_size)
    }

    fn encode(&self, buffer: &mut [u8]) {
        let segment = self.segment_len(buffer.len());
        if segment == 0 {
            return;
        }
        let used = segment * self.copies();
        let (data, replicas) = buffer[..used].split_at_mut(segment);
        for replica in replicas.chunks_exact_mut(segment) {
            replica.copy_from_slice(data);
        }
    }

    fn verify_and_correct(&self, buffer: &mut [u8]) -> CorruptionReport {
        let mut report = CorruptionReport::clean();
        let segment = self.segment_len(buffer.len());
        if segment == 0 || !self.is_corrupted(buffer) {
            return report;
        }

        let copies = self.copies();
        for offset in 0..segment {
            match self.vote(buffer, segment, offset) {
                Vote::Unanimous => {}
                Vote::Majority(value) => {
                    for copy in 0..copies {
                        buffer[copy * segment + offset] = value;
                    }
                    report.record_corrected();
                }
                Vote::Split => report.record_unrecoverable(offset),
            }
        }
        report
    }

    fn is_corrupted(&self, buffer: &[u8]) -> bool {
        let segment = self.segment_len(buffer.len());
        if segment == 0 {
            return false;
        }
        let used = segment * self.copies();
        let (data, replicas) = buffer[..used].split_at(segment);
        replicas.chunks_exact(segment).any(|replica| replica != data)
    }
}
