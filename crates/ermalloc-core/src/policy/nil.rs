//! Identity policy.

use super::{PolicyCodec, PolicyKind};
use crate::report::CorruptionReport;

/// Physical layout equals logical layout; verification never finds anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NilPolicy;

impl PolicyCodec for NilPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Nil
    }

    fn physical_size_for(&self, logical_size: usize) -> Option<usize> {
        Some(logical_size)
    }

    fn data_len(&self, physical_size: usize) -> usize {
        physical_size
    }

    fn encode(&self, _buffer: &mut [u8]) {}

    fn verify_and_correct(&self, _buffer: &mut [u8]) -> CorruptionReport {
        CorruptionReport::clean()
    }

    fn is_corrupted(&self, _buffer: &[u8]) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_identity() {
        let mut buffer = [1_u8, 2, 3];
        assert_eq!(NilPolicy.physical_size_for(3), Some(3));
        assert_eq!(NilPolicy.data_len(3), 3);
        NilPolicy.encode(&mut buffer);
        assert_eq!(buffer, [1, 2, 3]);
        assert!(NilPolicy.verify_and_correct(&mut buffer).is_clean());
        assert!(!NilPolicy.is_corrupted(&buffer));
    }
}
