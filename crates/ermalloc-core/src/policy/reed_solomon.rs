//! Reed-Solomon error correction over GF(256).
//!
//! A codeword holds at most 255 bytes, so the data region is cut into blocks
//! of `255 - ecc` bytes and every block gets `ecc` parity bytes. The data
//! region stays a prefix of the buffer; parity follows it block by block:
//!
//! ```text
//! [block 0][block 1]..[block k-1][ecc 0][ecc 1]..[ecc k-1]
//! ```
//!
//! Each block corrects up to `ecc / 2` damaged bytes, counting the parity
//! bytes. A block the decoder cannot solve is left as found and reported
//! unrecoverable at its first data offset; an inner policy of the same chain
//! may still restore it.

use reed_solomon::{Decoder, Encoder};

use super::{PolicyCodec, PolicyKind};
use crate::error::PolicyError;
use crate::report::CorruptionReport;

/// Bytes in one GF(256) codeword.
const CODEWORD_LEN: usize = 255;

/// Reed-Solomon configuration: parity bytes per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReedSolomonPolicy {
    ecc: u8,
}

impl ReedSolomonPolicy {
    /// Smallest accepted parity length; corrects one byte per block.
    pub const MIN_ECC: u8 = 2;
    /// Largest accepted parity length.
    pub const MAX_ECC: u8 = 128;
    /// Parity length used when a caller does not specify one.
    pub const DEFAULT_ECC: u8 = 3;

    /// Build a configuration with `ecc` parity bytes per block.
    pub fn new(ecc: u32) -> Result<Self, PolicyError> {
        match u8::try_from(ecc) {
            Ok(n) if (Self::MIN_ECC..=Self::MAX_ECC).contains(&n) => Ok(Self { ecc: n }),
            _ => Err(PolicyError::InvalidEcc {
                requested: ecc,
                min: Self::MIN_ECC,
                max: Self::MAX_ECC,
            }),
        }
    }

    /// Parity bytes per block.
    #[must_use]
    pub const fn ecc(self) -> usize {
        self.ecc as usize
    }

    /// Maximum data bytes per block.
    #[must_use]
    pub const fn block_len(self) -> usize {
        CODEWORD_LEN - self.ecc()
    }

    fn blocks(self, data_len: usize) -> usize {
        data_len.div_ceil(self.block_len())
    }

    /// `(data start, data end, parity offset)` of every block in a buffer
    /// holding `data_len` data bytes.
    fn layout(self, data_len: usize) -> impl Iterator<Item = (usize, usize, usize)> {
        let block_len = self.block_len();
        let ecc = self.ecc();
        (0..self.blocks(data_len)).map(move |block| {
            let start = block * block_len;
            let end = (start + block_len).min(data_len);
            (start, end, data_len + block * ecc)
        })
    }

    fn codeword(self, buffer: &[u8], start: usize, end: usize, parity: usize) -> Codeword {
        let len = end - start;
        let mut word = [0u8; CODEWORD_LEN];
        word[..len].copy_from_slice(&buffer[start..end]);
        word[len..len + self.ecc()].copy_from_slice(&buffer[parity..parity + self.ecc()]);
        Codeword {
            bytes: word,
            len: len + self.ecc(),
        }
    }
}

impl Default for ReedSolomonPolicy {
    fn default() -> Self {
        Self {
            ecc: Self::DEFAULT_ECC,
        }
    }
}

struct Codeword {
    bytes: [u8; CODEWORD_LEN],
    len: usize,
}

impl Codeword {
    fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

impl PolicyCodec for ReedSolomonPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ReedSolomon
    }

    fn physical_size_for(&self, logical_size: usize) -> Option<usize> {
        self.blocks(logical_size)
            .checked_mul(self.ecc())?
            .checked_add(logical_size)
    }

    fn data_len(&self, physical_size: usize) -> usize {
        let full = physical_size / CODEWORD_LEN;
        let tail = physical_size % CODEWORD_LEN;
        full * self.block_len() + tail.saturating_sub(self.ecc())
    }

    fn encode(&self, buffer: &mut [u8]) {
        let data_len = self.data_len(buffer.len());
        let encoder = Encoder::new(self.ecc());
        for (start, end, parity) in self.layout(data_len) {
            let encoded = encoder.encode(&buffer[start..end]);
            buffer[parity..parity + self.ecc()].copy_from_slice(encoded.ecc());
        }
    }

    fn verify_and_correct(&self, buffer: &mut [u8]) -> CorruptionReport {
        let mut report = CorruptionReport::clean();
        let data_len = self.data_len(buffer.len());
        let decoder = Decoder::new(self.ecc());

        for (start, end, parity) in self.layout(data_len) {
            let mut word = self.codeword(buffer, start, end, parity);
            if !decoder.is_corrupted(word.as_slice()) {
                continue;
            }
            match decoder.correct_err_count(word.as_mut_slice(), None) {
                Ok((fixed, errors)) => {
                    buffer[start..end].copy_from_slice(fixed.data());
                    buffer[parity..parity + self.ecc()].copy_from_slice(fixed.ecc());
                    for _ in 0..errors.max(1) {
                        report.record_corrected();
                    }
                }
                Err(_) => report.record_unrecoverable(start),
            }
        }
        report
    }

    fn is_corrupted(&self, buffer: &[u8]) -> bool {
        let data_len = self.data_len(buffer.len());
        let decoder = Decoder::new(self.ecc());
        self.layout(data_len).any(|(start, end, parity)| {
            decoder.is_corrupted(self.codeword(buffer, start, end, parity).as_slice())
        })
    }
}
