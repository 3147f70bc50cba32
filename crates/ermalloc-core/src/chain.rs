//! Ordered, fixed-capacity policy chains.
//!
//! Policies nest in attachment order. Index 0 is innermost and consumes the
//! logical payload; every following policy consumes the previous buffer.
//! Encoding walks inner to outer, verification walks outer to inner.

use crate::error::PolicyError;
use crate::policy::{MAX_POLICIES, Policy, PolicyKind};
use crate::report::CorruptionReport;

/// Up to [`MAX_POLICIES`] policies attached to one allocation.
///
/// An empty chain means "unprotected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyChain {
    policies: [Policy; MAX_POLICIES],
    len: u8,
}

/// Output of [`PolicyChain::migrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Buffer laid out under the new chain.
    pub physical: Vec<u8>,
    /// What the old chain found while recovering the content.
    pub recovery: CorruptionReport,
}

/// Buffer size at each nesting level; `sizes[0]` is the logical size and
/// `sizes[len]` the physical size.
type LayerSizes = [usize; MAX_POLICIES + 1];

impl PolicyChain {
    /// The unprotected chain.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            policies: [Policy::Nil; MAX_POLICIES],
            len: 0,
        }
    }

    /// Build a chain from policies in attachment order.
    pub fn new(policies: &[Policy]) -> Result<Self, PolicyError> {
        if policies.len() > MAX_POLICIES {
            return Err(PolicyError::TooManyPolicies {
                requested: policies.len(),
                max: MAX_POLICIES,
            });
        }
        let mut chain = Self::empty();
        chain.policies[..policies.len()].copy_from_slice(policies);
        chain.len = policies.len() as u8;
        Ok(chain)
    }

    /// A chain holding one policy.
    #[must_use]
    pub const fn single(policy: Policy) -> Self {
        let mut policies = [Policy::Nil; MAX_POLICIES];
        policies[0] = policy;
        Self { policies, len: 1 }
    }

    /// Append an outer policy, returning a new chain.
    pub fn with(self, policy: Policy) -> Result<Self, PolicyError> {
        let len = self.len();
        if len == MAX_POLICIES {
            return Err(PolicyError::TooManyPolicies {
                requested: len + 1,
                max: MAX_POLICIES,
            });
        }
        let mut chain = self;
        chain.policies[len] = policy;
        chain.len += 1;
        Ok(chain)
    }

    /// Number of attached policies.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// True for the unprotected chain.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Policies in attachment order.
    #[must_use]
    pub fn as_slice(&self) -> &[Policy] {
        &self.policies[..self.len()]
    }

    /// `(ordering index, policy)` pairs in attachment order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Policy)> {
        self.as_slice().iter().enumerate()
    }

    /// Physical size for `logical_size` bytes, or `None` on overflow.
    #[must_use]
    pub fn physical_size_for(&self, logical_size: usize) -> Option<usize> {
        self.as_slice()
            .iter()
            .try_fold(logical_size, |size, policy| {
                policy.codec().physical_size_for(size)
            })
    }

    /// Logical size stored in a buffer of `physical_size` bytes.
    #[must_use]
    pub fn logical_len(&self, physical_size: usize) -> usize {
        self.as_slice()
            .iter()
            .rev()
            .fold(physical_size, |size, policy| policy.codec().data_len(size))
    }

    fn layer_sizes(&self, physical_size: usize) -> LayerSizes {
        let mut sizes = [0usize; MAX_POLICIES + 1];
        let len = self.len();
        sizes[len] = physical_size;
        for level in (0..len).rev() {
            sizes[level] = self.policies[level].codec().data_len(sizes[level + 1]);
        }
        sizes
    }

    /// Lay out the whole buffer from the logical prefix.
    pub fn encode(&self, buffer: &mut [u8]) {
        let sizes = self.layer_sizes(buffer.len());
        for (level, policy) in self.iter() {
            policy.codec().encode(&mut buffer[..sizes[level + 1]]);
        }
    }

    /// Verify and repair the buffer, outermost policy first.
    ///
    /// A position an outer policy could not resolve falls through to the
    /// inner policies. When a non-nil inner policy then verifies its buffer
    /// without unresolved findings, the outer findings count as corrected.
    ///
    /// When an inner policy repairs bytes, the outer layers are re-encoded so
    /// the buffer is consistent again. Outer layers are left alone if anything
    /// stays unrecoverable, so the evidence stays in place.
    pub fn verify_and_correct(&self, buffer: &mut [u8]) -> CorruptionReport {
        let sizes = self.layer_sizes(buffer.len());
        let len = self.len();
        let mut report = CorruptionReport::clean();
        let mut repaired_level = None;

        for level in (0..len).rev() {
            let policy = &self.policies[level];
            let layer = policy
                .codec()
                .verify_and_correct(&mut buffer[..sizes[level + 1]]);
            let outer_failed = !report.is_recoverable();
            if outer_failed && layer.is_recoverable() && policy.kind() != PolicyKind::Nil {
                report.resolve();
                repaired_level = Some(level);
            }
            if layer.corrected() > 0 && level + 1 < len {
                repaired_level = Some(level);
            }
            report.merge(layer);
        }

        if let Some(level) = repaired_level
            && report.is_recoverable()
        {
            for outer in (level + 1)..len {
                self.policies[outer]
                    .codec()
                    .encode(&mut buffer[..sizes[outer + 1]]);
            }
        }
        report
    }

    /// True when any layer reports an inconsistency.
    #[must_use]
    pub fn is_corrupted(&self, buffer: &[u8]) -> bool {
        let sizes = self.layer_sizes(buffer.len());
        self.iter()
            .any(|(level, policy)| policy.codec().is_corrupted(&buffer[..sizes[level + 1]]))
    }

    /// Encode `logical` into a new physical buffer.
    pub fn encode_to_vec(&self, logical: &[u8]) -> Result<Vec<u8>, PolicyError> {
        let physical_size = self
            .physical_size_for(logical.len())
            .ok_or(PolicyError::SizeOverflow {
                logical: logical.len(),
            })?;
        let mut physical = vec![0u8; physical_size];
        physical[..logical.len()].copy_from_slice(logical);
        self.encode(&mut physical);
        Ok(physical)
    }

    /// Recover the logical bytes of `physical` without modifying it.
    #[must_use]
    pub fn decode(&self, physical: &[u8]) -> (Vec<u8>, CorruptionReport) {
        let mut scratch = physical.to_vec();
        let report = self.verify_and_correct(&mut scratch);
        scratch.truncate(self.logical_len(physical.len()));
        (scratch, report)
    }

    /// Re-lay `old_physical` under `new_chain` for `new_logical_size` bytes.
    ///
    /// The content is recovered under `old_chain` first (raw bytes when
    /// `None`). Recovery findings never abort the migration; whatever could be
    /// reconstructed is carried over and the findings are returned.
    pub fn migrate(
        old_physical: &[u8],
        old_chain: Option<&PolicyChain>,
        new_logical_size: usize,
        new_chain: &PolicyChain,
    ) -> Result<Migration, PolicyError> {
        let (logical, recovery) = match old_chain {
            Some(chain) => chain.decode(old_physical),
            None => (old_physical.to_vec(), CorruptionReport::clean()),
        };

        let physical_size =
            new_chain
                .physical_size_for(new_logical_size)
                .ok_or(PolicyError::SizeOverflow {
                    logical: new_logical_size,
                })?;
        let mut physical = vec![0u8; physical_size];
        let keep = logical.len().min(new_logical_size);
        physical[..keep].copy_from_slice(&logical[..keep]);
        new_chain.encode(&mut physical);
        Ok(Migration { physical, recovery })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmr_tmr() -> PolicyChain {
        PolicyChain::new(&[Policy::tmr(), Policy::tmr()]).unwrap()
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = PolicyChain::empty();
        assert!(chain.is_empty());
        assert_eq!(chain.physical_size_for(17), Some(17));
        assert_eq!(chain.encode_to_vec(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn sizes_compose_by_nesting() {
        let chain = PolicyChain::new(&[Policy::tmr(), Policy::Nil, Policy::redundancy(5).unwrap()])
            .unwrap();
        assert_eq!(chain.physical_size_for(4), Some(60));
        assert_eq!(chain.logical_len(60), 4);
    }

    #[test]
    fn chain_capacity_is_enforced() {
        let policies = [Policy::Nil; MAX_POLICIES + 1];
        assert!(matches!(
            PolicyChain::new(&policies),
            Err(PolicyError::TooManyPolicies { requested: 4, max: 3 })
        ));
        let full = PolicyChain::new(&[Policy::Nil; MAX_POLICIES]).unwrap();
        assert!(full.with(Policy::tmr()).is_err());
        let grown = PolicyChain::empty().with(Policy::tmr()).unwrap();
        assert_eq!(grown, PolicyChain::single(Policy::tmr()));
    }

    #[test]
    fn iter_reports_ordering_index() {
        let chain = PolicyChain::new(&[Policy::Nil, Policy::tmr()]).unwrap();
        let kinds: Vec<_> = chain.iter().map(|(i, p)| (i, p.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                (0, PolicyKind::Nil),
                (1, PolicyKind::Redundancy)
            ]
        );
    }

    #[test]
    fn nested_encode_replicates_inner_layout() {
        let physical = tmr_tmr().encode_to_vec(b"ab").unwrap();
        assert_eq!(physical.len(), 18);
        assert!(physical.chunks(2).all(|pair| pair == b"ab"));
    }

    #[test]
    fn nested_single_error_is_corrected_anywhere() {
        let chain = tmr_tmr();
        let clean = chain.encode_to_vec(b"ok!").unwrap();
        for offset in 0..clean.len() {
            let mut physical = clean.clone();
            physical[offset] ^= 0xFF;
            let report = chain.verify_and_correct(&mut physical);
            assert_eq!(report.corrected(), 1, "offset={offset}");
            assert_eq!(physical, clean, "offset={offset}");
        }
    }

    #[test]
    fn inner_repair_reencodes_outer_layers() {
        let chain = tmr_tmr();
        let clean = chain.encode_to_vec(b"z").unwrap();
        // the same inner replica differs in every outer copy, so the outer
        // vote has nothing to fix and the inner layer does the repair
        let mut physical = clean.clone();
        physical[1] = b'y';
        physical[4] = b'y';
        physical[7] = b'y';
        let report = chain.verify_and_correct(&mut physical);
        assert_eq!(report.corrected(), 1);
        assert_eq!(physical, clean);
        assert!(!chain.is_corrupted(&physical));
    }

    #[test]
    fn outer_split_falls_through_to_inner_copies() {
        let chain = tmr_tmr();
        let clean = chain.encode_to_vec(b"q").unwrap();
        // inner replica 0 differs in all three outer copies
        let mut physical = clean.clone();
        physical[0] = 1;
        physical[3] = 2;
        physical[6] = 3;
        let report = chain.verify_and_correct(&mut physical);
        assert!(report.is_recoverable());
        assert_eq!(report.corrected(), 2);
        assert_eq!(physical, clean);
    }

    #[test]
    fn nil_inner_layer_does_not_vouch_for_outer_failures() {
        let chain = PolicyChain::new(&[Policy::Nil, Policy::tmr()]).unwrap();
        let mut physical = chain.encode_to_vec(b"n").unwrap();
        physical[0] = 1;
        physical[1] = 2;
        physical[2] = 3;
        let report = chain.verify_and_correct(&mut physical);
        assert_eq!(report.status(), -1);
        assert_eq!(physical, [1, 2, 3]);
    }

    #[test]
    fn inner_reed_solomon_repairs_outer_split() {
        let rs = Policy::reed_solomon(4).unwrap();
        let chain = PolicyChain::new(&[rs, Policy::tmr()]).unwrap();
        let clean = chain.encode_to_vec(b"parity").unwrap();
        assert_eq!(clean.len(), 30);
        let mut physical = clean.clone();
        physical[2] ^= 0x10;
        physical[12] ^= 0x20;
        let report = chain.verify_and_correct(&mut physical);
        assert!(report.is_recoverable());
        assert_eq!(physical, clean);
    }

    #[test]
    fn redundancy_inside_reed_solomon_restores_failed_block() {
        let rs = Policy::reed_solomon(4).unwrap();
        let chain = PolicyChain::new(&[Policy::tmr(), rs]).unwrap();
        let clean = chain.encode_to_vec(b"abcd").unwrap();
        assert_eq!(clean.len(), 16);
        // three damaged bytes exceed two-byte correction, every inner position
        // keeps a majority
        let mut physical = clean.clone();
        physical[0] ^= 0xFF;
        physical[5] ^= 0xFF;
        physical[10] ^= 0xFF;
        let report = chain.verify_and_correct(&mut physical);
        assert!(report.is_recoverable(), "{report:?}");
        assert_eq!(&physical[..4], b"abcd");
        assert!(!chain.is_corrupted(&physical));
    }

    #[test]
    fn decode_leaves_input_untouched() {
        let chain = PolicyChain::single(Policy::tmr());
        let mut physical = chain.encode_to_vec(b"data").unwrap();
        physical[9] = 0;
        let snapshot = physical.clone();
        let (logical, report) = chain.decode(&physical);
        assert_eq!(logical, b"data");
        assert_eq!(report.corrected(), 1);
        assert_eq!(physical, snapshot);
    }

    #[test]
    fn migrate_recovers_then_reencodes() {
        let old = PolicyChain::single(Policy::tmr());
        let mut physical = old.encode_to_vec(b"abcd").unwrap();
        physical[2] = b'!';
        let new = PolicyChain::new(&[Policy::Nil, Policy::redundancy(5).unwrap()]).unwrap();
        let migration = PolicyChain::migrate(&physical, Some(&old), 6, &new).unwrap();
        assert_eq!(migration.recovery.corrected(), 1);
        assert_eq!(migration.physical.len(), 30);
        assert_eq!(&migration.physical[..6], b"abcd\0\0");
        assert!(!new.is_corrupted(&migration.physical));
    }

    #[test]
    fn migrate_carries_partial_content_past_unrecoverable_data() {
        let old = PolicyChain::single(Policy::tmr());
        let mut physical = old.encode_to_vec(b"ab").unwrap();
        physical[0] = 1;
        physical[2] = 2;
        physical[4] = 3;
        let migration =
            PolicyChain::migrate(&physical, Some(&old), 2, &PolicyChain::empty()).unwrap();
        assert_eq!(migration.recovery.unrecoverable(), 1);
        assert_eq!(migration.physical, vec![1, b'b']);
    }

    #[test]
    fn migrate_shrinks() {
        let chain = PolicyChain::single(Policy::tmr());
        let physical = chain.encode_to_vec(b"abcdef").unwrap();
        let migration = PolicyChain::migrate(&physical, Some(&chain), 3, &chain).unwrap();
        assert_eq!(migration.physical, b"abcabcabc");
    }

    #[test]
    fn overflow_is_reported() {
        let chain = tmr_tmr();
        assert_eq!(chain.physical_size_for(usize::MAX / 4), None);
        assert!(matches!(
            PolicyChain::migrate(&[], None, usize::MAX / 4, &chain),
            Err(PolicyError::SizeOverflow { .. })
        ));
    }
}
