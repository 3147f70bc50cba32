//! Verification outcome shared by every policy.
//!
//! Corruption is an expected operating condition, so it is reported as data
//! rather than as an error. A report counts corrected positions, counts
//! positions no policy could resolve, and keeps the first few unresolved
//! offsets for inspection.

/// Number of unresolved offsets retained per report.
pub const MAX_REPORTED_POSITIONS: usize = 64;

/// Result of a verify/correct pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorruptionReport {
    corrected: u64,
    unrecoverable: u64,
    positions: Vec<usize>,
}

impl CorruptionReport {
    /// A report with no findings.
    #[must_use]
    pub const fn clean() -> Self {
        Self {
            corrected: 0,
            unrecoverable: 0,
            positions: Vec::new(),
        }
    }

    /// Record one position repaired by majority.
    pub fn record_corrected(&mut self) {
        self.corrected = self.corrected.saturating_add(1);
    }

    /// Record one position that could not be resolved.
    ///
    /// `offset` is relative to the data region of the reporting policy; for a
    /// single-policy chain that is the logical offset.
    pub fn record_unrecoverable(&mut self, offset: usize) {
        self.unrecoverable = self.unrecoverable.saturating_add(1);
        if self.positions.len() < MAX_REPORTED_POSITIONS {
            self.positions.push(offset);
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CorruptionReport) {
        self.corrected = self.corrected.saturating_add(other.corrected);
        self.unrecoverable = self.unrecoverable.saturating_add(other.unrecoverable);
        let room = MAX_REPORTED_POSITIONS.saturating_sub(self.positions.len());
        self.positions.extend(other.positions.into_iter().take(room));
    }

    /// Count every unresolved position as repaired.
    ///
    /// Used when a later pass restored the content the reporting policy could
    /// not.
    pub fn resolve(&mut self) {
        self.corrected = self.corrected.saturating_add(self.unrecoverable);
        self.unrecoverable = 0;
        self.positions.clear();
    }

    /// Positions repaired.
    #[must_use]
    pub const fn corrected(&self) -> u64 {
        self.corrected
    }

    /// Positions left unresolved.
    #[must_use]
    pub const fn unrecoverable(&self) -> u64 {
        self.unrecoverable
    }

    /// First unresolved offsets, in discovery order.
    #[must_use]
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// True when nothing was found.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.corrected == 0 && self.unrecoverable == 0
    }

    /// True when every finding was repaired.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.unrecoverable == 0
    }

    /// Integer status in the enforcement convention.
    ///
    /// `0` clean, `> 0` number of corrected positions, `< 0` the negated
    /// number of unresolved positions. Saturates at the `i32` range and never
    /// returns `0` for an unrecoverable report.
    #[must_use]
    pub fn status(&self) -> i32 {
        if self.unrecoverable > 0 {
            let n = i32::try_from(self.unrecoverable).unwrap_or(i32::MAX);
            -n
        } else {
            i32::try_from(self.corrected).unwrap_or(i32::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_status_is_zero() {
        let report = CorruptionReport::clean();
        assert!(report.is_clean());
        assert!(report.is_recoverable());
        assert_eq!(report.status(), 0);
    }

    #[test]
    fn corrected_positions_are_positive() {
        let mut report = CorruptionReport::clean();
        report.record_corrected();
        report.record_corrected();
        assert_eq!(report.status(), 2);
        assert!(report.is_recoverable());
    }

    #[test]
    fn unrecoverable_dominates_status() {
        let mut report = CorruptionReport::clean();
        report.record_corrected();
        report.record_unrecoverable(7);
        assert_eq!(report.status(), -1);
        assert_eq!(report.corrected(), 1);
        assert_eq!(report.positions(), &[7]);
    }

    #[test]
    fn positions_are_capped() {
        let mut report = CorruptionReport::clean();
        for offset in 0..(MAX_REPORTED_POSITIONS + 10) {
            report.record_unrecoverable(offset);
        }
        assert_eq!(report.positions().len(), MAX_REPORTED_POSITIONS);
        assert_eq!(report.unrecoverable(), (MAX_REPORTED_POSITIONS + 10) as u64);
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = CorruptionReport::clean();
        a.record_corrected();
        let mut b = CorruptionReport::clean();
        b.record_unrecoverable(3);
        b.record_corrected();
        a.merge(b);
        assert_eq!(a.corrected(), 2);
        assert_eq!(a.unrecoverable(), 1);
        assert_eq!(a.positions(), &[3]);
    }

    #[test]
    fn resolve_moves_findings_to_corrected() {
        let mut report = CorruptionReport::clean();
        report.record_corrected();
        report.record_unrecoverable(4);
        report.record_unrecoverable(9);
        report.resolve();
        assert_eq!(report.status(), 3);
        assert!(report.positions().is_empty());
    }
}
