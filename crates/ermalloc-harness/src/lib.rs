//! Verification harness for ermalloc.
//!
//! This crate provides:
//! - Scenarios: allocate under a chain, inject bit flips, check what enforcement reports
//! - Stress runs: concurrent allocate/inject/enforce walks with consistency checks
//! - Structured logging: JSONL records for every scenario and run
//! - Report generation: markdown + JSON summaries

#![forbid(unsafe_code)]

pub mod report;
pub mod scenario;
pub mod stress;
pub mod structured_log;

pub use report::HarnessReport;
pub use scenario::{Fault, Scenario, ScenarioResult};
pub use stress::{StressConfig, StressSummary};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

use ermalloc_core::{Policy, PolicyChain};

/// Short label for a chain, innermost first: `nil+r3`.
#[must_use]
pub fn describe_chain(chain: &PolicyChain) -> String {
    if chain.is_empty() {
        return String::from("none");
    }
    chain
        .as_slice()
        .iter()
        .map(|policy| match policy {
            Policy::Nil => String::from("nil"),
            Policy::Redundancy(r) => format!("r{}", r.copies()),
            Policy::ReedSolomon(rs) => format!("rs{}", rs.ecc()),
        })
        .collect::<Vec<_>>()
        .join("+")
}

/// Failure of a harness run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Alloc(#[from] ermalloc_membrane::AllocError),
    #[error(transparent)]
    Policy(#[from] ermalloc_core::PolicyError),
    #[error("fault at physical offset {offset} is outside the {size}-byte block")]
    FaultOutOfRange { offset: usize, size: usize },
    #[error("log write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_are_labelled_innermost_first() {
        assert_eq!(describe_chain(&PolicyChain::empty()), "none");
        let chain = PolicyChain::new(&[Policy::Nil, Policy::redundancy(5).unwrap()]).unwrap();
        assert_eq!(describe_chain(&chain), "nil+r5");
        assert_eq!(describe_chain(&PolicyChain::single(Policy::tmr())), "r3");
        let chain = PolicyChain::new(&[Policy::reed_solomon(3).unwrap(), Policy::tmr()]).unwrap();
        assert_eq!(describe_chain(&chain), "rs3+r3");
    }
}
