//! Deterministic fault-injection scenarios.
//!
//! Each scenario allocates one block under a chain, writes a known pattern,
//! flips bits at chosen physical offsets and checks the enforcement status and
//! whether the logical bytes survived.

use std::io::Write;
use std::time::Instant;

use ermalloc_core::{Policy, PolicyChain, PolicyError};
use ermalloc_membrane::{ProtectedHeap, RawAllocator};
use serde::{Deserialize, Serialize};

use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::{HarnessError, describe_chain};

/// One bit flip, XOR-ed into a physical byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub physical_offset: usize,
    pub mask: u8,
}

impl Fault {
    #[must_use]
    pub const fn new(physical_offset: usize, mask: u8) -> Self {
        Self {
            physical_offset,
            mask,
        }
    }
}

/// A block, a chain, the faults to inject and the expected verdict.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub logical_size: usize,
    pub chain: PolicyChain,
    pub faults: Vec<Fault>,
    /// Expected `er_enforce_policies` status.
    pub expected_status: i32,
    /// Whether the logical bytes must read back unchanged.
    pub expect_intact: bool,
}

impl Scenario {
    fn new(
        name: &str,
        logical_size: usize,
        chain: PolicyChain,
        faults: &[Fault],
        expected_status: i32,
        expect_intact: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            logical_size,
            chain,
            faults: faults.to_vec(),
            expected_status,
            expect_intact,
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub policies: String,
    pub logical_size: usize,
    pub physical_size: usize,
    pub faults: usize,
    /// `is_corrupted` before enforcement.
    pub detected: bool,
    pub status: i32,
    pub expected_status: i32,
    pub corrected: u64,
    pub unrecoverable: u64,
    pub intact: bool,
    pub passed: bool,
    pub latency_ns: u64,
}

/// The built-in scenario set.
///
/// Sizes are chosen so physical offsets are easy to read: with 64 logical
/// bytes under `r3`, copy `k` starts at `64 * k`.
pub fn builtin_scenarios() -> Result<Vec<Scenario>, PolicyError> {
    let nil = PolicyChain::single(Policy::Nil);
    let r3 = PolicyChain::single(Policy::tmr());
    let r5 = PolicyChain::single(Policy::redundancy(5)?);
    let nil_r3 = PolicyChain::new(&[Policy::Nil, Policy::tmr()])?;
    let r3_r3 = PolicyChain::new(&[Policy::tmr(), Policy::tmr()])?;
    let rs4 = PolicyChain::single(Policy::reed_solomon(4)?);
    let rs4_r3 = PolicyChain::new(&[Policy::reed_solomon(4)?, Policy::tmr()])?;

    Ok(vec![
        Scenario::new("nil-clean", 64, nil, &[], 0, true),
        Scenario::new("nil-undetected-flip", 64, nil, &[Fault::new(3, 0x01)], 0, false),
        Scenario::new("r3-clean", 64, r3, &[], 0, true),
        Scenario::new("r3-replica-flip", 64, r3, &[Fault::new(74, 0x80)], 1, true),
        Scenario::new("r3-data-flip", 64, r3, &[Fault::new(5, 0xFF)], 1, true),
        Scenario::new(
            "r3-spread-flips",
            64,
            r3,
            &[Fault::new(3, 0x01), Fault::new(84, 0x02), Fault::new(168, 0x04)],
            3,
            true,
        ),
        Scenario::new(
            "r3-split-vote",
            64,
            r3,
            &[Fault::new(7, 0x01), Fault::new(71, 0x02)],
            -1,
            false,
        ),
        Scenario::new(
            "r3-outvoted",
            64,
            r3,
            &[Fault::new(7, 0x01), Fault::new(71, 0x01)],
            1,
            false,
        ),
        Scenario::new(
            "r5-two-flips-same-position",
            64,
            r5,
            &[Fault::new(9, 0x01), Fault::new(73, 0x01)],
            1,
            true,
        ),
        Scenario::new("nil-r3-replica-flip", 64, nil_r3, &[Fault::new(65, 0x10)], 1, true),
        Scenario::new("r3-r3-outer-flip", 16, r3_r3, &[Fault::new(0, 0x01)], 1, true),
        Scenario::new(
            "r3-r3-outer-copy-flip",
            16,
            r3_r3,
            &[Fault::new(100, 0x40)],
            1,
            true,
        ),
        Scenario::new(
            "rs4-two-flips",
            64,
            rs4,
            &[Fault::new(3, 0x01), Fault::new(40, 0x10)],
            2,
            true,
        ),
        Scenario::new("rs4-parity-flip", 64, rs4, &[Fault::new(65, 0x08)], 1, true),
        Scenario::new(
            "rs4-r3-split-falls-through",
            16,
            rs4_r3,
            &[Fault::new(2, 0x01), Fault::new(22, 0x02)],
            2,
            true,
        ),
    ])
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(7)).collect()
}

/// Run one scenario. The block stays live until the heap is torn down.
pub fn run_scenario<A: RawAllocator>(
    heap: &ProtectedHeap<A>,
    scenario: &Scenario,
) -> Result<ScenarioResult, HarnessError> {
    let ptr = heap.protected_allocate(scenario.logical_size, &scenario.chain)?;
    let expected = pattern(scenario.logical_size);
    heap.write(ptr, 0, &expected)?;
    let physical_size = heap.physical_size(ptr).unwrap_or(0);

    for fault in &scenario.faults {
        if !heap.inject_fault(ptr, fault.physical_offset, fault.mask) {
            return Err(HarnessError::FaultOutOfRange {
                offset: fault.physical_offset,
                size: physical_size,
            });
        }
    }
    let detected = heap.is_corrupted(ptr);

    let start = Instant::now();
    let report = heap.enforce(ptr);
    let latency_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

    let mut actual = vec![0u8; scenario.logical_size];
    heap.read(ptr, 0, &mut actual)?;
    let intact = actual == expected;
    let status = report.status();

    Ok(ScenarioResult {
        name: scenario.name.clone(),
        policies: describe_chain(&scenario.chain),
        logical_size: scenario.logical_size,
        physical_size,
        faults: scenario.faults.len(),
        detected,
        status,
        expected_status: scenario.expected_status,
        corrected: report.corrected(),
        unrecoverable: report.unrecoverable(),
        intact,
        passed: status == scenario.expected_status && intact == scenario.expect_intact,
        latency_ns,
    })
}

/// Run scenarios against `heap`, logging one JSONL record each.
pub fn run_suite<A: RawAllocator, W: Write>(
    heap: &ProtectedHeap<A>,
    scenarios: &[Scenario],
    log: &mut LogEmitter<W>,
) -> Result<Vec<ScenarioResult>, HarnessError> {
    log.emit(LogLevel::Info, "suite_start")?;
    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let result = run_scenario(heap, scenario)?;
        let (level, outcome) = if result.passed {
            (LogLevel::Info, Outcome::Pass)
        } else {
            (LogLevel::Error, Outcome::Fail)
        };
        tracing::info!(
            scenario = %result.name,
            policies = %result.policies,
            status = result.status,
            passed = result.passed,
            "scenario finished"
        );
        log.emit_entry(
            LogEntry::new("", level, "scenario_end")
                .with_scenario(&result.name, &result.policies)
                .with_findings(result.status, result.corrected, result.unrecoverable)
                .with_outcome(outcome)
                .with_latency_ns(result.latency_ns)
                .with_details(serde_json::json!({
                    "detected": result.detected,
                    "intact": result.intact,
                    "expected_status": result.expected_status,
                    "faults": result.faults,
                })),
        )?;
        results.push(result);
    }
    log.emit(LogLevel::Info, "suite_end")?;
    log.flush()?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ermalloc_membrane::LibcHeap;

    #[test]
    fn builtin_scenarios_pass() {
        let heap = ProtectedHeap::new(LibcHeap);
        let scenarios = builtin_scenarios().unwrap();
        for scenario in &scenarios {
            let result = run_scenario(&heap, scenario).unwrap();
            assert!(result.passed, "{result:?}");
            assert_eq!(result.detected, scenario.expected_status != 0, "{}", scenario.name);
        }
        assert_eq!(heap.teardown(), scenarios.len());
    }

    #[test]
    fn out_of_range_fault_is_an_error() {
        let heap = ProtectedHeap::new(LibcHeap);
        let scenario = Scenario::new(
            "too-far",
            8,
            PolicyChain::single(Policy::tmr()),
            &[Fault::new(24, 0x01)],
            0,
            true,
        );
        assert!(matches!(
            run_scenario(&heap, &scenario),
            Err(HarnessError::FaultOutOfRange { offset: 24, size: 24 })
        ));
    }

    #[test]
    fn suite_logs_one_line_per_scenario() {
        let heap = ProtectedHeap::new(LibcHeap);
        let scenarios = builtin_scenarios().unwrap();
        let mut log = LogEmitter::new(Vec::new(), "suite-test");
        let results = run_suite(&heap, &scenarios, &mut log).unwrap();
        assert_eq!(results.len(), scenarios.len());

        let text = String::from_utf8(log.into_inner()).unwrap();
        let ends = text
            .lines()
            .map(|line| crate::structured_log::validate_log_line(line).unwrap())
            .filter(|entry| entry.event == "scenario_end")
            .count();
        assert_eq!(ends, scenarios.len());
    }
}
