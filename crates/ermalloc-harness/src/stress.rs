//! Concurrent allocate/inject/enforce walks.
//!
//! Every worker owns its slots and injects at most one pending fault per
//! block, so every enforcement has a known expected status. Any disagreement
//! is counted as a violation.

use std::thread;

use ermalloc_core::{Policy, PolicyChain, PolicyError};
use ermalloc_membrane::{ProtectedHeap, RawAllocator};
use serde::{Deserialize, Serialize};

use crate::HarnessError;

const SLOTS: usize = 32;

/// Parameters of a stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressConfig {
    pub seed: u64,
    pub threads: usize,
    /// Steps per worker.
    pub steps: usize,
    /// Largest logical block size.
    pub max_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 0xE2_4A11,
            threads: 4,
            steps: 5_000,
            max_size: 512,
        }
    }
}

/// Totals across all workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressSummary {
    pub config: Option<StressConfig>,
    pub allocations: u64,
    pub injected: u64,
    pub enforcements: u64,
    pub corrected: u64,
    pub unrecoverable: u64,
    /// Enforcement statuses or read-backs that disagreed with the model.
    pub violations: u64,
    pub live_blocks: usize,
}

impl StressSummary {
    fn absorb(&mut self, other: &StressSummary) {
        self.allocations += other.allocations;
        self.injected += other.injected;
        self.enforcements += other.enforcements;
        self.corrected += other.corrected;
        self.unrecoverable += other.unrecoverable;
        self.violations += other.violations;
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations == 0 && self.unrecoverable == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Chains a worker picks from. Each corrects any single flipped byte.
fn chains() -> Result<[PolicyChain; 6], PolicyError> {
    Ok([
        PolicyChain::single(Policy::tmr()),
        PolicyChain::single(Policy::redundancy(5)?),
        PolicyChain::new(&[Policy::Nil, Policy::tmr()])?,
        PolicyChain::new(&[Policy::tmr(), Policy::tmr()])?,
        PolicyChain::single(Policy::reed_solomon(4)?),
        PolicyChain::new(&[Policy::reed_solomon(2)?, Policy::tmr()])?,
    ])
}

struct Slot {
    ptr: *mut u8,
    content: Vec<u8>,
    pending_fault: bool,
}

fn run_worker<A: RawAllocator>(
    heap: &ProtectedHeap<A>,
    seed: u64,
    config: StressConfig,
    chains: &[PolicyChain],
) -> Result<StressSummary, HarnessError> {
    let mut rng = XorShift64::new(seed);
    let mut slots: Vec<Option<Slot>> = (0..SLOTS).map(|_| None).collect();
    let mut tally = StressSummary::default();
    let max_size = config.max_size.max(1);

    for _ in 0..config.steps {
        let idx = rng.below(SLOTS);
        let op = rng.below(100);
        let entry = &mut slots[idx];
        match entry {
            None if op < 30 => {
                let size = 1 + rng.below(max_size);
                let chain = chains[rng.below(chains.len())];
                let ptr = heap.protected_allocate(size, &chain)?;
                let content: Vec<u8> = (0..size).map(|_| rng.next_u64() as u8).collect();
                heap.write(ptr, 0, &content)?;
                tally.allocations += 1;
                *entry = Some(Slot {
                    ptr,
                    content,
                    pending_fault: false,
                });
            }
            Some(slot) if (30..60).contains(&op) && !slot.pending_fault => {
                let physical = heap.physical_size(slot.ptr).unwrap_or(0);
                let offset = rng.below(physical.max(1));
                let mask = 1 + rng.below(255) as u8;
                if heap.inject_fault(slot.ptr, offset, mask) {
                    slot.pending_fault = true;
                    tally.injected += 1;
                }
            }
            Some(slot) if op >= 60 => {
                let report = heap.enforce(slot.ptr);
                tally.enforcements += 1;
                tally.corrected += report.corrected();
                tally.unrecoverable += report.unrecoverable();
                if report.status() != i32::from(slot.pending_fault) {
                    tally.violations += 1;
                }
                slot.pending_fault = false;

                let mut now = vec![0u8; slot.content.len()];
                heap.read(slot.ptr, 0, &mut now)?;
                if now != slot.content {
                    tally.violations += 1;
                }
            }
            _ => {}
        }
    }
    Ok(tally)
}

/// Run `config.threads` workers against one shared heap.
///
/// Blocks stay live; the caller tears the heap down.
pub fn run_stress<A: RawAllocator>(
    heap: &ProtectedHeap<A>,
    config: StressConfig,
) -> Result<StressSummary, HarnessError> {
    let chains = chains()?;
    let tallies = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads.max(1))
            .map(|t| {
                let chains = &chains;
                let seed = config.seed.wrapping_add(t as u64 * 0x9E37_79B9);
                scope.spawn(move || run_worker(heap, seed, config, chains))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect::<Vec<_>>()
    });

    let mut summary = StressSummary {
        config: Some(config),
        ..StressSummary::default()
    };
    for tally in tallies {
        summary.absorb(&tally?);
    }
    summary.live_blocks = heap.store().len();
    tracing::info!(
        allocations = summary.allocations,
        injected = summary.injected,
        corrected = summary.corrected,
        violations = summary.violations,
        "stress run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ermalloc_membrane::LibcHeap;

    #[test]
    fn single_worker_run_is_clean() {
        let heap = ProtectedHeap::new(LibcHeap);
        let config = StressConfig {
            threads: 1,
            steps: 2_000,
            ..StressConfig::default()
        };
        let summary = run_stress(&heap, config).unwrap();
        assert!(summary.is_clean(), "{summary:?}");
        assert!(summary.allocations > 0);
        assert!(summary.corrected <= summary.injected);
        assert_eq!(summary.live_blocks as u64, summary.allocations);
    }

    #[test]
    fn same_seed_same_totals() {
        let config = StressConfig {
            threads: 1,
            steps: 1_000,
            ..StressConfig::default()
        };
        let a = run_stress(&ProtectedHeap::new(LibcHeap), config).unwrap();
        let b = run_stress(&ProtectedHeap::new(LibcHeap), config).unwrap();
        assert_eq!(a, b);
    }
}
