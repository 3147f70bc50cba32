//! Sharded metadata store for protected allocations.
//!
//! Maps a logical pointer (the address handed to the caller) to its
//! [`AllocationRecord`]. A pointer is protected exactly when it has an entry
//! here. Keys are exact addresses; interior pointers never match.
//!
//! Thread-safe via sharded `parking_lot::RwLock`. Every record carries a
//! generation number so that a stale writer cannot remove an entry that was
//! re-created for a recycled address.

use parking_lot::RwLock;
use std::collections::HashMap;

use ermalloc_core::PolicyChain;

/// Number of shards (power of 2).
const NUM_SHARDS: usize = 16;

/// Physical memory backing one protected allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalBlock {
    /// Address returned by the raw allocator.
    pub base: usize,
    /// Bytes reserved.
    pub size: usize,
}

/// Bookkeeping for one live protected allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Address seen by the caller.
    pub logical: usize,
    /// Size seen by the caller.
    pub logical_size: usize,
    /// Current physical block.
    pub block: PhysicalBlock,
    /// Attached policies, never empty for a stored record.
    pub chain: PolicyChain,
    /// Identity of this record version.
    pub generation: u64,
}

impl AllocationRecord {
    /// Logical pointer as a raw pointer.
    #[must_use]
    pub fn logical_ptr(&self) -> *mut u8 {
        self.logical as *mut u8
    }

    /// Physical base as a raw pointer.
    #[must_use]
    pub fn physical_ptr(&self) -> *mut u8 {
        self.block.base as *mut u8
    }
}

type Shard = RwLock<HashMap<usize, AllocationRecord>>;

/// Concurrent index from logical pointer to allocation record.
pub struct MetadataStore {
    shards: Box<[Shard]>,
}

impl MetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let shards: Vec<Shard> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    fn shard_for(addr: usize) -> usize {
        // malloc results are 16-byte aligned; mix low and page bits
        ((addr >> 4) ^ (addr >> 12)) % NUM_SHARDS
    }

    fn shard(&self, addr: usize) -> &Shard {
        &self.shards[Self::shard_for(addr)]
    }

    /// Insert a record under its logical address, returning any record it
    /// replaced.
    pub fn insert(&self, record: AllocationRecord) -> Option<AllocationRecord> {
        self.shard(record.logical)
            .write()
            .insert(record.logical, record)
    }

    /// Current record for `logical`.
    #[must_use]
    pub fn lookup(&self, logical: usize) -> Option<AllocationRecord> {
        self.shard(logical).read().get(&logical).copied()
    }

    /// Replace the record stored under `record.logical`.
    ///
    /// Returns `false` (and stores nothing) when no record exists there.
    pub fn update(&self, record: AllocationRecord) -> bool {
        let mut shard = self.shard(record.logical).write();
        match shard.get_mut(&record.logical) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Remove and return the record for `logical`.
    pub fn remove(&self, logical: usize) -> Option<AllocationRecord> {
        self.shard(logical).write().remove(&logical)
    }

    /// Remove the record for `logical` only if it is still `generation`.
    ///
    /// Detaching a record this way before its block is resized or freed
    /// keeps a recycled address from resolving to it; put the record back
    /// with [`insert`](Self::insert) if the block survives.
    pub fn remove_matching(&self, logical: usize, generation: u64) -> Option<AllocationRecord> {
        let mut shard = self.shard(logical).write();
        match shard.get(&logical) {
            Some(record) if record.generation == generation => shard.remove(&logical),
            _ => None,
        }
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// True when no allocation is protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Check if `logical` is a protected allocation.
    #[must_use]
    pub fn contains(&self, logical: usize) -> bool {
        self.shard(logical).read().contains_key(&logical)
    }

    /// Copy of every record, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AllocationRecord> {
        self.shards
            .iter()
            .flat_map(|s| s.read().values().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<AllocationRecord> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.write().drain().map(|(_, record)| record));
        }
        out
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ermalloc_core::Policy;

    fn record(logical: usize, generation: u64) -> AllocationRecord {
        AllocationRecord {
            logical,
            logical_size: 8,
            block: PhysicalBlock {
                base: logical,
                size: 24,
            },
            chain: PolicyChain::single(Policy::tmr()),
            generation,
        }
    }

    #[test]
    fn insert_lookup_remove_cycle() {
        let store = MetadataStore::new();
        assert!(store.is_empty());
        assert!(store.insert(record(0x1000, 1)).is_none());
        assert_eq!(store.lookup(0x1000), Some(record(0x1000, 1)));
        assert!(store.contains(0x1000));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove(0x1000), Some(record(0x1000, 1)));
        assert!(store.lookup(0x1000).is_none());
        assert!(store.remove(0x1000).is_none());
    }

    #[test]
    fn interior_pointer_misses() {
        let store = MetadataStore::new();
        store.insert(record(0x2000, 1));
        assert!(store.lookup(0x2001).is_none());
    }

    #[test]
    fn update_requires_existing_entry() {
        let store = MetadataStore::new();
        assert!(!store.update(record(0x3000, 1)));
        assert!(store.lookup(0x3000).is_none());
        store.insert(record(0x3000, 1));
        let mut changed = record(0x3000, 2);
        changed.logical_size = 99;
        assert!(store.update(changed));
        assert_eq!(store.lookup(0x3000).unwrap().logical_size, 99);
    }

    #[test]
    fn remove_matching_checks_generation() {
        let store = MetadataStore::new();
        store.insert(record(0x4000, 7));
        assert!(store.remove_matching(0x4000, 6).is_none());
        assert!(store.contains(0x4000));
        assert!(store.remove_matching(0x4000, 7).is_some());
        assert!(!store.contains(0x4000));
    }

    #[test]
    fn detached_record_is_restored_unchanged() {
        let store = MetadataStore::new();
        store.insert(record(0x5000, 3));
        let detached = store.remove_matching(0x5000, 3).unwrap();
        assert!(!store.contains(0x5000));
        assert!(store.insert(detached).is_none());
        assert_eq!(store.lookup(0x5000), Some(record(0x5000, 3)));
    }

    #[test]
    fn stale_generation_spares_recycled_address() {
        let store = MetadataStore::new();
        // another allocation took over the address after a relocation
        store.insert(record(0x8000, 9));
        assert!(store.remove_matching(0x8000, 1).is_none());
        assert_eq!(store.lookup(0x8000).unwrap().generation, 9);
    }

    #[test]
    fn drain_empties_store() {
        let store = MetadataStore::new();
        for i in 0..40 {
            store.insert(record(0x10_000 + i * 16, i as u64));
        }
        assert_eq!(store.snapshot().len(), 40);
        let drained = store.drain();
        assert_eq!(drained.len(), 40);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_inserts_and_removes() {
        let store = std::sync::Arc::new(MetadataStore::new());
        let handles: Vec<_> = (0..4usize)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500usize {
                        let addr = 0x100_000 * (t + 1) + i * 16;
                        store.insert(record(addr, i as u64));
                        assert!(store.contains(addr));
                        if i % 2 == 0 {
                            assert!(store.remove(addr).is_some());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 4 * 250);
    }

    #[test]
    fn moving_records_stay_consistent_under_lookups() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        // one writer walks a record around a ring of addresses, detaching it
        // before inserting it under the next key; generation `g` lives at
        // ring slot `g % len`
        let store = Arc::new(MetadataStore::new());
        let ring: Vec<usize> = (0..8usize).map(|i| 0x200_000 + i * 0x1010).collect();
        store.insert(record(ring[0], 0));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                let ring = ring.clone();
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        for (slot, &addr) in ring.iter().enumerate() {
                            let seen = store.lookup(addr);
                            assert!(seen.is_none_or(|r| {
                                r.logical == addr && r.generation as usize % ring.len() == slot
                            }));
                        }
                    }
                })
            })
            .collect();

        for step in 1..2000u64 {
            let from = ring[(step as usize - 1) % ring.len()];
            let to = ring[step as usize % ring.len()];
            assert!(store.remove_matching(from, step - 1).is_some());
            store.insert(record(to, step));
        }
        done.store(true, Ordering::Release);
        for h in readers {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}
