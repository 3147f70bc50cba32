//! Protected allocation engine.
//!
//! [`ProtectedHeap`] orchestrates the raw allocator, the policy chain and the
//! metadata store. The logical pointer of a protected allocation is the base
//! of its physical block: every policy keeps its data region as a prefix, so
//! the caller reads and writes the logical bytes in place and the policy
//! overhead trails behind them.
//!
//! Resizes and policy changes never modify the old block before the new one
//! exists. Old content is recovered into a scratch buffer, the old record is
//! detached from the store, the raw block is resized, and the re-encoded
//! buffer is copied in before the new record is published. A failing raw
//! resize puts the old record back over the untouched old block.

use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

use ermalloc_core::{CorruptionReport, Migration, PolicyChain};

use crate::config::{HeapConfig, HeapMode};
use crate::error::AllocError;
use crate::metrics::HeapMetrics;
use crate::raw::{LibcHeap, RawAllocator};
use crate::store::{AllocationRecord, MetadataStore, PhysicalBlock};

/// Outcome of a resize or policy change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resized {
    /// New logical pointer; null after a resize to zero.
    pub ptr: *mut u8,
    /// Findings while recovering the old content.
    pub recovery: CorruptionReport,
}

impl Resized {
    fn clean(ptr: *mut u8) -> Self {
        Self {
            ptr,
            recovery: CorruptionReport::clean(),
        }
    }
}

/// Where the content of a reshaped block comes from.
#[derive(Clone, Copy)]
enum Origin {
    Protected(AllocationRecord),
    Unprotected { size: usize },
}

impl Origin {
    fn physical_size(&self) -> usize {
        match self {
            Self::Protected(record) => record.block.size,
            Self::Unprotected { size } => *size,
        }
    }

    fn chain(&self) -> Option<&PolicyChain> {
        match self {
            Self::Protected(record) => Some(&record.chain),
            Self::Unprotected { .. } => None,
        }
    }
}

/// Allocator whose blocks can carry a policy chain.
pub struct ProtectedHeap<A: RawAllocator = LibcHeap> {
    raw: A,
    store: MetadataStore,
    config: HeapConfig,
    metrics: HeapMetrics,
    next_generation: AtomicU64,
}

impl ProtectedHeap<LibcHeap> {
    /// Heap over the C allocator, configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(LibcHeap, crate::config::heap_config())
    }
}

impl<A: RawAllocator> ProtectedHeap<A> {
    /// Heap over `raw` with default configuration.
    pub fn new(raw: A) -> Self {
        Self::with_config(raw, HeapConfig::default())
    }

    /// Heap over `raw` with explicit configuration.
    pub fn with_config(raw: A, config: HeapConfig) -> Self {
        Self {
            raw,
            store: MetadataStore::new(),
            config,
            metrics: HeapMetrics::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Underlying raw allocator.
    pub fn raw(&self) -> &A {
        &self.raw
    }

    /// Records of the live protected allocations.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Configuration this heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Operation counters.
    pub fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn effective(&self, chain: &PolicyChain) -> PolicyChain {
        match self.config.mode {
            HeapMode::Enforcing => *chain,
            HeapMode::Passthrough => PolicyChain::empty(),
        }
    }

    fn out_of_memory(&self, requested: usize) -> AllocError {
        HeapMetrics::inc(&self.metrics.allocation_failures);
        tracing::debug!(requested, "raw allocator failed");
        AllocError::OutOfMemory { requested }
    }

    // ---- unprotected pass-through ----

    /// `malloc`.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.raw.reserve(size)
    }

    /// `calloc`.
    pub fn allocate_zeroed(&self, nmemb: usize, size: usize) -> *mut u8 {
        self.raw.reserve_zeroed(nmemb, size)
    }

    /// `free`.
    ///
    /// A protected pointer is released with its record, so the store never
    /// outlives the block.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { self.protected_release(ptr) }
    }

    /// `realloc`. Resizing a protected pointer drops its protection.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if !ptr.is_null() && self.store.contains(ptr as usize) {
            // SAFETY: forwarded caller contract.
            return match unsafe { self.protected_resize(ptr, size, &PolicyChain::empty()) } {
                Ok(resized) => resized.ptr,
                Err(_) => ptr::null_mut(),
            };
        }
        // SAFETY: forwarded caller contract; ptr is not protected.
        unsafe { self.raw.resize(ptr, size) }
    }

    /// `reallocarray`. Null on `nmemb * size` overflow.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn resize_array(&self, ptr: *mut u8, nmemb: usize, size: usize) -> *mut u8 {
        match nmemb.checked_mul(size) {
            // SAFETY: forwarded caller contract.
            Some(total) => unsafe { self.resize(ptr, total) },
            None => ptr::null_mut(),
        }
    }

    // ---- protected entry points ----

    /// Allocate `size` logical bytes under `chain`.
    ///
    /// With an empty chain this is `malloc`. Protected blocks start zeroed.
    pub fn protected_allocate(
        &self,
        size: usize,
        chain: &PolicyChain,
    ) -> Result<*mut u8, AllocError> {
        let chain = self.effective(chain);
        if chain.is_empty() {
            let ptr = self.raw.reserve(size);
            if ptr.is_null() && size != 0 {
                return Err(self.out_of_memory(size));
            }
            return Ok(ptr);
        }
        self.place(size, chain)
    }

    /// Allocate `nmemb * size` zeroed logical bytes under `chain`.
    pub fn protected_allocate_zeroed(
        &self,
        nmemb: usize,
        size: usize,
        chain: &PolicyChain,
    ) -> Result<*mut u8, AllocError> {
        let total = nmemb.checked_mul(size).ok_or(AllocError::InvalidSize)?;
        let chain = self.effective(chain);
        if chain.is_empty() {
            let ptr = self.raw.reserve_zeroed(nmemb, size);
            if ptr.is_null() && total != 0 {
                return Err(self.out_of_memory(total));
            }
            return Ok(ptr);
        }
        self.place(total, chain)
    }

    fn place(&self, logical_size: usize, chain: PolicyChain) -> Result<*mut u8, AllocError> {
        let physical = chain
            .physical_size_for(logical_size)
            .ok_or(AllocError::InvalidSize)?;
        let reserve = physical.max(1);
        let base = self.raw.reserve_zeroed(1, reserve);
        if base.is_null() {
            return Err(self.out_of_memory(reserve));
        }

        // SAFETY: base is a fresh block of at least `physical` bytes.
        let buffer = unsafe { slice::from_raw_parts_mut(base, physical) };
        chain.encode(buffer);

        let record = AllocationRecord {
            logical: base as usize,
            logical_size,
            block: PhysicalBlock {
                base: base as usize,
                size: physical,
            },
            chain,
            generation: self.next_generation(),
        };
        self.store.insert(record);
        HeapMetrics::inc(&self.metrics.protected_allocations);
        tracing::debug!(ptr = ?base, logical_size, physical, policies = chain.len(), "protected allocation");
        Ok(base)
    }

    /// Release a block. Unknown pointers go to the raw allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn protected_release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        match self.store.remove(ptr as usize) {
            Some(record) => {
                // SAFETY: the record owned this block and is now gone.
                unsafe { self.raw.release(record.physical_ptr()) };
                HeapMetrics::inc(&self.metrics.protected_frees);
                tracing::debug!(ptr = ?ptr, logical_size = record.logical_size, "protected free");
            }
            None => {
                // SAFETY: forwarded caller contract.
                unsafe { self.raw.release(ptr) };
            }
        }
    }

    /// Resize a block and attach `chain` to the result.
    ///
    /// Null `ptr` allocates; `size == 0` frees and yields null. The old
    /// content is recovered under its old chain before it is moved, and the
    /// findings are returned even when some positions were unrecoverable.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn protected_resize(
        &self,
        ptr: *mut u8,
        size: usize,
        chain: &PolicyChain,
    ) -> Result<Resized, AllocError> {
        if ptr.is_null() {
            return self.protected_allocate(size, chain).map(Resized::clean);
        }
        if size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.protected_release(ptr) };
            return Ok(Resized::clean(ptr::null_mut()));
        }

        let chain = self.effective(chain);
        let origin = match self.store.lookup(ptr as usize) {
            Some(record) => Origin::Protected(record),
            None if chain.is_empty() => {
                HeapMetrics::inc(&self.metrics.passthrough_fallbacks);
                // SAFETY: forwarded caller contract; ptr is not protected.
                let moved = unsafe { self.raw.resize(ptr, size) };
                if moved.is_null() {
                    return Err(self.out_of_memory(size));
                }
                return Ok(Resized::clean(moved));
            }
            // SAFETY: forwarded caller contract.
            None => unsafe { self.adopt(ptr)? },
        };

        HeapMetrics::inc(&self.metrics.protected_resizes);
        // SAFETY: origin describes the live block at ptr.
        unsafe { self.reshape(ptr, origin, size, chain) }
    }

    /// [`protected_resize`](Self::protected_resize) for `nmemb * size` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn protected_resize_array(
        &self,
        ptr: *mut u8,
        nmemb: usize,
        size: usize,
        chain: &PolicyChain,
    ) -> Result<Resized, AllocError> {
        let total = nmemb.checked_mul(size).ok_or(AllocError::InvalidSize)?;
        // SAFETY: forwarded caller contract.
        unsafe { self.protected_resize(ptr, total, chain) }
    }

    /// Re-lay an allocation under `chain`, keeping its logical size.
    ///
    /// The block may move; use the returned pointer. Replacing a chain with
    /// itself only repairs in place. An unprotected block is adopted with its
    /// usable size as logical size.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn change_policies(
        &self,
        ptr: *mut u8,
        chain: &PolicyChain,
    ) -> Result<Resized, AllocError> {
        if ptr.is_null() {
            return Ok(Resized::clean(ptr));
        }
        let chain = self.effective(chain);
        let origin = match self.store.lookup(ptr as usize) {
            Some(record) if record.chain == chain => {
                return Ok(Resized {
                    ptr,
                    recovery: self.enforce(ptr),
                });
            }
            Some(record) => Origin::Protected(record),
            None if chain.is_empty() => return Ok(Resized::clean(ptr)),
            // SAFETY: forwarded caller contract.
            None => unsafe { self.adopt(ptr)? },
        };

        let logical_size = match origin {
            Origin::Protected(record) => record.logical_size,
            Origin::Unprotected { size } => size,
        };
        HeapMetrics::inc(&self.metrics.policy_changes);
        // SAFETY: origin describes the live block at ptr.
        unsafe { self.reshape(ptr, origin, logical_size, chain) }
    }

    /// # Safety
    ///
    /// `ptr` must be a live unprotected block from the raw allocator.
    unsafe fn adopt(&self, ptr: *mut u8) -> Result<Origin, AllocError> {
        // SAFETY: forwarded caller contract.
        let size = unsafe { self.raw.usable_size(ptr) }.ok_or(AllocError::UnknownSize {
            ptr: ptr as usize,
        })?;
        Ok(Origin::Unprotected { size })
    }

    /// Move the content of `ptr` into a block laid out for `size` logical
    /// bytes under `chain`, and bring the store in line.
    ///
    /// # Safety
    ///
    /// `ptr` must be the live block described by `origin`.
    unsafe fn reshape(
        &self,
        ptr: *mut u8,
        origin: Origin,
        size: usize,
        chain: PolicyChain,
    ) -> Result<Resized, AllocError> {
        // SAFETY: origin's physical size lies within the live block.
        let old = unsafe { slice::from_raw_parts(ptr, origin.physical_size()) };
        let Migration { physical, recovery } =
            PolicyChain::migrate(old, origin.chain(), size, &chain)?;

        let reserve = physical.len().max(1);
        // the old record must be gone before the raw allocator can free its
        // block, or a recycled address would resolve to it
        let detached = match origin {
            Origin::Protected(old) => Some(
                self.store
                    .remove_matching(old.logical, old.generation)
                    .ok_or(AllocError::NotProtected { ptr: ptr as usize })?,
            ),
            Origin::Unprotected { .. } => None,
        };

        // SAFETY: forwarded caller contract; the old block is not read again.
        let base = unsafe { self.raw.resize(ptr, reserve) };
        if base.is_null() {
            if let Some(record) = detached {
                self.store.insert(record);
            }
            return Err(self.out_of_memory(reserve));
        }
        // SAFETY: base holds at least `reserve >= physical.len()` bytes.
        unsafe { ptr::copy_nonoverlapping(physical.as_ptr(), base, physical.len()) };

        if !chain.is_empty() {
            self.store.insert(AllocationRecord {
                logical: base as usize,
                logical_size: size,
                block: PhysicalBlock {
                    base: base as usize,
                    size: physical.len(),
                },
                chain,
                generation: self.next_generation(),
            });
        }

        self.note_recovery(base, &recovery);
        tracing::debug!(
            from = ?ptr,
            to = ?base,
            logical_size = size,
            policies = chain.len(),
            "protected reshape"
        );
        Ok(Resized {
            ptr: base,
            recovery,
        })
    }

    fn note_recovery(&self, ptr: *mut u8, recovery: &CorruptionReport) {
        HeapMetrics::add(&self.metrics.corrected_positions, recovery.corrected());
        HeapMetrics::add(&self.metrics.unrecoverable_findings, recovery.unrecoverable());
        if !recovery.is_recoverable() {
            HeapMetrics::inc(&self.metrics.recovery_warnings);
            tracing::warn!(
                ptr = ?ptr,
                unrecoverable = recovery.unrecoverable(),
                positions = ?recovery.positions(),
                "migrated content that could not be fully recovered"
            );
        }
    }

    // ---- enforcement and access ----

    /// Verify and repair a protected block in place.
    ///
    /// Unknown pointers are vacuously clean. See
    /// [`CorruptionReport::status`] for the integer form.
    pub fn enforce(&self, ptr: *mut u8) -> CorruptionReport {
        let Some(record) = self.store.lookup(ptr as usize) else {
            return CorruptionReport::clean();
        };
        // SAFETY: registered blocks are live and `block.size` bytes long.
        let buffer = unsafe { slice::from_raw_parts_mut(record.physical_ptr(), record.block.size) };
        let report = record.chain.verify_and_correct(buffer);

        HeapMetrics::inc(&self.metrics.enforcements);
        HeapMetrics::add(&self.metrics.corrected_positions, report.corrected());
        HeapMetrics::add(&self.metrics.unrecoverable_findings, report.unrecoverable());
        if !report.is_recoverable() {
            tracing::warn!(
                ptr = ?ptr,
                corrected = report.corrected(),
                unrecoverable = report.unrecoverable(),
                positions = ?report.positions(),
                "unrecoverable corruption"
            );
        } else if report.corrected() > 0 {
            tracing::debug!(ptr = ?ptr, corrected = report.corrected(), "corrected corruption");
        }
        report
    }

    /// True when a protected block is inconsistent. Nothing is repaired.
    #[must_use]
    pub fn is_corrupted(&self, ptr: *const u8) -> bool {
        let Some(record) = self.store.lookup(ptr as usize) else {
            return false;
        };
        // SAFETY: registered blocks are live and `block.size` bytes long.
        let buffer = unsafe { slice::from_raw_parts(record.physical_ptr(), record.block.size) };
        record.chain.is_corrupted(buffer)
    }

    /// Repair the block, then copy logical bytes `offset..offset + dst.len()`
    /// into `dst`.
    ///
    /// Bytes are copied even when some positions were unrecoverable; the
    /// report says which.
    pub fn read(
        &self,
        ptr: *const u8,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<CorruptionReport, AllocError> {
        let record = self.checked_range(ptr, offset, dst.len())?;
        let report = self.enforce(record.logical_ptr());
        // SAFETY: range checked against the live logical region.
        unsafe {
            ptr::copy_nonoverlapping(
                record.physical_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(report)
    }

    /// Repair the block, copy `src` into logical bytes starting at `offset`,
    /// and re-encode.
    ///
    /// The whole block is re-encoded from its data region, so positions the
    /// repair could not resolve are sealed in with whatever byte the data
    /// region held and no longer show up in later enforcements. The returned
    /// report is the only record of them.
    pub fn write(
        &self,
        ptr: *mut u8,
        offset: usize,
        src: &[u8],
    ) -> Result<CorruptionReport, AllocError> {
        let record = self.checked_range(ptr, offset, src.len())?;
        let report = self.enforce(ptr);
        if !report.is_recoverable() {
            HeapMetrics::inc(&self.metrics.sealed_writes);
            tracing::warn!(
                ptr = ?ptr,
                unrecoverable = report.unrecoverable(),
                "write re-encodes over unrecoverable corruption"
            );
        }
        // SAFETY: range checked against the live logical region.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), record.physical_ptr().add(offset), src.len());
            let buffer = slice::from_raw_parts_mut(record.physical_ptr(), record.block.size);
            record.chain.encode(buffer);
        }
        Ok(report)
    }

    fn checked_range(
        &self,
        ptr: *const u8,
        offset: usize,
        len: usize,
    ) -> Result<AllocationRecord, AllocError> {
        let record = self
            .store
            .lookup(ptr as usize)
            .ok_or(AllocError::NotProtected { ptr: ptr as usize })?;
        match offset.checked_add(len) {
            Some(end) if end <= record.logical_size => Ok(record),
            _ => Err(AllocError::OutOfBounds {
                offset,
                len,
                size: record.logical_size,
            }),
        }
    }

    /// Re-encode a protected block from its logical bytes.
    ///
    /// Call after writing through the logical pointer. Returns false for an
    /// unknown pointer.
    pub fn refresh(&self, ptr: *mut u8) -> bool {
        let Some(record) = self.store.lookup(ptr as usize) else {
            return false;
        };
        // SAFETY: registered blocks are live and `block.size` bytes long.
        let buffer = unsafe { slice::from_raw_parts_mut(record.physical_ptr(), record.block.size) };
        record.chain.encode(buffer);
        true
    }

    /// Flip bits of one physical byte of a protected block.
    ///
    /// Fault injection for tests and the harness. Returns false for an
    /// unknown pointer or an offset past the physical block.
    pub fn inject_fault(&self, ptr: *mut u8, physical_offset: usize, mask: u8) -> bool {
        match self.store.lookup(ptr as usize) {
            Some(record) if physical_offset < record.block.size => {
                // SAFETY: offset lies within the live physical block.
                unsafe { *record.physical_ptr().add(physical_offset) ^= mask };
                true
            }
            _ => false,
        }
    }

    /// True when `ptr` has an allocation record.
    #[must_use]
    pub fn is_protected(&self, ptr: *const u8) -> bool {
        self.store.contains(ptr as usize)
    }

    /// Logical size of a protected block.
    #[must_use]
    pub fn logical_size(&self, ptr: *const u8) -> Option<usize> {
        self.store.lookup(ptr as usize).map(|r| r.logical_size)
    }

    /// Physical size of a protected block.
    #[must_use]
    pub fn physical_size(&self, ptr: *const u8) -> Option<usize> {
        self.store.lookup(ptr as usize).map(|r| r.block.size)
    }

    /// Chain attached to a protected block.
    #[must_use]
    pub fn policies(&self, ptr: *const u8) -> Option<PolicyChain> {
        self.store.lookup(ptr as usize).map(|r| r.chain)
    }

    /// Release every outstanding protected block. Returns how many there were.
    pub fn teardown(&self) -> usize {
        let records = self.store.drain();
        for record in &records {
            // SAFETY: drained records owned their blocks exclusively.
            unsafe { self.raw.release(record.physical_ptr()) };
        }
        if !records.is_empty() {
            tracing::info!(outstanding = records.len(), "released protected blocks at teardown");
        }
        records.len()
    }
}

impl<A: RawAllocator> Drop for ProtectedHeap<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}
