//! ABI layer for the `er*` allocation functions.
//!
//! Every entry point converts its C policy list, forwards to the global
//! [`ProtectedHeap`](ermalloc_membrane::ProtectedHeap), and maps failures to
//! NULL plus `errno`. Pointers never handed out by a protected entry point
//! behave exactly as with the raw allocator.

use std::ffi::{c_int, c_void};
use std::ptr;

use ermalloc_core::PolicyChain;
use ermalloc_membrane::{AllocError, LibcHeap, ProtectedHeap, RawAllocator};

use crate::heap_state::try_global_heap;
use crate::policy_list::{ErPolicyList, chain_from_list};

/// Returned by the buffer functions for invalid arguments (`INT_MIN`).
pub const ER_ARG_ERROR: c_int = c_int::MIN;

#[inline]
unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location always returns the calling thread's errno.
    let p = unsafe { libc::__errno_location() };
    unsafe { *p = val };
}

fn errno_for(err: &AllocError) -> c_int {
    match err {
        AllocError::OutOfMemory { .. } | AllocError::InvalidSize => libc::ENOMEM,
        AllocError::InvalidPolicy(_)
        | AllocError::UnknownSize { .. }
        | AllocError::NotProtected { .. }
        | AllocError::OutOfBounds { .. } => libc::EINVAL,
    }
}

fn fail(err: &AllocError) -> *mut c_void {
    tracing::debug!(error = %err, "ermalloc entry point failed");
    // SAFETY: writes the calling thread's errno.
    unsafe { set_abi_errno(errno_for(err)) };
    ptr::null_mut()
}

/// # Safety
///
/// `policies` must be null or a valid policy list.
unsafe fn chain_for(
    heap: &ProtectedHeap,
    policies: *const ErPolicyList,
) -> Result<PolicyChain, AllocError> {
    // SAFETY: forwarded caller contract.
    Ok(unsafe { chain_from_list(policies, heap.config()) }?)
}

fn finish(result: Result<*mut u8, AllocError>) -> *mut c_void {
    match result {
        Ok(p) => p.cast(),
        Err(err) => fail(&err),
    }
}

// ---------------------------------------------------------------------------
// ermalloc / ercalloc
// ---------------------------------------------------------------------------

/// Allocate `size` bytes under `policies` (NULL for none).
///
/// Protected memory starts zeroed.
///
/// # Safety
///
/// `policies` must be null or a valid policy list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ermalloc(size: usize, policies: *const ErPolicyList) -> *mut c_void {
    let Some(heap) = try_global_heap() else {
        return LibcHeap.reserve(size).cast();
    };
    // SAFETY: forwarded caller contract.
    finish(
        unsafe { chain_for(heap, policies) }
            .and_then(|chain| heap.protected_allocate(size, &chain)),
    )
}

/// Allocate `nmemb * size` zeroed bytes under `policies`.
///
/// # Safety
///
/// `policies` must be null or a valid policy list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ercalloc(
    nmemb: usize,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    let Some(heap) = try_global_heap() else {
        return LibcHeap.reserve_zeroed(nmemb, size).cast();
    };
    // SAFETY: forwarded caller contract.
    finish(
        unsafe { chain_for(heap, policies) }
            .and_then(|chain| heap.protected_allocate_zeroed(nmemb, size, &chain)),
    )
}

// ---------------------------------------------------------------------------
// erfree
// ---------------------------------------------------------------------------

/// Release a block from any allocation function of this library.
///
/// # Safety
///
/// `ptr` must be null or a live block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn erfree(ptr: *mut c_void) {
    match try_global_heap() {
        // SAFETY: forwarded caller contract.
        Some(heap) => unsafe { heap.protected_release(ptr.cast()) },
        // SAFETY: nothing is protected before the heap exists.
        None => unsafe { LibcHeap.release(ptr.cast()) },
    }
}

// ---------------------------------------------------------------------------
// errealloc / erreallocarray
// ---------------------------------------------------------------------------

/// Resize a block and apply `policies` to the result.
///
/// Existing policies recover the content before it moves. `size == 0` frees
/// and returns NULL. On failure the old block is untouched.
///
/// # Safety
///
/// `ptr` must be null or a live block; `policies` null or a valid list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn errealloc(
    ptr: *mut c_void,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    let Some(heap) = try_global_heap() else {
        // SAFETY: forwarded caller contract.
        return unsafe { LibcHeap.resize(ptr.cast(), size) }.cast();
    };
    // SAFETY: forwarded caller contract.
    let result = unsafe { chain_for(heap, policies) }
        .and_then(|chain| unsafe { heap.protected_resize(ptr.cast(), size, &chain) });
    finish(result.map(|resized| resized.ptr))
}

/// [`errealloc`] for `nmemb * size` bytes; NULL with `ENOMEM` on overflow.
///
/// # Safety
///
/// Same as [`errealloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn erreallocarray(
    ptr: *mut c_void,
    nmemb: usize,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    match nmemb.checked_mul(size) {
        // SAFETY: forwarded caller contract.
        Some(total) => unsafe { errealloc(ptr, total, policies) },
        None => fail(&AllocError::InvalidSize),
    }
}

// ---------------------------------------------------------------------------
// policy management
// ---------------------------------------------------------------------------

/// Replace the policies of a block. Returns the (possibly moved) block, or
/// NULL with `errno` set and the block untouched.
///
/// # Safety
///
/// `ptr` must be null or a live block; `policies` null or a valid list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_change_policies(
    ptr: *mut c_void,
    policies: *const ErPolicyList,
) -> *mut c_void {
    let Some(heap) = try_global_heap() else {
        return ptr;
    };
    // SAFETY: forwarded caller contract.
    let result = unsafe { chain_for(heap, policies) }
        .and_then(|chain| unsafe { heap.change_policies(ptr.cast(), &chain) });
    finish(result.map(|resized| resized.ptr))
}

/// Verify and repair a block.
///
/// Returns 0 when clean, the number of corrected positions when everything
/// was repaired, and minus the number of unrecoverable positions otherwise.
/// Unprotected pointers are clean.
#[unsafe(no_mangle)]
pub extern "C" fn er_enforce_policies(ptr: *mut c_void) -> c_int {
    try_global_heap().map_or(0, |heap| heap.enforce(ptr.cast()).status())
}

/// Re-encode a block after writing through its pointer directly.
#[unsafe(no_mangle)]
pub extern "C" fn er_setup_policies(ptr: *mut c_void) {
    if let Some(heap) = try_global_heap() {
        heap.refresh(ptr.cast());
    }
}

/// 1 when a protected block is inconsistent, 0 otherwise. Repairs nothing.
#[unsafe(no_mangle)]
pub extern "C" fn er_is_corrupted(ptr: *const c_void) -> c_int {
    try_global_heap().map_or(0, |heap| c_int::from(heap.is_corrupted(ptr.cast())))
}

// ---------------------------------------------------------------------------
// buffer access
// ---------------------------------------------------------------------------

/// Repair `base`, then copy `len` logical bytes from `offset` into `dest`.
///
/// Returns the enforcement status. Out-of-range requests return
/// [`ER_ARG_ERROR`] with `errno = EINVAL`.
///
/// # Safety
///
/// `dest` must be writable for `len` bytes; an unprotected `base` must be
/// readable for `offset + len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_read_buf(
    base: *mut c_void,
    dest: *mut c_void,
    offset: usize,
    len: usize,
) -> c_int {
    if len == 0 {
        return 0;
    }
    if base.is_null() || dest.is_null() {
        // SAFETY: writes the calling thread's errno.
        unsafe { set_abi_errno(libc::EINVAL) };
        return ER_ARG_ERROR;
    }
    // SAFETY: caller guarantees dest is writable for len bytes.
    let dst = unsafe { std::slice::from_raw_parts_mut(dest.cast::<u8>(), len) };
    match try_global_heap().map(|heap| heap.read(base.cast(), offset, dst)) {
        Some(Ok(report)) => report.status(),
        Some(Err(AllocError::NotProtected { .. })) | None => {
            // SAFETY: caller guarantees the unprotected range is readable.
            unsafe {
                ptr::copy_nonoverlapping(base.cast::<u8>().add(offset), dst.as_mut_ptr(), len);
            }
            0
        }
        Some(Err(err)) => {
            // SAFETY: writes the calling thread's errno.
            unsafe { set_abi_errno(errno_for(&err)) };
            ER_ARG_ERROR
        }
    }
}

/// Copy `len` bytes from `src` into `base` at logical `offset`, then
/// re-encode. Returns the status of the repair done before writing.
///
/// A negative status is the only notice of unrecoverable positions: the
/// re-encode seals them in, so later enforcement reports the block clean.
///
/// # Safety
///
/// `src` must be readable for `len` bytes; an unprotected `base` must be
/// writable for `offset + len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_write_buf(
    base: *mut c_void,
    src: *const c_void,
    offset: usize,
    len: usize,
) -> c_int {
    if len == 0 {
        return 0;
    }
    if base.is_null() || src.is_null() {
        // SAFETY: writes the calling thread's errno.
        unsafe { set_abi_errno(libc::EINVAL) };
        return ER_ARG_ERROR;
    }
    // SAFETY: caller guarantees src is readable for len bytes.
    let data = unsafe { std::slice::from_raw_parts(src.cast::<u8>(), len) };
    match try_global_heap().map(|heap| heap.write(base.cast(), offset, data)) {
        Some(Ok(report)) => report.status(),
        Some(Err(AllocError::NotProtected { .. })) | None => {
            // SAFETY: caller guarantees the unprotected range is writable.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), base.cast::<u8>().add(offset), len);
            }
            0
        }
        Some(Err(err)) => {
            // SAFETY: writes the calling thread's errno.
            unsafe { set_abi_errno(errno_for(&err)) };
            ER_ARG_ERROR
        }
    }
}

// ---------------------------------------------------------------------------
// unprotected malloc family
// ---------------------------------------------------------------------------

/// Plain `malloc`, `free`, `calloc`, `realloc` and `reallocarray`.
///
/// They go straight to glibc and never touch the global heap, since Rust's
/// own allocations inside the heap resolve to these symbols. Suppressed in
/// test builds so the test binary keeps the system allocator.
#[cfg(all(feature = "interpose", not(test)))]
pub mod interposed {
    use std::ffi::c_void;

    use ermalloc_membrane::{LibcHeap, RawAllocator};

    /// POSIX `malloc`.
    ///
    /// # Safety
    ///
    /// Caller must eventually `free` the returned pointer exactly once.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
        LibcHeap.reserve(size).cast()
    }

    /// POSIX `free`. Protected blocks must go through `erfree`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live unprotected block.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn free(ptr: *mut c_void) {
        // SAFETY: forwarded caller contract.
        unsafe { LibcHeap.release(ptr.cast()) }
    }

    /// POSIX `calloc`.
    ///
    /// # Safety
    ///
    /// Caller must eventually `free` the returned pointer exactly once.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
        LibcHeap.reserve_zeroed(nmemb, size).cast()
    }

    /// POSIX `realloc`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live unprotected block.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        // SAFETY: forwarded caller contract.
        unsafe { LibcHeap.resize(ptr.cast(), size) }.cast()
    }

    /// `reallocarray`: NULL with `ENOMEM` on overflow.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live unprotected block.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn reallocarray(
        ptr: *mut c_void,
        nmemb: usize,
        size: usize,
    ) -> *mut c_void {
        match nmemb.checked_mul(size) {
            // SAFETY: forwarded caller contract.
            Some(total) => unsafe { realloc(ptr, total) },
            None => {
                // SAFETY: writes the calling thread's errno.
                unsafe { super::set_abi_errno(libc::ENOMEM) };
                std::ptr::null_mut()
            }
        }
    }
}
