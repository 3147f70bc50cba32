//! Raw allocator adapter.
//!
//! Thin pass-through to unprotected malloc-family primitives. Pointers are
//! returned exactly as the underlying allocator produced them, null included,
//! so unprotected entry points keep the conventional zero-size and failure
//! behavior.

use std::ffi::c_void;

/// Unprotected allocation primitives.
///
/// # Safety
///
/// Implementors must honor the malloc-family contracts: a non-null pointer
/// from [`reserve`](Self::reserve) or [`resize`](Self::resize) is valid for
/// reads and writes of the requested size until released, `resize` preserves
/// the common prefix and releases the old block when it relocates, and a
/// failing `resize` leaves the old block untouched.
pub unsafe trait RawAllocator: Send + Sync {
    /// Reserve `size` uninitialized bytes. Null on failure.
    fn reserve(&self, size: usize) -> *mut u8;

    /// Reserve `nmemb * size` zeroed bytes. Null on failure or overflow.
    fn reserve_zeroed(&self, nmemb: usize, size: usize) -> *mut u8;

    /// Release a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this allocator.
    unsafe fn release(&self, ptr: *mut u8);

    /// Resize a block, possibly relocating it. Null on failure.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this allocator.
    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Usable size of a live block, when the allocator can tell.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this allocator.
    unsafe fn usable_size(&self, _ptr: *mut u8) -> Option<usize> {
        None
    }
}

/// The process C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcHeap;

unsafe impl RawAllocator for LibcHeap {
    fn reserve(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { sys::malloc(size) }.cast()
    }

    fn reserve_zeroed(&self, nmemb: usize, size: usize) -> *mut u8 {
        // SAFETY: calloc has no preconditions and checks the product itself.
        unsafe { sys::calloc(nmemb, size) }.cast()
    }

    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { sys::free(ptr.cast()) }
    }

    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        unsafe { sys::realloc(ptr.cast(), size) }.cast()
    }

    unsafe fn usable_size(&self, ptr: *mut u8) -> Option<usize> {
        if ptr.is_null() {
            return None;
        }
        #[cfg(target_os = "linux")]
        {
            // SAFETY: forwarded caller contract; ptr is non-null.
            Some(unsafe { libc::malloc_usable_size(ptr.cast::<c_void>()) })
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

#[cfg(not(feature = "interpose"))]
mod sys {
    pub(super) use libc::{calloc, free, malloc, realloc};
}

#[cfg(feature = "interpose")]
mod sys {
    use std::ffi::c_void;

    // glibc's internal entry points stay reachable when `malloc` itself is
    // interposed by this library.
    unsafe extern "C" {
        #[link_name = "__libc_malloc"]
        pub(super) fn malloc(size: usize) -> *mut c_void;
        #[link_name = "__libc_calloc"]
        pub(super) fn calloc(nmemb: usize, size: usize) -> *mut c_void;
        #[link_name = "__libc_free"]
        pub(super) fn free(ptr: *mut c_void);
        #[link_name = "__libc_realloc"]
        pub(super) fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    }
}
