//! Process-wide protected heap.
//!
//! Every `er*` entry point shares one [`ProtectedHeap`], so a pointer
//! protected by `ermalloc` is known to `erfree`, `errealloc` and
//! `er_enforce_policies` alike.
//!
//! Uses manual atomic init instead of `OnceLock`: under LD_PRELOAD the first
//! heap construction allocates, and a reentrant `OnceLock` init would wait on
//! itself. Other threads wait for construction to finish; only the building
//! thread itself sees `None`.

use std::cell::Cell;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use ermalloc_membrane::ProtectedHeap;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

static HEAP_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static HEAP_PTR: AtomicPtr<ProtectedHeap> = AtomicPtr::new(std::ptr::null_mut());

thread_local! {
    static BUILDING: Cell<bool> = const { Cell::new(false) };
}

fn ready() -> Option<&'static ProtectedHeap> {
    let ptr = HEAP_PTR.load(Ordering::Acquire);
    // SAFETY: HEAP_PTR is only set once, to a leaked Box, before READY.
    unsafe { ptr.as_ref() }
}

fn wait_ready() -> Option<&'static ProtectedHeap> {
    if BUILDING.with(Cell::get) {
        return None;
    }
    while HEAP_STATE.load(Ordering::Acquire) != STATE_READY {
        std::thread::yield_now();
    }
    ready()
}

/// The global heap.
///
/// Returns `None` only for allocations made while the heap itself is being
/// built; entry points then fall back to raw allocator behavior.
pub(crate) fn try_global_heap() -> Option<&'static ProtectedHeap> {
    match HEAP_STATE.load(Ordering::Acquire) {
        STATE_READY => return ready(),
        STATE_INITIALIZING => return wait_ready(),
        _ => {}
    }

    if HEAP_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return wait_ready();
    }

    BUILDING.with(|b| b.set(true));
    let heap = Box::new(ProtectedHeap::from_env());
    let ptr = Box::into_raw(heap);
    HEAP_PTR.store(ptr, Ordering::Release);
    HEAP_STATE.store(STATE_READY, Ordering::Release);
    BUILDING.with(|b| b.set(false));
    ready()
}
