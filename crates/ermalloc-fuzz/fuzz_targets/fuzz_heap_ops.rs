#![no_main]
use ermalloc_membrane::{LibcHeap, Policy, PolicyChain, ProtectedHeap};
use libfuzzer_sys::fuzz_target;

const SLOTS: usize = 8;

fn chain(byte: u8) -> PolicyChain {
    match byte % 4 {
        0 => PolicyChain::empty(),
        1 => PolicyChain::single(Policy::Nil),
        2 => PolicyChain::single(Policy::tmr()),
        _ => PolicyChain::new(&[Policy::Nil, Policy::tmr()]).unwrap_or_default(),
    }
}

fuzz_target!(|data: &[u8]| {
    let heap = ProtectedHeap::new(LibcHeap);
    let mut slots = [std::ptr::null_mut::<u8>(); SLOTS];

    for op in data.chunks_exact(4) {
        let idx = usize::from(op[1]) % SLOTS;
        let size = usize::from(op[2]) * 4;
        match op[0] % 6 {
            0 => {
                if slots[idx].is_null() {
                    slots[idx] = heap
                        .protected_allocate(size, &chain(op[3]))
                        .unwrap_or(std::ptr::null_mut());
                }
            }
            1 => {
                // SAFETY: slots hold null or live blocks from this heap.
                unsafe { heap.protected_release(slots[idx]) };
                slots[idx] = std::ptr::null_mut();
            }
            2 => {
                // SAFETY: slots hold null or live blocks from this heap.
                if let Ok(resized) = unsafe { heap.protected_resize(slots[idx], size, &chain(op[3])) } {
                    slots[idx] = resized.ptr;
                }
            }
            3 => {
                if !slots[idx].is_null() {
                    // SAFETY: slots hold live blocks from this heap.
                    if let Ok(changed) = unsafe { heap.change_policies(slots[idx], &chain(op[3])) } {
                        slots[idx] = changed.ptr;
                    }
                }
            }
            4 => {
                heap.inject_fault(slots[idx], usize::from(op[2]), op[3]);
            }
            _ => {
                let _ = heap.enforce(slots[idx]).status();
            }
        }
    }

    for ptr in slots {
        // SAFETY: slots hold null or live blocks from this heap.
        unsafe { heap.protected_release(ptr) };
    }
    assert!(heap.store().is_empty());
});
