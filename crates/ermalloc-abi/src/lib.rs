//! # ermalloc-abi
//!
//! C boundary for ermalloc. Produces `libermalloc.so`, declared by
//! `include/ermalloc.h`.
//!
//! ```text
//! C caller -> er* entry (this crate) -> policy list -> ProtectedHeap -> raw heap
//! ```
//!
//! With the `interpose` feature the library also exports the plain malloc
//! family, forwarding to glibc, so it can be preloaded in front of programs
//! that mix `malloc` and `ermalloc`.

mod heap_state;
pub mod malloc_abi;
pub mod policy_list;

pub use malloc_abi::{
    ER_ARG_ERROR, er_change_policies, er_enforce_policies, er_is_corrupted, er_read_buf,
    er_setup_policies, er_write_buf, ercalloc, erfree, ermalloc, errealloc, erreallocarray,
};
pub use policy_list::{ErPolicyList, chain_from_list};
