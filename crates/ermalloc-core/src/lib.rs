//! # ermalloc-core
//!
//! Data-integrity policies for ermalloc allocations.
//!
//! A policy describes how the logical bytes of an allocation are laid out in
//! physical memory and how that layout is verified and repaired. Policies are
//! pure functions over byte slices; this crate never touches raw memory.
//!
//! # Layout
//!
//! Every policy keeps its data region as a prefix of its buffer and appends its
//! own overhead. Chained policies nest: the innermost policy (index 0) sees the
//! logical payload, each outer policy treats the previous policy's whole buffer
//! as its data region.
//!
//! ```text
//! [Redundancy(3), Redundancy(3)]
//! [[[data] copy copy] [[data] copy copy] [[data] copy copy]]
//! ```
//!
//! ```text
//! [ReedSolomon(4), Redundancy(3)]
//! [[[data] ecc] [[data] ecc] [[data] ecc]]
//! ```

#![deny(unsafe_code)]

pub mod chain;
pub mod error;
pub mod policy;
pub mod report;

pub use chain::{Migration, PolicyChain};
pub use error::PolicyError;
pub use policy::{
    MAX_POLICIES, NilPolicy, Policy, PolicyCodec, PolicyKind, RedundancyPolicy,
    ReedSolomonPolicy,
};
pub use report::CorruptionReport;
