//! # ermalloc-membrane
//!
//! The allocation engine that sits between callers and the raw heap.
//!
//! ```text
//! caller -> ProtectedHeap -> PolicyChain (size, encode) -> RawAllocator
//!                         \-> MetadataStore (logical ptr -> record)
//! ```
//!
//! - **Raw adapter** (`raw`): malloc-family primitives, no metadata
//! - **Metadata store** (`store`): sharded index of protected allocations
//! - **Engine** (`engine`): protected entry points, resize/migration, enforcement
//! - **Configuration** (`config`): runtime mode and defaults from the environment
//! - **Metrics** (`metrics`): atomic counters for observability

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod raw;
pub mod store;

pub use config::{HeapConfig, HeapMode};
pub use engine::{ProtectedHeap, Resized};
pub use error::AllocError;
pub use metrics::{HeapMetrics, MetricsSnapshot};
pub use raw::{LibcHeap, RawAllocator};
pub use store::{AllocationRecord, MetadataStore, PhysicalBlock};

pub use ermalloc_core::{CorruptionReport, Policy, PolicyChain, PolicyKind};
