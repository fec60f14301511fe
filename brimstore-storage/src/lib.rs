//! # BrimStore Storage Engine
//!
//! Append-only, log-structured value storage with an in-memory key-location
//! index. Values are opaque byte blobs addressed by a 128-bit key hash and
//! versioned by a caller-supplied sequence number.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Write Path                            │
//! │                                                              │
//! │  Put ──> mem writer ──> disk writer ──> mem clearer ──> TOC  │
//! │  (shard    │ fills        │ appends       │ repoints   writer│
//! │   by key)  │ memory       │ .values       │ index,       │   │
//! │            │ blocks       │ files         │ emits pages  ▼   │
//! │            │              │               │           .toc   │
//! │            └── cleared block pool <───────┘           files  │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Read Path                             │
//! │                                                              │
//! │  Get ──> key-location index ──> memory block (buffer copy)   │
//! │                            └──> disk block (reader pool)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Memory blocks are created once at startup and cycle through the
//! pipeline forever; back-pressure falls out of the bounded queues that
//! carry them. A key's location moves from its memory block to a disk
//! file without ever leaving the index in an inconsistent state, so reads
//! stay correct throughout the hand-off.

pub mod block;
pub mod format;
pub mod framing;
pub mod locmap;
pub mod store;

pub use brimstore_core::{
    Error, ReadValue, Result, StoreConfig, StoreMetrics, StoreMetricsSnapshot, WriteValue,
};
pub use locmap::{KeyLocation, KeyLocationMap};
pub use store::Store;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
