//! # BrimStore Core
//!
//! Fundamental building blocks shared across BrimStore crates:
//! - Request objects for the asynchronous PUT/GET surface
//! - Error types
//! - Configuration with environment overrides
//! - Operation metrics
//! - Common utilities

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use metrics::{StoreMetrics, StoreMetricsSnapshot};
pub use types::{ReadReply, ReadValue, WriteValue};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
