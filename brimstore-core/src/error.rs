//! # Error Handling
//!
//! Unified error type for all BrimStore operations.
//!
//! Per-request failures (`KeyNotFound`, `ValueTooLarge`, reader-side I/O)
//! are delivered on the request's completion channel and never disturb the
//! pipeline. Writer-side I/O failures and registry exhaustion are fatal:
//! there is no consistent on-disk state to continue from.

use thiserror::Error;

/// Result type alias for BrimStore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for BrimStore
#[derive(Error, Debug)]
pub enum Error {
    /// GET for a key the store has never accepted a value for.
    #[error("key not found")]
    KeyNotFound,

    /// PUT whose value exceeds the configured maximum.
    #[error("value length of {length} > {max}")]
    ValueTooLarge { length: usize, max: usize },

    /// Request submitted before `start` or after `stop`.
    #[error("store is not running")]
    NotRunning,

    /// More than 65,536 location blocks registered.
    #[error("location block table exhausted")]
    BlockTableExhausted,

    /// A checksum-framed section failed verification.
    #[error("checksum mismatch in section {section}")]
    ChecksumMismatch { section: u64 },

    /// Malformed or truncated on-disk data.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Broken internal invariant.
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
