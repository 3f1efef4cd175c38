//! TimeCap error taxonomy.
//!
//! Four families of failure, mirroring how they are handled:
//! - `Validation` — rejected before any store mutation, returned to the caller.
//! - `NotFound` — referenced capsule/user absent; never fatal to a sweep.
//! - `Channel` — a single send failed; recovered locally by the dispatcher.
//! - `Store` — the backing store itself is unreachable; fatal to the invocation.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TimecapError>;

#[derive(Debug, Error)]
pub enum TimecapError {
    /// Malformed input, rejected before any mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A delivery channel send failed.
    #[error("channel error: {0}")]
    Channel(String),

    /// The key/value store is unreachable or returned an error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration file problems.
    #[error("config error: {0}")]
    Config(String),

    /// Stored payload could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
