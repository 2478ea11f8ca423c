//! Cache error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache lifecycle operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The initial full refresh failed; the background loop was not started
    #[error("Cache {cache} refresh failed: {message}")]
    RefreshFailed { cache: String, message: String },

    /// A refresh did not finish within its deadline
    #[error("Cache {cache} refresh timed out after {timeout:?}")]
    Timeout { cache: String, timeout: Duration },

    /// The background loop did not stop within the close deadline
    #[error("Cache {cache} did not shut down within {timeout:?}")]
    ShutdownTimeout { cache: String, timeout: Duration },

    #[error("Cache {cache} has invalid options: {message}")]
    InvalidOptions { cache: String, message: String },

    #[error("Cache {cache} is already started")]
    AlreadyStarted { cache: String },
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
