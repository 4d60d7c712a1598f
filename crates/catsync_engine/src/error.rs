//! Error types for the sync engine.

use catsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a migration, synchronization, audit or update.
///
/// Per-record and per-page failures are contained inside the engine and
/// never surface here.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A store operation failed and could not be contained.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A uniqueness assumption about the catalog was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed input, detected before any network call.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if the underlying store error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}
