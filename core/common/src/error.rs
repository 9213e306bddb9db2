//! Common error types for hyperoffline.

use thiserror::Error;

/// Top-level error type for offline cache and replay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The local store failed to open, read or commit.
    #[error("Store error: {0}")]
    Store(String),

    /// The local store is locked by another connection.
    #[error("Store blocked: {0}")]
    StoreBlocked(String),

    /// A combined cache/queue write was rolled back.
    #[error("Transaction aborted during {operation}: {reason}")]
    TransactionAbort {
        operation: &'static str,
        reason: String,
    },

    /// A replayed request failed; the remaining requests were not attempted.
    #[error("Replay of request {id} ({method} {url}) failed: {reason}")]
    Replay {
        id: i64,
        method: String,
        url: String,
        reason: String,
    },

    /// A network call failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error originated in the local store.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, Error::Store(_) | Error::StoreBlocked(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
