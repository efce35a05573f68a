//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A block with this index is already in the ledger.
    #[error("duplicate block index: {0}")]
    DuplicateIndex(u64),

    /// A block with this hash is already in the ledger.
    #[error("duplicate block hash: {0}")]
    DuplicateHash(String),

    /// Meta flags or trust record (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a block.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The connection or in-memory state lock was poisoned, or a blocking
    /// task was cancelled.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
