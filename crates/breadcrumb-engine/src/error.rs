//! Error types for the collection engine.

use breadcrumb_core::CoreError;
use breadcrumb_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
///
/// Policy rejections and missing fixes are not errors; they come back as
/// [`crate::DropResult::Rejected`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// `initialize` has not completed.
    #[error("engine not initialized")]
    NotInitialized,

    /// The engine hit a fatal error earlier and refuses further work.
    #[error("engine is in error state: {0}")]
    Faulted(String),

    /// Stored identity key could not be decoded.
    #[error("identity key corrupted: {0}")]
    KeyCorrupted(String),

    /// Identity key storage could not be read or written.
    #[error("identity key unavailable: {0}")]
    KeyUnavailable(String),

    /// The ledger was written by a different identity than the one loaded.
    #[error("ledger identity {ledger} does not match loaded identity {loaded}")]
    IdentityMismatch { ledger: String, loaded: String },

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors after which the engine must stop and enter the error state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::KeyCorrupted(_) | Self::KeyUnavailable(_) | Self::IdentityMismatch { .. }
        )
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
