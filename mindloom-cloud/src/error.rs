//! Sync engine error types.

use thiserror::Error;

/// Result type for sync engine operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur in sync and adapter operations.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("initialization wait exceeded {0:?}")]
    InitializationTimeout(std::time::Duration),

    #[error("storage error: {0}")]
    Storage(#[from] mindloom_storage::StorageError),

    #[error("remote store unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("adapter is shut down")]
    Shutdown,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CloudError {
    /// True for "entity absent" failures. The update-then-create
    /// fallback fires only for these, never for arbitrary errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}
