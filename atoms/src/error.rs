use thiserror::Error;

/// Failure of a remote store call (object store, record store or client state).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic version check failed on a record write.
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Backend(format!("{}: {}", context, err))
    }

    /// Backend failures are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
