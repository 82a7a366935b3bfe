use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by a [`crate::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend temporarily unreachable; the operation may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    /// A blocking database task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Pool(_) => true,
            StoreError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            StoreError::InvalidPath(_) | StoreError::Corrupt(_) | StoreError::Task(_) => false,
        }
    }
}
