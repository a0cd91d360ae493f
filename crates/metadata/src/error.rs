//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl MetadataError {
    /// Map an insert failure, turning unique-constraint violations into
    /// `AlreadyExists`.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        let is_unique_violation = err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if is_unique_violation {
            MetadataError::AlreadyExists(what())
        } else {
            MetadataError::Database(err)
        }
    }

    pub(crate) fn corrupt(err: hodie_core::Error) -> Self {
        MetadataError::CorruptRow(err.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
