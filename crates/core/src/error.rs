//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("unknown counter kind: {0}")]
    UnknownCounterKind(String),

    #[error("unknown period: {0}")]
    UnknownPeriod(String),

    #[error("unknown upload category: {0}")]
    UnknownCategory(String),

    #[error("invalid upload status: {0}")]
    InvalidUploadStatus(String),

    #[error("invalid period window: {0}")]
    InvalidPeriod(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
