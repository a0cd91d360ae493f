//! Quota subsystem error types.
//!
//! Expected outcomes such as a reached ceiling or a duplicate upload are
//! decisions, not errors. Only infrastructure failures land here.

use hodie_metadata::MetadataError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    /// The metadata store could not be reached or rejected the operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A store round trip exceeded the configured bound.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Concurrent first-time resolves kept colliding. Transient; retry.
    #[error("could not create client for subject after {attempts} attempts")]
    IdentityCreationConflict { attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QuotaError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::Timeout { .. } | Self::IdentityCreationConflict { .. }
        )
    }
}

impl From<MetadataError> for QuotaError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => QuotaError::NotFound(what),
            MetadataError::CorruptRow(msg) => QuotaError::Internal(msg),
            other => QuotaError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<hodie_core::Error> for QuotaError {
    fn from(err: hodie_core::Error) -> Self {
        QuotaError::Internal(err.to_string())
    }
}

pub type QuotaResult<T> = std::result::Result<T, QuotaError>;

/// Run `fut` under `limit`, mapping expiry to [`QuotaError::Timeout`].
///
/// The future's own output is returned untouched, so callers can still
/// match on store-specific errors.
pub async fn within<F>(operation: &'static str, limit: Duration, fut: F) -> QuotaResult<F::Output>
where
    F: std::future::Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| QuotaError::Timeout {
            operation,
            after: limit,
        })
}

/// [`within`] for futures that already produce a [`QuotaResult`].
pub(crate) async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> QuotaResult<T>
where
    F: std::future::Future<Output = QuotaResult<T>>,
{
    within(operation, limit, fut).await?
}
