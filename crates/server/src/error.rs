//! API error types.

use crate::ai::AiError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hodie_core::{DenyReason, QuotaDecision};
use hodie_metadata::MetadataError;
use hodie_quota::QuotaError;
use hodie_storage::StorageError;
use serde::Serialize;
use time::OffsetDateTime;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// When the exhausted window resets (quota denials only).
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub resets_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A usage ceiling was reached.
    #[error("{}", .0.message())]
    QuotaExceeded(QuotaDecision),

    /// An upload was refused by admission rules.
    #[error("{message}")]
    UploadRejected {
        reason: DenyReason,
        message: String,
        quota: Option<QuotaDecision>,
    },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("AI provider error: {0}")]
    Ai(#[from] AiError),

    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid input: {0}")]
    Core(#[from] hodie_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::QuotaExceeded(decision) => decision
                .reason
                .map(|r| r.code())
                .unwrap_or("quota_exceeded"),
            Self::UploadRejected { reason, .. } => reason.code(),
            Self::Unavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
            Self::Ai(AiError::NotConfigured(_)) => "ai_backend_not_configured",
            Self::Ai(_) => "ai_provider_error",
            Self::Quota(QuotaError::Timeout { .. }) => "timeout",
            Self::Quota(QuotaError::NotFound(_)) => "not_found",
            Self::Quota(QuotaError::Internal(_)) => "internal_error",
            Self::Quota(_) => "service_unavailable",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UploadRejected { reason, .. } => match reason {
                DenyReason::DailyLimitReached | DenyReason::MonthlyLimitReached => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                DenyReason::DuplicateUpload => StatusCode::CONFLICT,
                DenyReason::UnsupportedFileType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                DenyReason::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            },
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ai(e) => match e {
                AiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Quota(e) => match e {
                QuotaError::NotFound(_) => StatusCode::NOT_FOUND,
                QuotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                QuotaError::StorageUnavailable(_)
                | QuotaError::Timeout { .. }
                | QuotaError::IdentityCreationConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::Database(_) | MetadataError::Io(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn quota(&self) -> Option<&QuotaDecision> {
        match self {
            Self::QuotaExceeded(decision) => Some(decision),
            Self::UploadRejected { quota, .. } => quota.as_ref(),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request failed");
        }

        let quota = self.quota();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            resets_at: quota.map(|q| q.resets_at),
            used: quota.map(|q| q.used),
            remaining: quota.map(|q| q.remaining),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
