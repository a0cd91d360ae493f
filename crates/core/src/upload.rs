//! Upload categories, record lifecycle and admission decisions.

use crate::client::ClientId;
use crate::hash::ContentHash;
use crate::usage::{DenyReason, QuotaDecision};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Declared category of an uploaded health document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadCategory {
    LabResults,
    Genetic,
    Wearable,
    MedicalRecord,
    Other,
}

impl UploadCategory {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "lab_results" => Ok(Self::LabResults),
            "genetic" => Ok(Self::Genetic),
            "wearable" => Ok(Self::Wearable),
            "medical_record" => Ok(Self::MedicalRecord),
            "other" => Ok(Self::Other),
            _ => Err(crate::Error::UnknownCategory(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LabResults => "lab_results",
            Self::Genetic => "genetic",
            Self::Wearable => "wearable",
            Self::MedicalRecord => "medical_record",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upload record status.
///
/// Records start in `Processing` once the bytes are durably stored and move
/// exactly once to `Completed` or `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(crate::Error::InvalidUploadStatus(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Completed) | (Self::Processing, Self::Failed)
        )
    }

    /// Whether a record in this status blocks re-upload of the same bytes.
    pub fn blocks_duplicates(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored upload, owned by one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub upload_id: Uuid,
    pub client_id: ClientId,
    pub content_hash: ContentHash,
    pub file_name: String,
    pub content_type: String,
    pub category: UploadCategory,
    pub size_bytes: u64,
    /// Key of the stored bytes in the object store.
    #[serde(skip)]
    pub object_key: String,
    pub status: UploadStatus,
    pub error_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadRecord {
    /// Object key under which an upload's bytes are stored.
    ///
    /// Keys are content-addressed per client, so re-uploading bytes after a
    /// failed analysis overwrites the same object.
    pub fn object_key_for(client_id: &ClientId, content_hash: &ContentHash) -> String {
        format!("uploads/{}/{}", client_id, content_hash.to_hex())
    }
}

/// Outcome of upload admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadDecision {
    pub accepted: bool,
    pub reason: Option<DenyReason>,
    /// Present once the bytes have been hashed (i.e. the cheap checks passed).
    pub content_hash: Option<ContentHash>,
    /// Daily upload quota state, present once the count was read.
    pub quota: Option<QuotaDecision>,
    pub message: String,
}

impl UploadDecision {
    pub fn accept(content_hash: ContentHash, quota: QuotaDecision) -> Self {
        Self {
            accepted: true,
            reason: None,
            content_hash: Some(content_hash),
            message: quota.message(),
            quota: Some(quota),
        }
    }

    pub fn reject(reason: DenyReason, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            content_hash: None,
            quota: None,
            message: message.into(),
        }
    }
}
