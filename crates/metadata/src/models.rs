//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use hodie_core::{
    Client, ClientId, ContentHash, CounterKind, PeriodKind, UploadCategory, UploadRecord,
    UploadStatus, UsageCounter,
};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Clients
// =============================================================================

/// Client identity record. One row per external auth subject.
#[derive(Debug, Clone, FromRow)]
pub struct ClientRow {
    pub client_id: String,
    pub auth_subject: String,
    pub email: Option<String>,
    pub tier: String,
    pub uploads_made: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deactivated_at: Option<OffsetDateTime>,
}

impl ClientRow {
    /// Row for a newly allocated client on the default tier.
    pub fn new_client(
        client_id: &ClientId,
        auth_subject: &str,
        email: Option<&str>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            client_id: client_id.as_str().to_string(),
            auth_subject: auth_subject.to_string(),
            email: email.map(str::to_string),
            tier: hodie_core::Tier::default().as_str().to_string(),
            uploads_made: 0,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        }
    }

    pub fn into_client(self) -> MetadataResult<Client> {
        Ok(Client {
            client_id: ClientId::parse(&self.client_id).map_err(MetadataError::corrupt)?,
            auth_subject: self.auth_subject,
            email: self.email,
            tier: self.tier,
            uploads_made: non_negative(self.uploads_made),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deactivated_at: self.deactivated_at,
        })
    }
}

// =============================================================================
// Usage counters
// =============================================================================

/// Key of one usage counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageKey {
    pub client_id: String,
    pub counter_kind: String,
    pub period: String,
    pub period_start: OffsetDateTime,
}

impl UsageKey {
    pub fn new(
        client_id: &ClientId,
        counter_kind: CounterKind,
        period: PeriodKind,
        period_start: OffsetDateTime,
    ) -> Self {
        Self {
            client_id: client_id.as_str().to_string(),
            counter_kind: counter_kind.as_str().to_string(),
            period: period.as_str().to_string(),
            period_start,
        }
    }
}

/// Per-period usage counter.
#[derive(Debug, Clone, FromRow)]
pub struct UsageCounterRow {
    pub client_id: String,
    pub counter_kind: String,
    pub period: String,
    pub period_start: OffsetDateTime,
    pub count: i64,
    pub tokens_used: i64,
    pub updated_at: OffsetDateTime,
}

impl UsageCounterRow {
    pub fn into_counter(self) -> MetadataResult<UsageCounter> {
        Ok(UsageCounter {
            client_id: ClientId::parse(&self.client_id).map_err(MetadataError::corrupt)?,
            counter_kind: CounterKind::parse(&self.counter_kind).map_err(MetadataError::corrupt)?,
            period: PeriodKind::parse(&self.period).map_err(MetadataError::corrupt)?,
            period_start: self.period_start,
            count: non_negative(self.count),
            tokens_used: non_negative(self.tokens_used),
        })
    }
}

// =============================================================================
// Upload records
// =============================================================================

/// Stored upload and its processing status.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRecordRow {
    pub upload_id: Uuid,
    pub client_id: String,
    pub content_hash: String,
    pub file_name: String,
    pub content_type: String,
    pub category: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub status: String,
    pub error_detail: Option<String>,
    pub uploaded_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadRecordRow {
    pub fn from_record(record: &UploadRecord) -> Self {
        Self {
            upload_id: record.upload_id,
            client_id: record.client_id.as_str().to_string(),
            content_hash: record.content_hash.to_hex(),
            file_name: record.file_name.clone(),
            content_type: record.content_type.clone(),
            category: record.category.as_str().to_string(),
            size_bytes: i64::try_from(record.size_bytes).unwrap_or(i64::MAX),
            object_key: record.object_key.clone(),
            status: record.status.as_str().to_string(),
            error_detail: record.error_detail.clone(),
            uploaded_at: record.uploaded_at,
            updated_at: record.updated_at,
        }
    }

    pub fn into_record(self) -> MetadataResult<UploadRecord> {
        Ok(UploadRecord {
            upload_id: self.upload_id,
            client_id: ClientId::parse(&self.client_id).map_err(MetadataError::corrupt)?,
            content_hash: ContentHash::from_hex(&self.content_hash)
                .map_err(MetadataError::corrupt)?,
            file_name: self.file_name,
            content_type: self.content_type,
            category: UploadCategory::parse(&self.category).map_err(MetadataError::corrupt)?,
            size_bytes: non_negative(self.size_bytes),
            object_key: self.object_key,
            status: UploadStatus::parse(&self.status).map_err(MetadataError::corrupt)?,
            error_detail: self.error_detail,
            uploaded_at: self.uploaded_at,
            updated_at: self.updated_at,
        })
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
