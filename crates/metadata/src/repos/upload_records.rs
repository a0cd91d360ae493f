//! Upload record repository.

use crate::error::MetadataResult;
use crate::models::UploadRecordRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload records.
#[async_trait]
pub trait UploadRecordRepo: Send + Sync {
    /// Insert a new record.
    ///
    /// Returns `AlreadyExists` if the client already has a non-failed record
    /// with the same content hash.
    async fn create_upload_record(&self, record: &UploadRecordRow) -> MetadataResult<()>;

    /// Get a record by ID.
    async fn get_upload_record(&self, upload_id: Uuid) -> MetadataResult<Option<UploadRecordRow>>;

    /// Find the client's non-failed record for a content hash, if any.
    async fn find_active_upload_by_hash(
        &self,
        client_id: &str,
        content_hash: &str,
    ) -> MetadataResult<Option<UploadRecordRow>>;

    /// Move a record from `from` to `to`.
    ///
    /// Returns false without changing anything if the record is not currently
    /// in `from` (for example, a concurrent request already finished it).
    async fn update_upload_status(
        &self,
        upload_id: Uuid,
        from: &str,
        to: &str,
        error_detail: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// A client's records, newest first.
    async fn list_upload_records(
        &self,
        client_id: &str,
        limit: u32,
    ) -> MetadataResult<Vec<UploadRecordRow>>;
}
