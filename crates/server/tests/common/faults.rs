//! Metadata store wrapper that injects failures.

use async_trait::async_trait;
use hodie_metadata::repos::{ClientRepo, UploadRecordRepo, UsageRepo};
use hodie_metadata::{
    ClientRow, MetadataError, MetadataResult, MetadataStore, UploadRecordRow, UsageCounterRow,
    UsageKey,
};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;

#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// Return a storage error immediately.
    Fail,
    /// Never answer.
    Stall,
}

#[allow(dead_code)]
#[derive(Default)]
struct Faults {
    usage_reads: Fault,
    usage_writes: Fault,
    upload_writes: Fault,
}

/// Passes everything through to `inner` except the operation groups that
/// have a fault set.
///
/// `upload_writes` covers upload record inserts, status transitions and the
/// lifetime upload counter.
#[allow(dead_code)]
pub struct FaultyMetadata {
    inner: Arc<dyn MetadataStore>,
    faults: Mutex<Faults>,
}

#[allow(dead_code)]
impl FaultyMetadata {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn set_usage_reads(&self, fault: Fault) {
        self.faults.lock().unwrap().usage_reads = fault;
    }

    pub fn set_usage_writes(&self, fault: Fault) {
        self.faults.lock().unwrap().usage_writes = fault;
    }

    pub fn set_upload_writes(&self, fault: Fault) {
        self.faults.lock().unwrap().upload_writes = fault;
    }

    async fn gate(&self, pick: fn(&Faults) -> Fault) -> MetadataResult<()> {
        let fault = pick(&self.faults.lock().unwrap());
        match fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(MetadataError::Io(std::io::Error::other(
                "metadata store unavailable",
            ))),
            Fault::Stall => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ClientRepo for FaultyMetadata {
    async fn get_client(&self, client_id: &str) -> MetadataResult<Option<ClientRow>> {
        self.inner.get_client(client_id).await
    }

    async fn get_client_by_subject(&self, auth_subject: &str) -> MetadataResult<Option<ClientRow>> {
        self.inner.get_client_by_subject(auth_subject).await
    }

    async fn next_client_sequence(&self, prefix: &str) -> MetadataResult<i64> {
        self.inner.next_client_sequence(prefix).await
    }

    async fn insert_client(&self, client: &ClientRow) -> MetadataResult<()> {
        self.inner.insert_client(client).await
    }

    async fn update_client_tier(
        &self,
        client_id: &str,
        tier: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ClientRow> {
        self.inner.update_client_tier(client_id, tier, updated_at).await
    }

    async fn update_client_email(
        &self,
        client_id: &str,
        email: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ClientRow> {
        self.inner.update_client_email(client_id, email, updated_at).await
    }

    async fn deactivate_client(
        &self,
        client_id: &str,
        at: OffsetDateTime,
    ) -> MetadataResult<ClientRow> {
        self.inner.deactivate_client(client_id, at).await
    }

    async fn increment_uploads_made(
        &self,
        client_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<i64> {
        self.gate(|f| f.upload_writes).await?;
        self.inner.increment_uploads_made(client_id, updated_at).await
    }
}

#[async_trait]
impl UsageRepo for FaultyMetadata {
    async fn increment_usage(
        &self,
        key: &UsageKey,
        amount: i64,
        tokens: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<UsageCounterRow> {
        self.gate(|f| f.usage_writes).await?;
        self.inner
            .increment_usage(key, amount, tokens, updated_at)
            .await
    }

    async fn get_usage(&self, key: &UsageKey) -> MetadataResult<Option<UsageCounterRow>> {
        self.gate(|f| f.usage_reads).await?;
        self.inner.get_usage(key).await
    }

    async fn list_usage(&self, client_id: &str) -> MetadataResult<Vec<UsageCounterRow>> {
        self.gate(|f| f.usage_reads).await?;
        self.inner.list_usage(client_id).await
    }
}

#[async_trait]
impl UploadRecordRepo for FaultyMetadata {
    async fn create_upload_record(&self, record: &UploadRecordRow) -> MetadataResult<()> {
        self.gate(|f| f.upload_writes).await?;
        self.inner.create_upload_record(record).await
    }

    async fn get_upload_record(&self, upload_id: Uuid) -> MetadataResult<Option<UploadRecordRow>> {
        self.inner.get_upload_record(upload_id).await
    }

    async fn find_active_upload_by_hash(
        &self,
        client_id: &str,
        content_hash: &str,
    ) -> MetadataResult<Option<UploadRecordRow>> {
        self.inner
            .find_active_upload_by_hash(client_id, content_hash)
            .await
    }

    async fn update_upload_status(
        &self,
        upload_id: Uuid,
        from: &str,
        to: &str,
        error_detail: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.gate(|f| f.upload_writes).await?;
        self.inner
            .update_upload_status(upload_id, from, to, error_detail, updated_at)
            .await
    }

    async fn list_upload_records(
        &self,
        client_id: &str,
        limit: u32,
    ) -> MetadataResult<Vec<UploadRecordRow>> {
        self.inner.list_upload_records(client_id, limit).await
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
