//! Upload admission: size, type, duplicate and daily-count rules.

use crate::clock::Clock;
use crate::error::{QuotaResult, bounded};
use crate::quota_store::QuotaStore;
use hodie_core::config::UploadConfig;
use hodie_core::{
    ClientId, ContentHash, CounterKind, DenyReason, PeriodWindow, UploadCategory, UploadDecision,
};
use hodie_metadata::MetadataStore;
use hodie_metadata::repos::UploadRecordRepo;
use std::sync::Arc;
use std::time::Duration;

/// An upload as received, before admission.
#[derive(Clone, Copy, Debug)]
pub struct UploadCandidate<'a> {
    pub bytes: &'a [u8],
    pub content_type: &'a str,
    pub file_name: &'a str,
    pub category: UploadCategory,
}

/// Decides whether an upload may be accepted.
///
/// Admission never writes. The caller stores the bytes, creates the upload
/// record, and commits the upload counter only after the bytes are durable.
pub struct UploadGuard {
    store: Arc<dyn MetadataStore>,
    quota: Arc<QuotaStore>,
    clock: Arc<dyn Clock>,
    policy: UploadConfig,
    timeout: Duration,
}

impl UploadGuard {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        quota: Arc<QuotaStore>,
        clock: Arc<dyn Clock>,
        policy: UploadConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            quota,
            clock,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &UploadConfig {
        &self.policy
    }

    /// Admit or reject `upload` for `client_id` against `daily_ceiling`.
    ///
    /// Cheap checks (size, type) run before the bytes are hashed. Duplicates
    /// are detected by content hash alone; filename and category are ignored.
    pub async fn admit(
        &self,
        client_id: &ClientId,
        daily_ceiling: u64,
        upload: &UploadCandidate<'_>,
    ) -> QuotaResult<UploadDecision> {
        let size = upload.bytes.len() as u64;
        if size > self.policy.max_file_bytes {
            return Ok(UploadDecision::reject(
                DenyReason::FileTooLarge,
                format!(
                    "file is {size} bytes; the limit is {} bytes",
                    self.policy.max_file_bytes
                ),
            ));
        }
        if size == 0 {
            return Ok(UploadDecision::reject(
                DenyReason::UnsupportedFileType,
                "file is empty",
            ));
        }
        if !self.is_allowed_type(upload.content_type, upload.file_name) {
            return Ok(UploadDecision::reject(
                DenyReason::UnsupportedFileType,
                format!(
                    "content type '{}' with file name '{}' is not accepted",
                    upload.content_type, upload.file_name
                ),
            ));
        }

        let content_hash = ContentHash::compute(upload.bytes);

        let existing = bounded("duplicate check", self.timeout, async {
            Ok(self
                .store
                .find_active_upload_by_hash(client_id.as_str(), &content_hash.to_hex())
                .await?)
        })
        .await?;
        if let Some(existing) = existing {
            tracing::info!(
                client_id = %client_id,
                content_hash = %content_hash.short(),
                existing_upload_id = %existing.upload_id,
                "Duplicate upload rejected"
            );
            let mut decision = UploadDecision::reject(
                DenyReason::DuplicateUpload,
                format!(
                    "this file was already uploaded as '{}'",
                    existing.file_name
                ),
            );
            decision.content_hash = Some(content_hash);
            return Ok(decision);
        }

        let window = PeriodWindow::daily(self.clock.now())?;
        let quota = self
            .quota
            .check_and_reserve(client_id, CounterKind::Uploads, &window, daily_ceiling)
            .await?;
        if !quota.allowed {
            let mut decision = UploadDecision::reject(DenyReason::DailyLimitReached, quota.message());
            decision.content_hash = Some(content_hash);
            decision.quota = Some(quota);
            return Ok(decision);
        }

        Ok(UploadDecision::accept(content_hash, quota))
    }

    /// Content type (ignoring parameters) is on the allow-list, or the file
    /// extension is.
    fn is_allowed_type(&self, content_type: &str, file_name: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if self
            .policy
            .allowed_content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&essence))
        {
            return true;
        }

        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .policy
                .allowed_extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}
