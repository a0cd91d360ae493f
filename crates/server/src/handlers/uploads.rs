//! Health document uploads and their AI analysis.
//!
//! An upload goes through admission (size, type, duplicate, daily count),
//! then its bytes are stored before the record is created. The daily upload
//! counter is committed last, once the record exists. Analysis moves a
//! record from `processing` to `completed` or `failed` exactly once and only
//! counts an AI message for the request that made that move after the
//! provider answered.

use crate::ai::ChatRequest;
use crate::auth::{require_identity, resolve_client};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    QuotaSnapshot, call_ai, check_ai_quota, commit_usage, read_optional_json,
};
use crate::metrics::{QUOTA_DENIALS, UPLOAD_BYTES, UPLOADS_ACCEPTED, record_decision};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hodie_core::{
    AiBackend, Client, CounterKind, DenyReason, UploadCategory, UploadDecision, UploadRecord,
    UploadStatus,
};
use hodie_metadata::repos::{ClientRepo, UploadRecordRepo};
use hodie_metadata::{MetadataError, UploadRecordRow};
use hodie_quota::{QuotaError, UploadCandidate, within};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest file name kept on a record.
const MAX_FILE_NAME_LEN: usize = 255;

/// Default and maximum page sizes for listing.
const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

/// Characters of document text forwarded to the AI backend.
const MAX_ANALYSIS_CHARS: usize = 100_000;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a health data assistant. Summarize the uploaded \
document for its owner in plain language, point out values outside typical reference ranges, \
and suggest questions to raise with a clinician. Do not diagnose.";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub upload: UploadRecord,
    /// Lifetime upload count after this upload.
    pub uploads_made: u64,
    /// Position in the daily upload window after this upload.
    pub quota: Option<QuotaSnapshot>,
}

/// POST /v1/uploads?filename=..&category=.. - Store a document.
///
/// The request body is the raw file; `Content-Type` names its media type.
pub async fn create_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadQuery>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUploadResponse>)> {
    let identity = require_identity(&req)?;
    let file_name = sanitize_file_name(params.filename.as_deref())?;
    let category = match params.category.as_deref().map(str::trim) {
        None | Some("") => UploadCategory::Other,
        Some(c) => UploadCategory::parse(c)?,
    };
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let max_bytes = state.quota.uploads.policy().max_file_bytes;
    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared_len
        && len > max_bytes
    {
        return Err(reject(UploadDecision::reject(
            DenyReason::FileTooLarge,
            format!("file is {len} bytes; the limit is {max_bytes} bytes"),
        )));
    }

    // One byte over the limit so the guard can tell "too large" apart.
    let read_limit = usize::try_from(max_bytes.saturating_add(1)).unwrap_or(usize::MAX);
    let bytes = axum::body::to_bytes(req.into_body(), read_limit)
        .await
        .map_err(|e| {
            let e = e.into_inner();
            if is_length_limit(e.as_ref()) {
                reject(UploadDecision::reject(
                    DenyReason::FileTooLarge,
                    format!("file exceeds the limit of {max_bytes} bytes"),
                ))
            } else {
                tracing::debug!(error = %e, "Upload body could not be read");
                ApiError::BadRequest(format!("failed to read upload body: {e}"))
            }
        })?;

    let client = resolve_client(&state, &identity).await?;
    let route = state.quota.router.route(&client.tier);

    let candidate = UploadCandidate {
        bytes: &bytes,
        content_type: &content_type,
        file_name: &file_name,
        category,
    };
    let decision = state
        .quota
        .uploads
        .admit(&client.client_id, route.daily_uploads, &candidate)
        .await?;
    if let Some(quota) = &decision.quota {
        record_decision(quota);
    }
    if !decision.accepted {
        return Err(reject(decision));
    }
    let Some(content_hash) = decision.content_hash else {
        return Err(ApiError::Internal(
            "accepted upload has no content hash".to_string(),
        ));
    };

    let now = state.now();
    let size_bytes = bytes.len() as u64;
    let object_key = UploadRecord::object_key_for(&client.client_id, &content_hash);
    state.storage.put(&object_key, bytes).await?;

    let record = UploadRecord {
        upload_id: Uuid::new_v4(),
        client_id: client.client_id.clone(),
        content_hash,
        file_name,
        content_type,
        category,
        size_bytes,
        object_key,
        status: UploadStatus::Processing,
        error_detail: None,
        uploaded_at: now,
        updated_at: now,
    };
    let row = UploadRecordRow::from_record(&record);
    match within(
        "upload record insert",
        state.config.quota.operation_timeout(),
        state.metadata.create_upload_record(&row),
    )
    .await?
    {
        Ok(()) => {}
        Err(MetadataError::AlreadyExists(_)) => {
            // A concurrent request stored the same bytes first. The object is
            // shared and content-addressed, so it stays.
            return Err(reject(UploadDecision::reject(
                DenyReason::DuplicateUpload,
                "this file was already uploaded",
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let uploads_made = bump_uploads_made(&state, &client).await;
    let limits = route.limits(CounterKind::Uploads, now)?;
    commit_usage(&state, &client.client_id, CounterKind::Uploads, 0, &limits).await;

    UPLOADS_ACCEPTED
        .with_label_values(&[record.category.as_str()])
        .inc();
    UPLOAD_BYTES.inc_by(record.size_bytes);
    tracing::info!(
        client_id = %client.client_id,
        upload_id = %record.upload_id,
        content_hash = %record.content_hash.short(),
        category = %record.category,
        size_bytes = record.size_bytes,
        "Upload stored"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            quota: decision.quota.as_ref().map(QuotaSnapshot::after_commit),
            upload: record,
            uploads_made,
        }),
    ))
}

/// Increment the lifetime counter. The upload already exists, so a failure
/// is logged and the last known count returned.
async fn bump_uploads_made(state: &AppState, client: &Client) -> u64 {
    let bumped = within(
        "lifetime upload count",
        state.config.quota.operation_timeout(),
        state
            .metadata
            .increment_uploads_made(client.client_id.as_str(), state.now()),
    )
    .await
    .and_then(|r| r.map_err(QuotaError::from));
    match bumped {
        Ok(count) => u64::try_from(count).unwrap_or(0),
        Err(e) => {
            tracing::warn!(
                client_id = %client.client_id,
                error = %e,
                "Failed to increment lifetime upload count"
            );
            client.uploads_made
        }
    }
}

/// Whether a body read failed because it ran past the read limit.
fn is_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(err), |e| e.source()).any(|e| e.is::<LengthLimitError>())
}

fn reject(decision: UploadDecision) -> ApiError {
    let reason = decision.reason.unwrap_or(DenyReason::UnsupportedFileType);
    if decision.quota.is_none() {
        // Denials carrying a quota decision were already counted with it.
        QUOTA_DENIALS.with_label_values(&[reason.code()]).inc();
    }
    ApiError::UploadRejected {
        reason,
        message: decision.message,
        quota: decision.quota,
    }
}

/// Keep only the final path component, bounded in length.
fn sanitize_file_name(raw: Option<&str>) -> ApiResult<String> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest("filename is required".to_string()))?;
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILE_NAME_LEN)
        .collect::<String>();
    if base.is_empty() || base == "." || base == ".." {
        return Err(ApiError::BadRequest(format!(
            "filename '{raw}' has no usable name"
        )));
    }
    Ok(base)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListUploadsResponse {
    pub uploads: Vec<UploadRecord>,
}

/// GET /v1/uploads - The caller's uploads, newest first.
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
    req: Request,
) -> ApiResult<Json<ListUploadsResponse>> {
    let identity = require_identity(&req)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let client = resolve_client(&state, &identity).await?;
    let uploads = state
        .metadata
        .list_upload_records(client.client_id.as_str(), limit)
        .await?
        .into_iter()
        .map(UploadRecordRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ListUploadsResponse { uploads }))
}

/// GET /v1/uploads/{upload_id} - One of the caller's uploads.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<UploadRecord>> {
    let identity = require_identity(&req)?;
    let upload_id = parse_upload_id(&upload_id)?;
    let client = resolve_client(&state, &identity).await?;
    let record = load_owned_record(&state, &client, upload_id).await?;
    Ok(Json(record))
}

fn parse_upload_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid upload id: {raw}")))
}

/// Records owned by someone else are reported as missing.
async fn load_owned_record(
    state: &AppState,
    client: &Client,
    upload_id: Uuid,
) -> ApiResult<UploadRecord> {
    let not_found = || ApiError::NotFound(format!("upload {upload_id}"));
    let row = state
        .metadata
        .get_upload_record(upload_id)
        .await?
        .ok_or_else(not_found)?;
    if row.client_id != client.client_id.as_str() {
        return Err(not_found());
    }
    Ok(row.into_record()?)
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    /// Extra instructions appended to the document.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub upload: UploadRecord,
    pub analysis: String,
    pub model: String,
    pub backend: AiBackend,
    pub tokens_used: u64,
    pub quota: QuotaSnapshot,
}

/// POST /v1/uploads/{upload_id}/analyze - Analyze a processing upload.
///
/// Counts one AI message on success. On provider failure the record moves to
/// `failed`, which also frees its content hash for a fresh upload.
///
/// Two concurrent analyses of the same upload may both reach the provider,
/// but only the one that moves the record out of `processing` is charged;
/// the other gets a conflict.
pub async fn analyze_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AnalyzeResponse>> {
    let identity = require_identity(&req)?;
    let upload_id = parse_upload_id(&upload_id)?;
    let body: AnalyzeRequest =
        read_optional_json(req, state.config.server.max_json_body_bytes).await?;

    let client = resolve_client(&state, &identity).await?;
    let mut record = load_owned_record(&state, &client, upload_id).await?;
    if record.status != UploadStatus::Processing {
        return Err(ApiError::Conflict(format!(
            "upload {upload_id} is already {}",
            record.status
        )));
    }

    let route = state.quota.router.route(&client.tier);
    let limits = route.limits(CounterKind::AiMessages, state.now())?;
    let decision = check_ai_quota(&state, &client.client_id, &limits).await?;

    let bytes = state.storage.get(&record.object_key).await?;
    let request = ChatRequest::single(
        ANALYSIS_SYSTEM_PROMPT,
        analysis_prompt(&record, &bytes, body.prompt.as_deref()),
    );

    let reply = match call_ai(&state, &route, &request).await {
        Ok(reply) => reply,
        Err(e) => {
            let detail = e.to_string();
            finish(&state, &mut record, UploadStatus::Failed, Some(&detail)).await?;
            return Err(e);
        }
    };

    finish(&state, &mut record, UploadStatus::Completed, None).await?;
    commit_usage(
        &state,
        &client.client_id,
        CounterKind::AiMessages,
        reply.tokens_used,
        &limits,
    )
    .await;

    tracing::info!(
        client_id = %client.client_id,
        upload_id = %record.upload_id,
        model = %reply.model,
        tokens_used = reply.tokens_used,
        "Upload analyzed"
    );

    Ok(Json(AnalyzeResponse {
        upload: record,
        analysis: reply.content,
        model: reply.model,
        backend: route.backend,
        tokens_used: reply.tokens_used,
        quota: QuotaSnapshot::after_commit(&decision),
    }))
}

/// Move a processing record to its terminal status.
///
/// Losing the race to a concurrent analysis is reported as a conflict.
async fn finish(
    state: &AppState,
    record: &mut UploadRecord,
    to: UploadStatus,
    error_detail: Option<&str>,
) -> ApiResult<()> {
    let now = state.now();
    let moved = within(
        "upload status update",
        state.config.quota.operation_timeout(),
        state.metadata.update_upload_status(
            record.upload_id,
            UploadStatus::Processing.as_str(),
            to.as_str(),
            error_detail,
            now,
        ),
    )
    .await??;
    if !moved {
        tracing::warn!(
            upload_id = %record.upload_id,
            to = %to,
            "Upload was finished by a concurrent request"
        );
        return Err(ApiError::Conflict(format!(
            "upload {} was already finished",
            record.upload_id
        )));
    }
    record.status = to;
    record.error_detail = error_detail.map(str::to_string);
    record.updated_at = now;
    Ok(())
}

/// Document text when it is UTF-8, otherwise a description of the file.
fn analysis_prompt(record: &UploadRecord, bytes: &[u8], extra: Option<&str>) -> String {
    let mut prompt = format!(
        "File: {} ({}, category {})\n\n",
        record.file_name, record.content_type, record.category
    );
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            prompt.extend(text.chars().take(MAX_ANALYSIS_CHARS));
            if text.chars().nth(MAX_ANALYSIS_CHARS).is_some() {
                prompt.push_str("\n\n[document truncated]");
            }
        }
        Err(_) => {
            prompt.push_str(&format!(
                "The document is a {} byte binary file and its contents are not included. \
                 Describe what this kind of document usually contains and how to read it.",
                record.size_bytes
            ));
        }
    }
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}
