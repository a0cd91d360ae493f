//! Shared handler helpers.

use crate::ai::{ChatReply, ChatRequest};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{AI_ERRORS, AI_REQUEST_DURATION, record_commit, record_decision};
use crate::state::AppState;
use axum::extract::Request;
use hodie_core::{ClientId, CounterKind, PeriodKind, QuotaDecision};
use hodie_quota::{CommitOutcome, Limit, Route};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Instant;
use time::OffsetDateTime;

/// Read and parse a JSON body of at most `limit` bytes.
pub async fn read_json<T: DeserializeOwned>(req: Request, limit: usize) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Like [`read_json`], but an empty body yields `T::default()`.
pub async fn read_optional_json<T: DeserializeOwned + Default>(
    req: Request,
    limit: usize,
) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Check every AI-message limit; a denial becomes a 429.
///
/// Store failures propagate and fail the request closed.
pub async fn check_ai_quota(
    state: &AppState,
    client_id: &ClientId,
    limits: &[Limit],
) -> ApiResult<QuotaDecision> {
    let decision = state
        .quota
        .quota
        .check_all(client_id, CounterKind::AiMessages, limits)
        .await?;
    record_decision(&decision);
    if !decision.allowed {
        tracing::info!(
            client_id = %client_id,
            period = %decision.period,
            used = decision.used,
            ceiling = decision.ceiling,
            "AI request denied by quota"
        );
        return Err(ApiError::QuotaExceeded(decision));
    }
    Ok(decision)
}

/// Forward a request to the routed backend, recording latency and failures.
pub async fn call_ai(state: &AppState, route: &Route, request: &ChatRequest) -> ApiResult<ChatReply> {
    let backend = route.backend.as_str();
    let started = Instant::now();
    let result = state.ai.complete(route, request).await;
    AI_REQUEST_DURATION
        .with_label_values(&[backend])
        .observe(started.elapsed().as_secs_f64());

    result.map_err(|e| {
        AI_ERRORS.with_label_values(&[backend]).inc();
        tracing::warn!(backend = %backend, model = %route.model, error = %e, "AI provider call failed");
        ApiError::from(e)
    })
}

/// Commit one unit of completed work and surface race/failure metrics.
pub async fn commit_usage(
    state: &AppState,
    client_id: &ClientId,
    kind: CounterKind,
    tokens: u64,
    limits: &[Limit],
) -> CommitOutcome {
    let outcome = state.quota.usage.record(client_id, kind, tokens, limits).await;
    record_commit(kind, &outcome);
    outcome
}

/// Quota position reported alongside a successful response.
#[derive(Debug, Serialize)]
pub struct QuotaSnapshot {
    pub period: PeriodKind,
    pub used: u64,
    pub ceiling: u64,
    pub remaining: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub resets_at: OffsetDateTime,
}

impl QuotaSnapshot {
    /// Position after one unit was committed against the checked decision.
    pub fn after_commit(decision: &QuotaDecision) -> Self {
        Self {
            period: decision.period,
            used: decision.used.saturating_add(1),
            ceiling: decision.ceiling,
            remaining: decision.remaining.saturating_sub(1),
            resets_at: decision.resets_at,
        }
    }
}
