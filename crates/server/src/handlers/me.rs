//! Endpoints describing the calling client.

use crate::auth::{require_identity, resolve_client};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json;
use crate::metrics::USAGE_SUMMARIES_DEGRADED;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use hodie_core::ClientId;
use hodie_metadata::repos::ClientRepo;
use hodie_quota::{Route, UsageReport};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Longest email address accepted (RFC 5321 path limit).
const MAX_EMAIL_LEN: usize = 254;

/// Client profile as seen by the client.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub client_id: ClientId,
    pub email: Option<String>,
    /// Tier string as stored.
    pub tier: String,
    /// Policy actually applied for that tier.
    pub route: Route,
    pub uploads_made: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// GET /v1/me - The calling client, created on first call.
pub async fn get_me(State(state): State<AppState>, req: Request) -> ApiResult<Json<MeResponse>> {
    let identity = require_identity(&req)?;
    let client = resolve_client(&state, &identity).await?;
    let route = state.quota.router.route(&client.tier);

    Ok(Json(MeResponse {
        client_id: client.client_id,
        email: client.email,
        tier: client.tier,
        route,
        uploads_made: client.uploads_made,
        created_at: client.created_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEmailRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// PUT /v1/me/email - Replace (or clear) the stored contact email.
pub async fn update_email(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<MeResponse>> {
    let identity = require_identity(&req)?;
    let body: UpdateEmailRequest = read_json(req, state.config.server.max_json_body_bytes).await?;
    let email = normalize_email(body.email)?;

    let client = resolve_client(&state, &identity).await?;
    let row = state
        .metadata
        .update_client_email(client.client_id.as_str(), email.as_deref(), state.now())
        .await?;
    let client = row.into_client()?;
    tracing::info!(client_id = %client.client_id, cleared = email.is_none(), "Client email updated");

    let route = state.quota.router.route(&client.tier);
    Ok(Json(MeResponse {
        client_id: client.client_id,
        email: client.email,
        tier: client.tier,
        route,
        uploads_made: client.uploads_made,
        created_at: client.created_at,
    }))
}

fn normalize_email(email: Option<String>) -> ApiResult<Option<String>> {
    let Some(email) = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    if email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::BadRequest(format!(
            "email must be at most {MAX_EMAIL_LEN} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Some(email)),
        _ => Err(ApiError::BadRequest("email is not a valid address".to_string())),
    }
}

/// Current usage against the client's ceilings.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub client_id: ClientId,
    pub effective_tier: hodie_core::Tier,
    /// Set when at least one counter could not be read and is shown as zero.
    pub degraded: bool,
    #[serde(flatten)]
    pub report: UsageReport,
}

/// GET /v1/usage - Read-only usage summary.
pub async fn get_usage(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UsageResponse>> {
    let identity = require_identity(&req)?;
    let client = resolve_client(&state, &identity).await?;
    let route = state.quota.router.route(&client.tier);

    let report = state.quota.usage.summarize(&client.client_id, &route).await?;
    let degraded = report.degraded();
    if degraded {
        USAGE_SUMMARIES_DEGRADED.inc();
    }

    Ok(Json(UsageResponse {
        client_id: client.client_id,
        effective_tier: route.effective_tier,
        degraded,
        report,
    }))
}
