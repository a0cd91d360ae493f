//! Quota-gated AI chat.

use crate::ai::ChatRequest;
use crate::auth::{require_identity, resolve_client};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{QuotaSnapshot, call_ai, check_ai_quota, commit_usage, read_json};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use hodie_core::{AiBackend, CounterKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    pub backend: AiBackend,
    pub tokens_used: u64,
    /// Position in the tightest AI-message window after this message.
    pub quota: QuotaSnapshot,
}

/// POST /v1/chat - Send a conversation to the client's tier backend.
///
/// The message counts against the AI quota only once the provider has
/// answered; a provider failure leaves usage untouched.
pub async fn chat(State(state): State<AppState>, req: Request) -> ApiResult<Json<ChatResponse>> {
    let identity = require_identity(&req)?;
    let body: ChatRequest = read_json(req, state.config.server.max_json_body_bytes).await?;
    body.validate().map_err(ApiError::BadRequest)?;

    let client = resolve_client(&state, &identity).await?;
    let route = state.quota.router.route(&client.tier);
    let limits = route.limits(CounterKind::AiMessages, state.now())?;
    let decision = check_ai_quota(&state, &client.client_id, &limits).await?;

    let reply = call_ai(&state, &route, &body).await?;
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
        backend = %route.backend,
        model = %reply.model,
        tokens_used = reply.tokens_used,
        "Chat completed"
    );

    Ok(Json(ChatResponse {
        reply: reply.content,
        model: reply.model,
        backend: route.backend,
        tokens_used: reply.tokens_used,
        quota: QuotaSnapshot::after_commit(&decision),
    }))
}
