//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::metrics::CLIENTS_CREATED;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use hodie_core::config::AuthConfig;
use hodie_core::{Client, VerifiedIdentity};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Request header read for correlation and echoed on every response.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, truncated to
    /// `MAX_TRACE_ID_LEN` characters with non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turns a raw bearer token into a verified identity.
///
/// Production deployments verify identity-provider tokens behind this trait;
/// the server only ever sees the resulting subject and email.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, raw_token: &str) -> Option<VerifiedIdentity>;
}

/// Verifier backed by the `auth.tokens` table of SHA-256 token hashes.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    by_hash: HashMap<String, VerifiedIdentity>,
}

impl StaticTokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let by_hash = config
            .tokens
            .iter()
            .map(|t| {
                (
                    t.token_hash.to_ascii_lowercase(),
                    VerifiedIdentity {
                        subject: t.subject.clone(),
                        email: t.email.clone(),
                    },
                )
            })
            .collect();
        Self { by_hash }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, raw_token: &str) -> Option<VerifiedIdentity> {
        self.by_hash.get(&hash_token(raw_token)).cloned()
    }
}

/// Request extension set when the bearer token verified to an identity.
#[derive(Clone, Debug)]
pub struct AuthenticatedIdentity(pub VerifiedIdentity);

/// Request extension set when the bearer token is the admin token.
#[derive(Clone, Copy, Debug)]
pub struct AdminAccess;

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|t| !t.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex of a raw token.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Authentication middleware that verifies tokens and sets up trace context.
///
/// Never rejects on its own: handlers decide whether they need a client or
/// the admin, so unauthenticated endpoints keep working.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);

    if let Some(token) = extract_bearer_token(&req).map(str::to_string) {
        let token_hash = hash_token(&token);
        if token_hash.eq_ignore_ascii_case(&state.config.admin.token_hash) {
            req.extensions_mut().insert(AdminAccess);
        } else if let Some(identity) = state.verifier.verify(&token).await {
            req.extensions_mut().insert(AuthenticatedIdentity(identity));
        } else {
            tracing::debug!(trace_id = %trace_id, "Bearer token did not verify");
        }
    }

    let mut response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id))
        .await;
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Require a verified identity (token must be present and valid).
pub fn require_identity(req: &Request) -> ApiResult<VerifiedIdentity> {
    match req.extensions().get::<AuthenticatedIdentity>() {
        Some(AuthenticatedIdentity(identity)) => Ok(identity.clone()),
        None if extract_bearer_token(req).is_some() => {
            Err(ApiError::Unauthorized("invalid bearer token".to_string()))
        }
        None => Err(ApiError::Unauthorized(
            "authentication required".to_string(),
        )),
    }
}

/// Require the admin token.
pub fn require_admin(req: &Request) -> ApiResult<()> {
    if req.extensions().get::<AdminAccess>().is_some() {
        return Ok(());
    }
    if extract_bearer_token(req).is_some() {
        Err(ApiError::Forbidden("admin token required".to_string()))
    } else {
        Err(ApiError::Unauthorized(
            "authentication required".to_string(),
        ))
    }
}

/// Resolve a verified identity to its client, creating it on first sight.
///
/// Deactivated clients are refused with 403.
pub async fn resolve_client(state: &AppState, identity: &VerifiedIdentity) -> ApiResult<Client> {
    let resolution = state.quota.identity.resolve(identity).await?;
    if resolution.created {
        CLIENTS_CREATED.inc();
    }
    let client = resolution.client;
    if !client.is_active() {
        tracing::info!(client_id = %client.client_id, "Refusing request from deactivated client");
        return Err(ApiError::Forbidden("client is deactivated".to_string()));
    }
    Ok(client)
}
