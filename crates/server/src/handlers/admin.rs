//! Administrative endpoints.
//!
//! Tier changes normally arrive from the subscription system; these
//! endpoints let an operator inspect and correct a client by hand.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use hodie_core::{Client, ClientId, Tier, UsageCounter};
use hodie_metadata::UsageCounterRow;
use hodie_metadata::repos::{ClientRepo, UsageRepo};
use hodie_quota::Route;
use serde::{Deserialize, Serialize};

/// A client together with the policy its tier resolves to.
#[derive(Debug, Serialize)]
pub struct AdminClientResponse {
    pub client: Client,
    pub route: Route,
    /// Every stored counter, most recent periods first. Only on GET.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Vec<UsageCounter>>,
}

impl AdminClientResponse {
    fn new(state: &AppState, client: Client) -> Self {
        let route = state.quota.router.route(&client.tier);
        Self {
            client,
            route,
            usage: None,
        }
    }
}

fn parse_client_id(raw: &str) -> ApiResult<ClientId> {
    ClientId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// GET /v1/admin/clients/{client_id} - Inspect a client and its counters.
pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AdminClientResponse>> {
    require_admin(&req)?;
    let client_id = parse_client_id(&client_id)?;

    let client = state
        .metadata
        .get_client(client_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {client_id}")))?
        .into_client()?;
    let usage = state
        .metadata
        .list_usage(client_id.as_str())
        .await?
        .into_iter()
        .map(UsageCounterRow::into_counter)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(AdminClientResponse {
        usage: Some(usage),
        ..AdminClientResponse::new(&state, client)
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetTierRequest {
    pub tier: String,
}

/// PUT /v1/admin/clients/{client_id}/tier - Change a client's tier.
///
/// Takes effect on the client's next request; usage already counted in the
/// current windows is kept and judged against the new ceilings.
pub async fn set_client_tier(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AdminClientResponse>> {
    require_admin(&req)?;
    let client_id = parse_client_id(&client_id)?;
    let body: SetTierRequest = read_json(req, state.config.server.max_json_body_bytes).await?;
    let tier = Tier::parse(&body.tier)?;

    let client = state
        .metadata
        .update_client_tier(client_id.as_str(), tier.as_str(), state.now())
        .await?
        .into_client()?;
    tracing::info!(client_id = %client_id, tier = %tier, "Client tier changed");

    Ok(Json(AdminClientResponse::new(&state, client)))
}

/// POST /v1/admin/clients/{client_id}/deactivate - Soft-deactivate a client.
///
/// The record and its ID are kept; the client's requests are refused.
pub async fn deactivate_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AdminClientResponse>> {
    require_admin(&req)?;
    let client_id = parse_client_id(&client_id)?;

    let client = state
        .metadata
        .deactivate_client(client_id.as_str(), state.now())
        .await?
        .into_client()?;
    tracing::info!(client_id = %client_id, "Client deactivated");

    Ok(Json(AdminClientResponse::new(&state, client)))
}
