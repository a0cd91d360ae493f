//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers and k8s liveness checks)
        .route("/v1/health", get(handlers::health_check))
        // Client endpoints
        .route("/v1/me", get(handlers::get_me))
        .route("/v1/me/email", put(handlers::update_email))
        .route("/v1/usage", get(handlers::get_usage))
        .route("/v1/chat", post(handlers::chat))
        .route(
            "/v1/uploads",
            post(handlers::create_upload).get(handlers::list_uploads),
        )
        .route("/v1/uploads/{upload_id}", get(handlers::get_upload))
        .route(
            "/v1/uploads/{upload_id}/analyze",
            post(handlers::analyze_upload),
        )
        // Admin endpoints (admin token only)
        .route("/v1/admin/clients/{client_id}", get(handlers::get_client))
        .route(
            "/v1/admin/clients/{client_id}/tier",
            put(handlers::set_client_tier),
        )
        .route(
            "/v1/admin/clients/{client_id}/deactivate",
            post(handlers::deactivate_client),
        );

    let mut router = Router::new().merge(api_routes);

    // SECURITY: when enabled, restrict this endpoint to the Prometheus
    // scraper at the network level. See crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
