//! HTTP API server for Hodie.
//!
//! This crate provides the client-facing surface of the quota service:
//! - Bearer token verification and client resolution
//! - Quota-gated AI chat
//! - Health document uploads and analysis
//! - Usage reporting
//! - Admin endpoints (tier changes, deactivation)

pub mod ai;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
