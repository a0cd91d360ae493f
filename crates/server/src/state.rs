//! Application state shared across handlers.

use crate::ai::AiGateway;
use crate::auth::TokenVerifier;
use hodie_core::config::AppConfig;
use hodie_metadata::MetadataStore;
use hodie_quota::{Clock, QuotaEngine};
use hodie_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload byte storage.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Identity, routing, quota and usage components.
    pub quota: Arc<QuotaEngine>,
    /// Bearer token verification.
    pub verifier: Arc<dyn TokenVerifier>,
    /// AI provider gateway.
    pub ai: Arc<dyn AiGateway>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Configuration is expected to have been validated by the caller.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        verifier: Arc<dyn TokenVerifier>,
        ai: Arc<dyn AiGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = Arc::new(QuotaEngine::new(metadata.clone(), clock, &config));
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            quota,
            verifier,
            ai,
        }
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> OffsetDateTime {
        self.quota.clock().now()
    }
}
