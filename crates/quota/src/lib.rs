//! Quota enforcement for Hodie.
//!
//! This crate turns configuration and the shared metadata store into the
//! per-request decisions the HTTP layer needs:
//! - [`IdentityResolver`] maps a verified auth subject to a durable client
//! - [`TierRouter`] picks the AI backend and ceilings for a tier
//! - [`QuotaStore`] answers read-only "may this client do one more?" checks
//! - [`UsageTracker`] commits completed work and reports usage
//! - [`UploadGuard`] admits or rejects uploads
//!
//! Every store round trip is bounded by the configured operation timeout.

pub mod clock;
pub mod error;
pub mod identity;
pub mod quota_store;
pub mod tier_router;
pub mod upload_guard;
pub mod usage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QuotaError, QuotaResult, within};
pub use identity::{IdentityResolver, Resolution};
pub use quota_store::QuotaStore;
pub use tier_router::{Limit, Route, TierRouter};
pub use upload_guard::{UploadCandidate, UploadGuard};
pub use usage::{CommitOutcome, OverAdmission, UsageReport, UsageTracker};

use hodie_core::config::AppConfig;
use hodie_metadata::MetadataStore;
use std::sync::Arc;

/// All quota components wired to one store and clock.
pub struct QuotaEngine {
    pub identity: IdentityResolver,
    pub router: TierRouter,
    pub quota: Arc<QuotaStore>,
    pub usage: UsageTracker,
    pub uploads: UploadGuard,
    clock: Arc<dyn Clock>,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        let timeout = config.quota.operation_timeout();
        let quota = Arc::new(QuotaStore::new(store.clone(), timeout));

        Self {
            identity: IdentityResolver::new(
                store.clone(),
                clock.clone(),
                config.identity.client_id_prefix.clone(),
                config.identity.max_create_attempts,
                timeout,
            ),
            router: TierRouter::new(&config.quota),
            usage: UsageTracker::new(store.clone(), quota.clone(), clock.clone(), timeout),
            uploads: UploadGuard::new(
                store,
                quota.clone(),
                clock.clone(),
                config.uploads.clone(),
                timeout,
            ),
            quota,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
