//! Read-only quota checks over per-period counters.
//!
//! Checks never increment. The caller does the work and then commits through
//! [`crate::UsageTracker`], so a request that fails downstream is not charged.
//! Two requests racing for the last slot can both pass; the resulting
//! over-admission is bounded by the number of concurrent requests and is
//! reported at commit time.

use crate::error::{QuotaError, QuotaResult, bounded};
use crate::tier_router::Limit;
use hodie_core::{ClientId, CounterKind, PeriodWindow, QuotaDecision};
use hodie_metadata::repos::UsageRepo;
use hodie_metadata::{MetadataStore, UsageKey};
use std::sync::Arc;
use std::time::Duration;

pub struct QuotaStore {
    store: Arc<dyn MetadataStore>,
    timeout: Duration,
}

impl QuotaStore {
    pub fn new(store: Arc<dyn MetadataStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Current count for a counter in `window`; zero if the row does not exist.
    pub async fn current_usage(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        window: &PeriodWindow,
    ) -> QuotaResult<u64> {
        let key = UsageKey::new(client_id, kind, window.kind, window.start);
        bounded("usage read", self.timeout, async {
            let row = self.store.get_usage(&key).await?;
            Ok(row.map_or(0, |r| u64::try_from(r.count).unwrap_or(0)))
        })
        .await
    }

    /// Decide whether one more unit of `kind` fits under `ceiling` in `window`.
    ///
    /// Errors (including timeouts) propagate so the caller can fail closed.
    pub async fn check_and_reserve(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        window: &PeriodWindow,
        ceiling: u64,
    ) -> QuotaResult<QuotaDecision> {
        let used = self.current_usage(client_id, kind, window).await?;
        let decision = QuotaDecision::evaluate(kind, window, used, ceiling);
        tracing::debug!(
            client_id = %client_id,
            counter_kind = %kind,
            period = %window.kind,
            used = used,
            ceiling = ceiling,
            allowed = decision.allowed,
            "Quota check"
        );
        Ok(decision)
    }

    /// Check every limit for `kind`.
    ///
    /// Returns the first denial in `limits` order; if all pass, the decision
    /// with the least remaining headroom.
    pub async fn check_all(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        limits: &[Limit],
    ) -> QuotaResult<QuotaDecision> {
        let mut tightest: Option<QuotaDecision> = None;
        for limit in limits {
            let decision = self
                .check_and_reserve(client_id, kind, &limit.window, limit.ceiling)
                .await?;
            if !decision.allowed {
                return Ok(decision);
            }
            if tightest
                .as_ref()
                .is_none_or(|t| decision.remaining < t.remaining)
            {
                tightest = Some(decision);
            }
        }
        tightest.ok_or_else(|| QuotaError::Internal(format!("no limits configured for {kind}")))
    }
}
