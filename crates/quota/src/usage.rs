//! Committing completed work and reporting usage.

use crate::clock::Clock;
use crate::error::{QuotaResult, bounded};
use crate::quota_store::QuotaStore;
use crate::tier_router::{Limit, Route};
use hodie_core::{ClientId, CounterKind, PeriodKind, PeriodWindow, UsageCounter, UsageSummary};
use hodie_metadata::repos::UsageRepo;
use hodie_metadata::{MetadataStore, UsageKey};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A counter that ended above its ceiling because concurrent requests all
/// passed the check before any of them committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverAdmission {
    pub counter_kind: CounterKind,
    pub period: PeriodKind,
    pub count: u64,
    pub ceiling: u64,
}

/// What happened when completed work was recorded.
#[derive(Clone, Debug, Default)]
pub struct CommitOutcome {
    pub counters: Vec<UsageCounter>,
    pub over_admissions: Vec<OverAdmission>,
    /// Number of windows whose increment failed and was dropped.
    pub failures: usize,
}

impl CommitOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Usage report for a client, one entry per enforced counter.
#[derive(Clone, Debug, Serialize)]
pub struct UsageReport {
    pub ai_messages_daily: UsageSummary,
    pub ai_messages_monthly: UsageSummary,
    pub uploads_daily: UsageSummary,
}

impl UsageReport {
    pub fn degraded(&self) -> bool {
        self.ai_messages_daily.degraded
            || self.ai_messages_monthly.degraded
            || self.uploads_daily.degraded
    }
}

pub struct UsageTracker {
    store: Arc<dyn MetadataStore>,
    quota: Arc<QuotaStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl UsageTracker {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        quota: Arc<QuotaStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            quota,
            clock,
            timeout,
        }
    }

    /// Atomically add `amount` to the counter for `window`.
    ///
    /// `tokens` is accumulated alongside for reporting only.
    pub async fn commit(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        amount: u64,
        window: &PeriodWindow,
        tokens: u64,
    ) -> QuotaResult<UsageCounter> {
        let key = UsageKey::new(client_id, kind, window.kind, window.start);
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        let tokens = i64::try_from(tokens).unwrap_or(i64::MAX);
        let now = self.clock.now();
        bounded("usage commit", self.timeout, async {
            let row = self.store.increment_usage(&key, amount, tokens, now).await?;
            Ok(row.into_counter()?)
        })
        .await
    }

    /// Commit one unit of completed work against every limit.
    ///
    /// Never fails: the work already happened, so a failed increment is
    /// logged and counted in the outcome rather than surfaced to the caller.
    pub async fn record(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        tokens: u64,
        limits: &[Limit],
    ) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        for (i, limit) in limits.iter().enumerate() {
            // Tokens are attributed once, to the first window.
            let tokens = if i == 0 { tokens } else { 0 };
            match self
                .commit(client_id, kind, 1, &limit.window, tokens)
                .await
            {
                Ok(counter) => {
                    if counter.count > limit.ceiling {
                        tracing::warn!(
                            client_id = %client_id,
                            counter_kind = %kind,
                            period = %limit.window.kind,
                            count = counter.count,
                            ceiling = limit.ceiling,
                            "Counter exceeded ceiling after concurrent admission"
                        );
                        outcome.over_admissions.push(OverAdmission {
                            counter_kind: kind,
                            period: limit.window.kind,
                            count: counter.count,
                            ceiling: limit.ceiling,
                        });
                    }
                    outcome.counters.push(counter);
                }
                Err(e) => {
                    tracing::error!(
                        client_id = %client_id,
                        counter_kind = %kind,
                        period = %limit.window.kind,
                        error = %e,
                        "Failed to commit usage; work is kept and the count will be low for this period"
                    );
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }

    /// Read-only usage report. Never creates counter rows.
    ///
    /// A counter that cannot be read is reported as zero usage with
    /// `degraded` set instead of failing the whole report.
    pub async fn summarize(&self, client_id: &ClientId, route: &Route) -> QuotaResult<UsageReport> {
        let now = self.clock.now();
        let daily = PeriodWindow::daily(now)?;
        let monthly = PeriodWindow::monthly(now)?;

        Ok(UsageReport {
            ai_messages_daily: self
                .summary(client_id, CounterKind::AiMessages, &daily, route.daily_ai_messages)
                .await,
            ai_messages_monthly: self
                .summary(
                    client_id,
                    CounterKind::AiMessages,
                    &monthly,
                    route.monthly_ai_messages,
                )
                .await,
            uploads_daily: self
                .summary(client_id, CounterKind::Uploads, &daily, route.daily_uploads)
                .await,
        })
    }

    async fn summary(
        &self,
        client_id: &ClientId,
        kind: CounterKind,
        window: &PeriodWindow,
        ceiling: u64,
    ) -> UsageSummary {
        match self.quota.current_usage(client_id, kind, window).await {
            Ok(used) => UsageSummary::new(kind, window, used, ceiling),
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    counter_kind = %kind,
                    period = %window.kind,
                    error = %e,
                    "Usage summary degraded"
                );
                UsageSummary::degraded(kind, window, ceiling)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{Fault, FaultyStore, seed_client, sqlite_store};
    use crate::tier_router::TierRouter;
    use hodie_core::config::QuotaConfig;
    use time::macros::datetime;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<dyn MetadataStore>,
        clock: Arc<ManualClock>,
        quota: Arc<QuotaStore>,
        tracker: UsageTracker,
        client: ClientId,
    }

    async fn fixture() -> Fixture {
        let (dir, store) = sqlite_store().await;
        let client = seed_client(&store, "auth0|a").await;
        let clock = Arc::new(ManualClock::new(datetime!(2025-05-05 10:00 UTC)));
        let quota = Arc::new(QuotaStore::new(store.clone(), Duration::from_secs(5)));
        let tracker = UsageTracker::new(
            store.clone(),
            quota.clone(),
            clock.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            _dir: dir,
            store,
            clock,
            quota,
            tracker,
            client,
        }
    }

    #[tokio::test]
    async fn test_commit_is_monotonic() {
        let f = fixture().await;
        let window = PeriodWindow::daily(f.clock.now()).unwrap();
        let mut last = 0;
        for _ in 0..5 {
            let counter = f
                .tracker
                .commit(&f.client, CounterKind::AiMessages, 1, &window, 10)
                .await
                .unwrap();
            assert!(counter.count > last);
            last = counter.count;
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn test_record_reports_over_admission() {
        let f = fixture().await;
        let window = PeriodWindow::daily(f.clock.now()).unwrap();
        let limits = [Limit {
            window,
            ceiling: 1,
        }];

        // Two requests both passed the check before either committed.
        let first = f
            .tracker
            .record(&f.client, CounterKind::AiMessages, 0, &limits)
            .await;
        let second = f
            .tracker
            .record(&f.client, CounterKind::AiMessages, 0, &limits)
            .await;

        assert!(first.over_admissions.is_empty());
        assert_eq!(
            second.over_admissions,
            vec![OverAdmission {
                counter_kind: CounterKind::AiMessages,
                period: PeriodKind::Daily,
                count: 2,
                ceiling: 1,
            }]
        );
        assert!(second.is_complete());
    }

    #[tokio::test]
    async fn test_record_attributes_tokens_once() {
        let f = fixture().await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        let limits = route
            .limits(CounterKind::AiMessages, f.clock.now())
            .unwrap();

        let outcome = f
            .tracker
            .record(&f.client, CounterKind::AiMessages, 120, &limits)
            .await;
        assert_eq!(outcome.counters.len(), 2);
        assert_eq!(outcome.counters[0].tokens_used, 120);
        assert_eq!(outcome.counters[1].tokens_used, 0);
        assert!(outcome.counters.iter().all(|c| c.count == 1));
    }

    #[tokio::test]
    async fn test_summarize_does_not_create_rows() {
        let f = fixture().await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");

        let report = f.tracker.summarize(&f.client, &route).await.unwrap();
        assert_eq!(report.ai_messages_daily.used, 0);
        assert_eq!(report.ai_messages_daily.remaining, 50);
        assert_eq!(report.ai_messages_monthly.remaining, 1000);
        assert_eq!(report.uploads_daily.remaining, 3);
        assert!(!report.degraded());
        assert!(f.store.list_usage(f.client.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_then_rollover() {
        // HDL-00007 style scenario: 50/day on free.
        let f = fixture().await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");

        for _ in 0..50 {
            let limits = route
                .limits(CounterKind::AiMessages, f.clock.now())
                .unwrap();
            let decision = f
                .quota
                .check_all(&f.client, CounterKind::AiMessages, &limits)
                .await
                .unwrap();
            assert!(decision.allowed);
            f.tracker
                .record(&f.client, CounterKind::AiMessages, 0, &limits)
                .await;
        }

        let limits = route
            .limits(CounterKind::AiMessages, f.clock.now())
            .unwrap();
        let denied = f
            .quota
            .check_all(&f.client, CounterKind::AiMessages, &limits)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.resets_at, datetime!(2025-05-06 00:00 UTC));

        let report = f.tracker.summarize(&f.client, &route).await.unwrap();
        assert_eq!(report.ai_messages_daily.remaining, 0);
        assert_eq!(report.ai_messages_monthly.used, 50);

        f.clock.set(datetime!(2025-05-06 00:00 UTC));
        let limits = route
            .limits(CounterKind::AiMessages, f.clock.now())
            .unwrap();
        let allowed = f
            .quota
            .check_all(&f.client, CounterKind::AiMessages, &limits)
            .await
            .unwrap();
        assert!(allowed.allowed);
        assert_eq!(allowed.period, PeriodKind::Daily);
        assert_eq!(allowed.remaining, 50);
    }

    async fn faulty_tracker(
        timeout: Duration,
    ) -> (tempfile::TempDir, Arc<FaultyStore>, UsageTracker, ClientId) {
        let (dir, store) = sqlite_store().await;
        let client = seed_client(&store, "auth0|a").await;
        let faulty = Arc::new(FaultyStore::new(store));
        let clock = Arc::new(ManualClock::new(datetime!(2025-05-05 10:00 UTC)));
        let quota = Arc::new(QuotaStore::new(faulty.clone(), timeout));
        let tracker = UsageTracker::new(faulty.clone(), quota, clock, timeout);
        (dir, faulty, tracker, client)
    }

    #[tokio::test]
    async fn test_summarize_degrades_when_reads_fail() {
        let (_dir, faulty, tracker, client) = faulty_tracker(Duration::from_secs(5)).await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        faulty.set_reads(Fault::Fail);

        let report = tracker.summarize(&client, &route).await.unwrap();
        assert!(report.degraded());
        assert!(report.ai_messages_daily.degraded);
        assert_eq!(report.ai_messages_daily.used, 0);
        assert_eq!(report.ai_messages_daily.remaining, 50);
        assert_eq!(report.ai_messages_monthly.used, 0);
        assert!(report.uploads_daily.degraded);
        assert_eq!(report.uploads_daily.remaining, 3);
    }

    #[tokio::test]
    async fn test_summarize_degrades_when_reads_stall() {
        let (_dir, faulty, tracker, client) = faulty_tracker(Duration::from_millis(20)).await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        faulty.set_reads(Fault::Stall);

        let report = tracker.summarize(&client, &route).await.unwrap();
        assert!(report.ai_messages_daily.degraded);
        assert!(report.ai_messages_monthly.degraded);
        assert!(report.uploads_daily.degraded);
        assert_eq!(report.uploads_daily.used, 0);
    }

    #[tokio::test]
    async fn test_record_counts_failed_increments() {
        let (_dir, faulty, tracker, client) = faulty_tracker(Duration::from_secs(5)).await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        let limits = route
            .limits(CounterKind::AiMessages, datetime!(2025-05-05 10:00 UTC))
            .unwrap();
        faulty.set_writes(Fault::Fail);

        let outcome = tracker
            .record(&client, CounterKind::AiMessages, 42, &limits)
            .await;
        assert_eq!(outcome.failures, 2);
        assert!(outcome.counters.is_empty());
        assert!(!outcome.is_complete());

        faulty.set_writes(Fault::None);
        assert!(faulty.list_usage(client.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_counts_timed_out_increments() {
        let (_dir, faulty, tracker, client) = faulty_tracker(Duration::from_millis(20)).await;
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        let limits = route
            .limits(CounterKind::Uploads, datetime!(2025-05-05 10:00 UTC))
            .unwrap();
        faulty.set_writes(Fault::Stall);

        let outcome = tracker.record(&client, CounterKind::Uploads, 0, &limits).await;
        assert_eq!(outcome.failures, limits.len());
        assert!(outcome.counters.is_empty());
    }
}
