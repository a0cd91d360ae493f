//! Static tier to backend/ceiling mapping.

use crate::error::QuotaResult;
use hodie_core::config::{QuotaConfig, TierPolicyConfig};
use hodie_core::{AiBackend, CounterKind, PeriodKind, PeriodWindow, Tier};
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// One ceiling applied to one window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limit {
    pub window: PeriodWindow,
    pub ceiling: u64,
}

/// Resolved policy for a client's tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Tier whose policy is applied. Differs from the stored tier when the
    /// stored value was unknown or unconfigured.
    pub effective_tier: Tier,
    /// True when the stored tier did not map to its own policy.
    pub fallback: bool,
    pub backend: AiBackend,
    pub model: String,
    pub daily_ai_messages: u64,
    pub monthly_ai_messages: u64,
    pub daily_uploads: u64,
}

impl Route {
    fn from_policy(tier: Tier, policy: &TierPolicyConfig, fallback: bool) -> Self {
        Self {
            effective_tier: tier,
            fallback,
            backend: policy.backend,
            model: policy.model.clone(),
            daily_ai_messages: policy.daily_ai_messages,
            monthly_ai_messages: policy.monthly_ai_messages,
            daily_uploads: policy.daily_uploads,
        }
    }

    /// Ceiling for a counter and period, if the policy defines one.
    pub fn ceiling(&self, kind: CounterKind, period: PeriodKind) -> Option<u64> {
        match (kind, period) {
            (CounterKind::AiMessages, PeriodKind::Daily) => Some(self.daily_ai_messages),
            (CounterKind::AiMessages, PeriodKind::Monthly) => Some(self.monthly_ai_messages),
            (CounterKind::Uploads, PeriodKind::Daily) => Some(self.daily_uploads),
            (CounterKind::Uploads, PeriodKind::Monthly) => None,
        }
    }

    /// Every limit that applies to `kind` at `now`, daily first.
    pub fn limits(&self, kind: CounterKind, now: OffsetDateTime) -> QuotaResult<Vec<Limit>> {
        let mut limits = Vec::with_capacity(2);
        for period in [PeriodKind::Daily, PeriodKind::Monthly] {
            if let Some(ceiling) = self.ceiling(kind, period) {
                limits.push(Limit {
                    window: PeriodWindow::containing(period, now)?,
                    ceiling,
                });
            }
        }
        Ok(limits)
    }
}

/// Maps tier strings to policies.
///
/// Lookups never fail: a tier that is unknown, or known but not configured,
/// gets the fallback policy.
#[derive(Clone, Debug)]
pub struct TierRouter {
    policies: BTreeMap<Tier, TierPolicyConfig>,
    fallback_tier: Tier,
    fallback: TierPolicyConfig,
}

impl TierRouter {
    /// Build from configuration.
    ///
    /// The fallback is the `free` entry; without one, the most restrictive
    /// configured entry; with nothing configured, the built-in free policy.
    pub fn new(config: &QuotaConfig) -> Self {
        let mut policies = BTreeMap::new();
        for (name, policy) in &config.tiers {
            match Tier::parse(name) {
                Ok(tier) => {
                    policies.insert(tier, policy.clone());
                }
                Err(_) => tracing::warn!(tier = %name, "Ignoring policy for unknown tier"),
            }
        }

        let (fallback_tier, fallback) = match policies.get(&Tier::Free) {
            Some(policy) => (Tier::Free, policy.clone()),
            None => policies
                .iter()
                .min_by_key(|(_, p)| (p.daily_ai_messages, p.monthly_ai_messages, p.daily_uploads))
                .map(|(tier, p)| (*tier, p.clone()))
                .unwrap_or_else(|| (Tier::Free, TierPolicyConfig::builtin(Tier::Free))),
        };

        Self {
            policies,
            fallback_tier,
            fallback,
        }
    }

    /// Resolve the policy for a stored tier string.
    pub fn route(&self, tier: &str) -> Route {
        let known = Tier::parse(tier).ok();
        match known.and_then(|t| self.policies.get(&t).map(|p| (t, p))) {
            Some((tier, policy)) => Route::from_policy(tier, policy, false),
            None => {
                tracing::debug!(
                    tier = %tier,
                    fallback = %self.fallback_tier,
                    "Tier has no policy; using fallback"
                );
                Route::from_policy(self.fallback_tier, &self.fallback, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn policy(backend: AiBackend, daily: u64, monthly: u64) -> TierPolicyConfig {
        TierPolicyConfig {
            backend,
            model: format!("{backend}-model"),
            daily_ai_messages: daily,
            monthly_ai_messages: monthly,
            daily_uploads: 3,
        }
    }

    #[test]
    fn test_known_tiers_route_to_their_policy() {
        let router = TierRouter::new(&QuotaConfig::default());
        let route = router.route("premium");
        assert_eq!(route.effective_tier, Tier::Premium);
        assert_eq!(route.backend, AiBackend::Claude);
        assert_eq!(route.daily_ai_messages, 2000);
        assert!(!route.fallback);

        let route = router.route("Basic");
        assert_eq!(route.effective_tier, Tier::Basic);
        assert_eq!(route.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_unknown_tier_routes_to_free() {
        let router = TierRouter::new(&QuotaConfig::default());
        let route = router.route("enterprise");
        assert_eq!(route.effective_tier, Tier::Free);
        assert_eq!(route.backend, AiBackend::Groq);
        assert_eq!(route.daily_ai_messages, 50);
        assert!(route.fallback);

        assert_eq!(router.route(""), route);
    }

    #[test]
    fn test_unconfigured_known_tier_routes_to_free() {
        let mut tiers = BTreeMap::new();
        tiers.insert("free".to_string(), policy(AiBackend::Groq, 10, 100));
        tiers.insert("premium".to_string(), policy(AiBackend::Claude, 99, 999));
        let router = TierRouter::new(&QuotaConfig {
            operation_timeout_ms: 100,
            tiers,
        });

        let route = router.route("pro");
        assert_eq!(route.effective_tier, Tier::Free);
        assert_eq!(route.daily_ai_messages, 10);
    }

    #[test]
    fn test_missing_free_falls_back_to_most_restrictive() {
        let mut tiers = BTreeMap::new();
        tiers.insert("pro".to_string(), policy(AiBackend::Claude, 500, 12000));
        tiers.insert("basic".to_string(), policy(AiBackend::Groq, 200, 5000));
        let router = TierRouter::new(&QuotaConfig {
            operation_timeout_ms: 100,
            tiers,
        });

        let route = router.route("mystery");
        assert_eq!(route.effective_tier, Tier::Basic);
        assert_eq!(route.daily_ai_messages, 200);
    }

    #[test]
    fn test_empty_config_uses_builtin_free() {
        let router = TierRouter::new(&QuotaConfig {
            operation_timeout_ms: 100,
            tiers: BTreeMap::new(),
        });
        let route = router.route("premium");
        assert_eq!(route.effective_tier, Tier::Free);
        assert_eq!(route.daily_ai_messages, 50);
        assert_eq!(route.monthly_ai_messages, 1000);
    }

    #[test]
    fn test_limits_for_each_counter() {
        let route = TierRouter::new(&QuotaConfig::default()).route("free");
        let now = datetime!(2025-05-05 10:00 UTC);

        let ai = route.limits(CounterKind::AiMessages, now).unwrap();
        assert_eq!(ai.len(), 2);
        assert_eq!(ai[0].window.kind, PeriodKind::Daily);
        assert_eq!(ai[0].ceiling, 50);
        assert_eq!(ai[1].window.kind, PeriodKind::Monthly);
        assert_eq!(ai[1].ceiling, 1000);

        let uploads = route.limits(CounterKind::Uploads, now).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].ceiling, 3);
    }
}
