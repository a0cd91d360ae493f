//! Usage counters and quota decisions.

use crate::client::ClientId;
use crate::period::{PeriodKind, PeriodWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Category of usage being metered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Chat messages and file analyses sent to an AI backend.
    AiMessages,
    /// Accepted file uploads.
    Uploads,
}

impl CounterKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "ai_messages" => Ok(Self::AiMessages),
            "uploads" => Ok(Self::Uploads),
            _ => Err(crate::Error::UnknownCounterKind(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiMessages => "ai_messages",
            Self::Uploads => "uploads",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine-readable reason for refusing a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    DailyLimitReached,
    MonthlyLimitReached,
    DuplicateUpload,
    UnsupportedFileType,
    FileTooLarge,
}

impl DenyReason {
    /// Limit-reached reason for a period granularity.
    pub fn limit_reached(period: PeriodKind) -> Self {
        match period {
            PeriodKind::Daily => Self::DailyLimitReached,
            PeriodKind::Monthly => Self::MonthlyLimitReached,
        }
    }

    /// Stable reason code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DailyLimitReached => "DailyLimitReached",
            Self::MonthlyLimitReached => "MonthlyLimitReached",
            Self::DuplicateUpload => "DuplicateUpload",
            Self::UnsupportedFileType => "UnsupportedFileType",
            Self::FileTooLarge => "FileTooLarge",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of a read-only quota check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub counter_kind: CounterKind,
    pub period: PeriodKind,
    pub used: u64,
    pub ceiling: u64,
    pub remaining: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub resets_at: OffsetDateTime,
    pub reason: Option<DenyReason>,
}

impl QuotaDecision {
    /// Evaluate `used` against `ceiling` for `window`.
    pub fn evaluate(kind: CounterKind, window: &PeriodWindow, used: u64, ceiling: u64) -> Self {
        let allowed = used < ceiling;
        Self {
            allowed,
            counter_kind: kind,
            period: window.kind,
            used,
            ceiling,
            remaining: ceiling.saturating_sub(used),
            resets_at: window.resets_at(),
            reason: (!allowed).then(|| DenyReason::limit_reached(window.kind)),
        }
    }

    /// Human-readable explanation suitable for an API response.
    pub fn message(&self) -> String {
        match self.reason {
            None => format!(
                "{} of {} {} {} used",
                self.used, self.ceiling, self.period, self.counter_kind
            ),
            Some(_) => format!(
                "{} limit of {} {} reached; resets at {}",
                self.period,
                self.ceiling,
                self.counter_kind,
                self.resets_at
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_else(|_| self.resets_at.to_string())
            ),
        }
    }
}

/// Persisted per-period counter for one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageCounter {
    pub client_id: ClientId,
    pub counter_kind: CounterKind,
    pub period: PeriodKind,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    pub count: u64,
    /// Informational only; never enforced.
    pub tokens_used: u64,
}

/// Read-only usage report for one counter and period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub counter_kind: CounterKind,
    pub period: PeriodKind,
    pub used: u64,
    pub ceiling: u64,
    pub remaining: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub resets_at: OffsetDateTime,
    /// Set when the store could not be read and the numbers are a fallback.
    pub degraded: bool,
}

impl UsageSummary {
    pub fn new(kind: CounterKind, window: &PeriodWindow, used: u64, ceiling: u64) -> Self {
        Self {
            counter_kind: kind,
            period: window.kind,
            used,
            ceiling,
            remaining: ceiling.saturating_sub(used),
            resets_at: window.resets_at(),
            degraded: false,
        }
    }

    /// Fallback summary returned when usage could not be read.
    pub fn degraded(kind: CounterKind, window: &PeriodWindow, ceiling: u64) -> Self {
        Self {
            degraded: true,
            ..Self::new(kind, window, 0, ceiling)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_evaluate_allows_below_ceiling() {
        let window = PeriodWindow::daily(datetime!(2025-05-05 10:00 UTC)).unwrap();
        let decision = QuotaDecision::evaluate(CounterKind::AiMessages, &window, 49, 50);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_evaluate_denies_at_ceiling() {
        let window = PeriodWindow::monthly(datetime!(2025-05-05 10:00 UTC)).unwrap();
        let decision = QuotaDecision::evaluate(CounterKind::AiMessages, &window, 50, 50);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reason, Some(DenyReason::MonthlyLimitReached));
        assert_eq!(decision.resets_at, datetime!(2025-06-01 00:00 UTC));
        assert!(decision.message().contains("2025-06-01T00:00:00Z"));
    }

    #[test]
    fn test_over_ceiling_saturates_remaining() {
        let window = PeriodWindow::daily(datetime!(2025-05-05 10:00 UTC)).unwrap();
        let summary = UsageSummary::new(CounterKind::Uploads, &window, 5, 3);
        assert_eq!(summary.remaining, 0);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(DenyReason::DuplicateUpload.code(), "DuplicateUpload");
        assert_eq!(DenyReason::MonthlyLimitReached.to_string(), "MonthlyLimitReached");
    }

    #[test]
    fn test_counter_kind_roundtrip() {
        for kind in [CounterKind::AiMessages, CounterKind::Uploads] {
            assert_eq!(CounterKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(CounterKind::parse("tokens").is_err());
    }
}
