//! Prometheus metrics for the Hodie server.
//!
//! Exposes quota decisions, usage commits, uploads, and AI provider latency.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no client IDs or content hashes, only aggregate counts by
//! counter kind, reason, category, and backend.
//!
//! **Deployment Requirement**: restrict `/metrics` to the Prometheus scraper
//! at the network level, or disable it with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use hodie_core::{CounterKind, QuotaDecision};
use hodie_quota::CommitOutcome;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Quota metrics
pub static QUOTA_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hodie_quota_decisions_total",
            "Quota checks by counter kind and outcome",
        ),
        &["counter_kind", "outcome"],
    )
    .expect("metric creation failed")
});

pub static QUOTA_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hodie_quota_denials_total",
            "Refused requests by reason code",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static QUOTA_OVER_ADMISSIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hodie_quota_over_admissions_total",
            "Commits that left a counter above its ceiling after a check/commit race",
        ),
        &["counter_kind", "period"],
    )
    .expect("metric creation failed")
});

pub static USAGE_COMMIT_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hodie_usage_commit_failures_total",
            "Usage increments dropped after the work had completed",
        ),
        &["counter_kind"],
    )
    .expect("metric creation failed")
});

pub static USAGE_SUMMARIES_DEGRADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hodie_usage_summaries_degraded_total",
        "Usage reports served with fallback values because the store could not be read",
    )
    .expect("metric creation failed")
});

// Identity metrics
pub static CLIENTS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hodie_clients_created_total",
        "Clients created on first sight of a subject",
    )
    .expect("metric creation failed")
});

// Upload metrics
pub static UPLOADS_ACCEPTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hodie_uploads_accepted_total",
            "Accepted uploads by declared category",
        ),
        &["category"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hodie_upload_bytes_total",
        "Bytes stored for accepted uploads",
    )
    .expect("metric creation failed")
});

// AI provider metrics
pub static AI_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "hodie_ai_request_duration_seconds",
            "AI provider request latency by backend",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["backend"],
    )
    .expect("metric creation failed")
});

pub static AI_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("hodie_ai_errors_total", "AI provider failures by backend"),
        &["backend"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(QUOTA_DECISIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUOTA_DENIALS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUOTA_OVER_ADMISSIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(USAGE_COMMIT_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(USAGE_SUMMARIES_DEGRADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLIENTS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_ACCEPTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AI_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AI_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a quota check and, if it denied, its reason.
pub fn record_decision(decision: &QuotaDecision) {
    let outcome = if decision.allowed { "allowed" } else { "denied" };
    QUOTA_DECISIONS
        .with_label_values(&[decision.counter_kind.as_str(), outcome])
        .inc();
    if let Some(reason) = decision.reason {
        QUOTA_DENIALS.with_label_values(&[reason.code()]).inc();
    }
}

/// Count over-admissions and dropped increments from a usage commit.
pub fn record_commit(kind: CounterKind, outcome: &CommitOutcome) {
    for over in &outcome.over_admissions {
        QUOTA_OVER_ADMISSIONS
            .with_label_values(&[kind.as_str(), over.period.as_str()])
            .inc();
    }
    if outcome.failures > 0 {
        USAGE_COMMIT_FAILURES
            .with_label_values(&[kind.as_str()])
            .inc_by(outcome.failures as u64);
    }
}
