//! Prometheus metrics for the guardian
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `guardian_sync_attempts_total` (counter): sync requests issued, labeled by app.
//! - `guardian_notifications_total` (counter): notifications sent, labeled by app and kind.
//! - `guardian_rollbacks_total` (counter): rollbacks attempted, labeled by app and result.
//! - `guardian_cycle_duration_seconds` (histogram): duration of a full polling cycle.
//! - `guardian_cycle_errors_total` (counter): cycles aborted because listing failed.
//! - `guardian_paused_applications` (gauge): applications currently paused by the guardian.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AppLabels {
    pub app: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NotificationLabels {
    pub app: String,
    /// "recovered", "paused", "rollback"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RollbackLabels {
    pub app: String,
    /// "success" or "failed"
    pub result: String,
}

pub static SYNC_ATTEMPTS_TOTAL: Lazy<Family<AppLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static NOTIFICATIONS_TOTAL: Lazy<Family<NotificationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ROLLBACKS_TOTAL: Lazy<Family<RollbackLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// 10ms .. ~5.5min across 16 buckets; retry backoffs make cycles long.
pub static CYCLE_DURATION_SECONDS: Lazy<Histogram> =
    Lazy::new(|| Histogram::new(exponential_buckets(0.01, 2.0, 16)));

pub static CYCLE_ERRORS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static PAUSED_APPLICATIONS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "guardian_sync_attempts",
        "Number of sync requests issued",
        SYNC_ATTEMPTS_TOTAL.clone(),
    );
    registry.register(
        "guardian_notifications",
        "Number of operator notifications sent",
        NOTIFICATIONS_TOTAL.clone(),
    );
    registry.register(
        "guardian_rollbacks",
        "Number of source rollbacks attempted",
        ROLLBACKS_TOTAL.clone(),
    );
    registry.register(
        "guardian_cycle_duration_seconds",
        "Duration of a polling cycle in seconds",
        CYCLE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "guardian_cycle_errors",
        "Number of polling cycles that failed to list applications",
        CYCLE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "guardian_paused_applications",
        "Applications currently paused by the guardian",
        PAUSED_APPLICATIONS.clone(),
    );

    registry
});

pub fn record_sync_attempt(app: &str) {
    SYNC_ATTEMPTS_TOTAL
        .get_or_create(&AppLabels {
            app: app.to_string(),
        })
        .inc();
}

pub fn record_notification(app: &str, kind: &str) {
    NOTIFICATIONS_TOTAL
        .get_or_create(&NotificationLabels {
            app: app.to_string(),
            kind: kind.to_string(),
        })
        .inc();
}

pub fn record_rollback(app: &str, success: bool) {
    let result = if success { "success" } else { "failed" };
    ROLLBACKS_TOTAL
        .get_or_create(&RollbackLabels {
            app: app.to_string(),
            result: result.to_string(),
        })
        .inc();
}

pub fn observe_cycle(seconds: f64, paused: usize) {
    CYCLE_DURATION_SECONDS.observe(seconds);
    PAUSED_APPLICATIONS.set(paused as i64);
}

pub fn record_cycle_error() {
    CYCLE_ERRORS_TOTAL.inc();
}

/// Render the registry in the Prometheus text format
pub fn encode_text() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
