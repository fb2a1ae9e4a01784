//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: price engine advances
//! - **Fan-out**: updates published, deliveries, per-channel failures
//! - **Membership**: active channels, topic memberships
//! - **Ledger**: durable subscription operations by outcome
//!
//! Rendered at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!("stream_hub_ticks_total", "Price engine ticks performed");
    describe_counter!(
        "stream_hub_updates_published_total",
        "Instrument updates offered to topic fan-out"
    );
    describe_counter!(
        "stream_hub_deliveries_total",
        "Updates handed to a channel queue"
    );
    describe_counter!(
        "stream_hub_delivery_failures_total",
        "Per-channel delivery failures (closed or full queue)"
    );
    describe_counter!(
        "stream_hub_ledger_ops_total",
        "Durable subscription operations by kind and outcome"
    );

    describe_gauge!("stream_hub_channels_active", "Registered live channels");
    describe_gauge!(
        "stream_hub_topic_members_total",
        "Memberships across all topics"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for ledger operations.
#[derive(Debug, Clone, Copy)]
pub enum LedgerOp {
    /// Durable subscribe.
    Subscribe,
    /// Durable unsubscribe.
    Unsubscribe,
    /// Durable list / reconcile read.
    List,
}

impl LedgerOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::List => "list",
        }
    }
}

/// Record one engine tick.
pub fn record_tick() {
    counter!("stream_hub_ticks_total").increment(1);
}

/// Record updates offered to fan-out.
pub fn record_published(count: u64) {
    counter!("stream_hub_updates_published_total").increment(count);
}

/// Record successful queue handoffs.
pub fn record_deliveries(count: u64) {
    counter!("stream_hub_deliveries_total").increment(count);
}

/// Record per-channel delivery failures.
pub fn record_delivery_failures(count: u64) {
    if count > 0 {
        counter!("stream_hub_delivery_failures_total").increment(count);
    }
}

/// Record a ledger operation and its outcome.
pub fn record_ledger_op(op: LedgerOp, ok: bool) {
    counter!(
        "stream_hub_ledger_ops_total",
        "op" => op.as_str(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

/// Update the registered channel count.
pub fn set_active_channels(count: f64) {
    gauge!("stream_hub_channels_active").set(count);
}

/// Update the total topic membership count.
pub fn set_topic_members(count: f64) {
    gauge!("stream_hub_topic_members_total").set(count);
}

// =============================================================================
// Tests
// =============================================================================
