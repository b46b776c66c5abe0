//! Metrics collection and export for dashpulse.
//!
//! Uses the `metrics` crate for instrumentation. Without an installed
//! recorder every call is a no-op; the binary installs the Prometheus
//! exporter when enabled.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const FRAMES_TOTAL: &str = "dashpulse_frames_total";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "dashpulse_reconnect_attempts_total";
    pub const CONFLICTS_TOTAL: &str = "dashpulse_conflicts_total";
    pub const UPDATES_TOTAL: &str = "dashpulse_updates_total";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "dashpulse_subscriptions_active";
    pub const CONNECTED: &str = "dashpulse_connected";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::FRAMES_TOTAL,
        "Protocol frames sent and received, by direction"
    );
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Automatic reconnect attempts scheduled"
    );
    metrics::describe_counter!(
        names::CONFLICTS_TOTAL,
        "Conflicts detected between updates and held state, by kind"
    );
    metrics::describe_counter!(
        names::UPDATES_TOTAL,
        "Data types processed from updates, by outcome"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Subscriptions confirmed by the server"
    );
    metrics::describe_gauge!(names::CONNECTED, "1 while a session is established");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics endpoint.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a frame.
pub fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(1);
}

/// Record a detected conflict.
pub fn record_conflict(kind: &'static str) {
    counter!(names::CONFLICTS_TOTAL, "kind" => kind).increment(1);
}

/// Record per-data-type outcomes of one resolved update.
pub fn record_updates(applied: usize, merged: usize, discarded: usize) {
    for (outcome, count) in [
        ("applied", applied),
        ("merged", merged),
        ("discarded", discarded),
    ] {
        if count > 0 {
            counter!(names::UPDATES_TOTAL, "outcome" => outcome).increment(count as u64);
        }
    }
}

/// Update the confirmed subscription gauge.
pub fn set_active_subscriptions(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}

/// Update the connection gauge.
pub fn set_connected(connected: bool) {
    gauge!(names::CONNECTED).set(if connected { 1.0 } else { 0.0 });
}
