//! Metrics collection and export for huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::FanoutReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const EVENTS_TOTAL: &str = "huddle_events_total";
    pub const EVENTS_BYTES: &str = "huddle_events_bytes";
    pub const EVENTS_DROPPED: &str = "huddle_events_dropped_total";
    pub const DELIVERIES_DROPPED: &str = "huddle_deliveries_dropped_total";
    pub const USERS_ONLINE: &str = "huddle_users_online";
    pub const DISPATCH_LATENCY_SECONDS: &str = "huddle_dispatch_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events processed");
    metrics::describe_counter!(names::EVENTS_BYTES, "Total bytes of events processed");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Inbound events dropped without being handled"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Broadcast deliveries a recipient could not accept"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with at least one open connection");
    metrics::describe_histogram!(
        names::DISPATCH_LATENCY_SECONDS,
        "Inbound event dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an event.
pub fn record_event(direction: &'static str, kind: &'static str, bytes: usize) {
    counter!(names::EVENTS_TOTAL, "direction" => direction, "kind" => kind).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an inbound event that was dropped.
pub fn record_dropped_event(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}

/// Record the outcome of a broadcast.
pub fn record_fanout(report: &FanoutReport) {
    if report.dropped > 0 {
        counter!(names::DELIVERIES_DROPPED).increment(report.dropped as u64);
    }
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::DISPATCH_LATENCY_SECONDS).record(seconds);
}

/// Update the online user count.
pub fn set_online_users(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
