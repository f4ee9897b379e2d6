//! Metrics collection and export for the parley server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const REJECTIONS_TOTAL: &str = "parley_rejections_total";
    pub const PRESENCE_SIZE: &str = "parley_presence_size";
    pub const HISTORY_REQUESTS_TOTAL: &str = "parley_history_requests_total";
    pub const DISPATCH_SECONDS: &str = "parley_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Total number of chat events accepted, by kind"
    );
    metrics::describe_counter!(
        names::REJECTIONS_TOTAL,
        "Total number of rejected chat events, by reason"
    );
    metrics::describe_gauge!(names::PRESENCE_SIZE, "Current number of present users");
    metrics::describe_counter!(
        names::HISTORY_REQUESTS_TOTAL,
        "Total number of history queries served"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound frame processing latency in seconds"
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

/// Record an accepted chat event.
pub fn record_message(kind: &str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a rejected chat event.
pub fn record_rejection(reason: &str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Update the presence gauge.
pub fn set_presence_size(count: usize) {
    gauge!(names::PRESENCE_SIZE).set(count as f64);
}

/// Record a history query.
pub fn record_history_request() {
    counter!(names::HISTORY_REQUESTS_TOTAL).increment(1);
}

/// Record frame processing latency.
pub fn record_dispatch_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
