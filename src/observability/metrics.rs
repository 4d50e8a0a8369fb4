//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hostgate_requests_total` (counter): forwarded requests by status, service
//! - `hostgate_request_duration_seconds` (histogram): end-to-end latency
//! - `hostgate_backend_dial_failures_total` (counter): dials that fell through
//!   to the next backend, by service
//! - `hostgate_upgrades_total` (counter): raw bridges opened, by service
//! - `hostgate_routes` (gauge): routes in the table

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, service: &str, start: Instant) {
    let labels = [
        ("status", status.to_string()),
        ("service", service.to_string()),
    ];
    counter!("hostgate_requests_total", &labels).increment(1);
    histogram!("hostgate_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_dial_failure(service: &str) {
    counter!("hostgate_backend_dial_failures_total", "service" => service.to_string()).increment(1);
}

pub fn record_upgrade(service: &str) {
    counter!("hostgate_upgrades_total", "service" => service.to_string()).increment(1);
}

pub fn set_route_count(routes: usize) {
    gauge!("hostgate_routes").set(routes as f64);
}
