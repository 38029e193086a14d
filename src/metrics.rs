// ABOUTME: Prometheus metrics bootstrap and recording helpers for the transport surface.
// ABOUTME: Core counters live next to the code that increments them; gauges are set from here.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

pub fn record_error(kind: &'static str) {
    counter!("styx_errors_total", "kind" => kind).increment(1);
}

pub fn record_ws_refusal(code: u16) {
    counter!("styx_ws_refusals_total", "code" => code.to_string()).increment(1);
}

pub fn set_connected_users(count: u64) {
    gauge!("styx_connected_users").set(count as f64);
}

pub fn set_room_count(count: u64) {
    gauge!("styx_rooms").set(count as f64);
}
