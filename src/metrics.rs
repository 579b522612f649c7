//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the exporter.

use crate::{config::MetricsConfig, config::parse_socket_addr, GatewayError, Result};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Final outcome of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    RouteNotFound,
    NoBackend,
    UpstreamError,
    InternalError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::RouteNotFound => "route_not_found",
            Outcome::NoBackend => "no_backend",
            Outcome::UpstreamError => "upstream_error",
            Outcome::InternalError => "internal_error",
        }
    }

    pub fn from_error(err: &GatewayError) -> Self {
        match err {
            GatewayError::RouteNotFound { .. } => Outcome::RouteNotFound,
            GatewayError::NoBackendAvailable { .. } => Outcome::NoBackend,
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout { .. } => {
                Outcome::UpstreamError
            }
            _ => Outcome::InternalError,
        }
    }
}

/// Install the Prometheus exporter on the configured listener.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let addr = parse_socket_addr("metrics.listen_addr", &config.listen_addr)?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GatewayError::Metrics {
            message: e.to_string(),
        })?;
    tracing::info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub fn record_outcome(outcome: Outcome) {
    counter!("gateway_requests_total", 1, "outcome" => outcome.as_str());
}

pub fn record_selection(route: &str, backend: &str) {
    counter!(
        "gateway_backend_selected_total",
        1,
        "route" => route.to_string(),
        "backend" => backend.to_string()
    );
}

pub fn record_upstream_duration(route: &str, elapsed: Duration) {
    histogram!(
        "gateway_upstream_duration_seconds",
        elapsed.as_secs_f64(),
        "route" => route.to_string()
    );
}

pub fn record_health_transition(backend: &str, alive: bool) {
    counter!(
        "gateway_health_transitions_total",
        1,
        "backend" => backend.to_string(),
        "alive" => if alive { "true" } else { "false" }
    );
}
