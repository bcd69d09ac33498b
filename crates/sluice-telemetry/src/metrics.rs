//! Prometheus metrics for the request pipeline.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sluice_requests_total` | Counter | `route`, `code` | Completed requests by envelope code |
//! | `sluice_request_duration_seconds` | Histogram | `route` | Pipeline latency |
//! | `sluice_in_flight_requests` | Gauge | - | Requests currently in the pipeline |
//! | `sluice_strategy_rejections_total` | Counter | `strategy`, `code` | Requests stopped by a strategy |
//! | `sluice_rate_limited_total` | Counter | `strategy` | Requests rejected for an empty bucket |
//! | `sluice_faults_total` | Counter | `stage` | Panics caught inside the pipeline |
//! | `sluice_route_hits_total` | Counter | `route`, `client_type` | Requests seen by the stats strategy |
//! | `sluice_route_latency_seconds` | Histogram | `route` | Latency measured by the stats strategy |
//!
//! Recording helpers are no-ops until a recorder is installed, so emitting a
//! metric never fails a request.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_telemetry::metrics::record_request;
//!
//! record_request("GET /api/user", 0, Duration::from_millis(45));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const REQUESTS_TOTAL: &str = "sluice_requests_total";
const REQUEST_DURATION: &str = "sluice_request_duration_seconds";
const IN_FLIGHT: &str = "sluice_in_flight_requests";
const STRATEGY_REJECTIONS: &str = "sluice_strategy_rejections_total";
const RATE_LIMITED: &str = "sluice_rate_limited_total";
const FAULTS: &str = "sluice_faults_total";
const ROUTE_HITS: &str = "sluice_route_hits_total";
const ROUTE_LATENCY: &str = "sluice_route_latency_seconds";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address for the scrape listener (e.g., "0.0.0.0:9090").
    ///
    /// When `None` the recorder is installed without a listener and the
    /// text exposition is available from [`render_metrics`].
    pub addr: Option<String>,

    /// Histogram buckets for request duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// A scrape listener is spawned on the current tokio runtime when
/// `config.addr` is set.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparseable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                TelemetryError::MetricsInit(format!("scrape listener needs a tokio runtime: {e}"))
            })?;
            let _enter = runtime.enter();

            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

            runtime.spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "metrics listener stopped");
                }
            });
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Requests that completed the pipeline, by envelope code");
    describe_histogram!(REQUEST_DURATION, "Pipeline duration in seconds");
    describe_gauge!(IN_FLIGHT, "Requests currently inside the pipeline");
    describe_counter!(STRATEGY_REJECTIONS, "Requests stopped by a failing strategy");
    describe_counter!(RATE_LIMITED, "Requests rejected by the rate limiter");
    describe_counter!(FAULTS, "Panics caught at a pipeline boundary");
    describe_counter!(ROUTE_HITS, "Requests observed by the stats strategy");
    describe_histogram!(ROUTE_LATENCY, "Route latency observed by the stats strategy");
}

/// Records a completed request.
///
/// * `route` - Method and path of the matched route
/// * `code` - Envelope code (0 on success)
/// * `duration` - Time spent in the pipeline
pub fn record_request(route: &str, code: u64, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "code" => code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION, "route" => route.to_string()).record(duration.as_secs_f64());
}

/// Records a request stopped by a strategy.
pub fn record_strategy_rejection(strategy: &str, code: u64) {
    counter!(
        STRATEGY_REJECTIONS,
        "strategy" => strategy.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// Records a request rejected for an empty token bucket.
pub fn record_rate_limited(strategy: &str) {
    counter!(RATE_LIMITED, "strategy" => strategy.to_string()).increment(1);
}

/// Records a panic caught at a pipeline boundary.
///
/// `stage` is `strategy`, `handler`, `hook`, `deferred`, or `task`.
pub fn record_fault(stage: &'static str) {
    counter!(FAULTS, "stage" => stage).increment(1);
}

/// Records a route hit observed by the stats strategy.
pub fn record_route_hit(route: &str, client_type: &str) {
    counter!(
        ROUTE_HITS,
        "route" => route.to_string(),
        "client_type" => client_type.to_string()
    )
    .increment(1);
}

/// Records route latency observed by the stats strategy.
pub fn record_route_latency(route: &str, duration: Duration) {
    histogram!(ROUTE_LATENCY, "route" => route.to_string()).record(duration.as_secs_f64());
}

/// Increments the in-flight requests gauge.
pub fn increment_in_flight() {
    gauge!(IN_FLIGHT).increment(1.0);
}

/// Decrements the in-flight requests gauge.
pub fn decrement_in_flight() {
    gauge!(IN_FLIGHT).decrement(1.0);
}

/// Guard that decrements in-flight requests on drop.
///
/// The gauge stays balanced even if the pipeline future is dropped early.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight counter.
    #[must_use]
    pub fn new() -> Self {
        increment_in_flight();
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        decrement_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.addr.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_record_functions_without_recorder() {
        record_request("GET /health", 0, Duration::from_millis(10));
        record_strategy_rejection("jwtAuth", 2001);
        record_rate_limited("rateLimit");
        record_fault("handler");
        record_route_hit("GET /health", "web");
        record_route_latency("GET /health", Duration::from_millis(2));
        let guard = InFlightGuard::new();
        drop(guard);
    }

    #[test]
    fn test_recorded_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_request("POST /api/transfer", 2006, Duration::from_millis(3));
            record_strategy_rejection("rateLimit", 2006);
            record_rate_limited("rateLimit");
            record_route_hit("POST /api/transfer", "ios");
        });

        let output = handle.render();
        assert!(output.contains(REQUESTS_TOTAL));
        assert!(output.contains("code=\"2006\""));
        assert!(output.contains(STRATEGY_REJECTIONS));
        assert!(output.contains(RATE_LIMITED));
        assert!(output.contains("client_type=\"ios\""));
    }

    #[test]
    fn test_disabled_metrics() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_listener_address() {
        let config = MetricsConfig {
            addr: Some("not-an-address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }
}
