//! Observability for the Sluice request pipeline.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! The pipeline records request outcomes, strategy rejections, rate-limit
//! hits, and caught panics through the helpers in [`metrics`]. They are
//! no-ops until [`init_telemetry`] (or [`init_metrics`]) installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_telemetry::{init_telemetry, LogConfig, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::builder()
//!         .service_name("payments")
//!         .logging(LogConfig::production())
//!         .metrics_addr("0.0.0.0:9090")
//!         .build();
//!
//!     init_telemetry(&config).expect("failed to init telemetry");
//! }
//! ```
//!
//! # Metrics Endpoint
//!
//! ```text
//! # TYPE sluice_requests_total counter
//! sluice_requests_total{route="POST /api/transfer",code="0"} 1234
//! sluice_requests_total{route="POST /api/transfer",code="2006"} 56
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    tracing::info!(
        service = %config.service_name,
        metrics = config.metrics.enabled,
        "telemetry initialized"
    );
    Ok(())
}
