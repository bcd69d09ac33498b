//! Typed configuration for Sluice services.
//!
//! Configuration is layered (defaults → TOML/JSON file → environment
//! variables) and strict: unknown fields are rejected.
//!
//! - [`ServiceConfig`] - service name and base path
//! - [`TelemetrySection`] - logging and metrics
//! - [`StrategiesConfig`] - settings for the built-in strategies
//!
//! # Example
//!
//! ```no_run
//! use sluice_config::ConfigLoader;
//!
//! # fn main() -> Result<(), sluice_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("sluice.toml")?
//!     .with_env_prefix("SLUICE")
//!     .load()?;
//!
//! println!("serving {} under {}", config.service.name, config.service.path);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! debug = false
//!
//! [service]
//! name = "accounts"
//! path = "/api"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! addr = "0.0.0.0:9090"
//!
//! [strategies.rate_limit]
//! error_code = 2006
//! capacity = 10
//! interval_ms = 1000
//!
//! [strategies.jwt_auth]
//! error_code = 2001
//! algorithm = "RS256"
//! public_key_path = "/etc/sluice/jwt.pub.pem"
//!
//! [strategies.param_validate]
//! error_code = 2005
//!
//! [strategies.ip_filter]
//! error_code = 2003
//! deny = ["192.0.2.0/24"]
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `SLUICE__DEBUG=true`
//! - `SLUICE__STRATEGIES__RATE_LIMIT__CAPACITY=3`
//! - `SLUICE__STRATEGIES__IP_FILTER__DENY=192.0.2.0/24,198.51.100.7`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
