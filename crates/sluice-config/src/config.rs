//! Main configuration types.
//!
//! This module provides the top-level [`SluiceConfig`] struct and its builder.

use serde::{Deserialize, Serialize};
use sluice_middleware::stages::IpRule;

use crate::{ConfigError, LogFormat, ServiceConfig, StrategiesConfig, TelemetrySection, JWT_ALGORITHMS};

/// Complete Sluice configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use sluice_config::SluiceConfig;
///
/// let config = SluiceConfig::default();
/// assert!(!config.debug);
/// assert_eq!(config.strategies.rate_limit.capacity, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SluiceConfig {
    /// Render `internal_msg` in error envelopes.
    #[serde(default)]
    pub debug: bool,

    /// Service identity and base path.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// Built-in strategy settings.
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

impl SluiceConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SluiceConfigBuilder {
        SluiceConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field:
    /// - zero rate-limit capacity or interval
    /// - an unsupported JWT algorithm
    /// - both `public_key` and `public_key_path` set
    /// - an unparseable IP rule
    /// - an invalid metrics address
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate_limit = &self.strategies.rate_limit;
        if rate_limit.capacity == 0 {
            return Err(ConfigError::invalid_value(
                "strategies.rate_limit.capacity",
                "must be at least 1",
            ));
        }
        if rate_limit.interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "strategies.rate_limit.interval_ms",
                "must be at least 1",
            ));
        }

        let jwt = &self.strategies.jwt_auth;
        if !JWT_ALGORITHMS.contains(&jwt.algorithm.as_str()) {
            return Err(ConfigError::invalid_value(
                "strategies.jwt_auth.algorithm",
                format!("unsupported algorithm: {}", jwt.algorithm),
            ));
        }
        if jwt.public_key.is_some() && jwt.public_key_path.is_some() {
            return Err(ConfigError::invalid_value(
                "strategies.jwt_auth.public_key",
                "set either public_key or public_key_path, not both",
            ));
        }

        let ip_filter = &self.strategies.ip_filter;
        for (field, rules) in [
            ("strategies.ip_filter.allow", &ip_filter.allow),
            ("strategies.ip_filter.deny", &ip_filter.deny),
        ] {
            for rule in rules {
                rule.parse::<IpRule>()
                    .map_err(|e| ConfigError::invalid_value(field, e.to_string()))?;
            }
        }

        if let Some(addr) = &self.telemetry.metrics.addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "telemetry.metrics.addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: debug envelopes, pretty debug-level logs.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::SluiceConfig;
    ///
    /// let config = SluiceConfig::development();
    /// assert!(config.debug);
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.debug = true;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config
    }

    /// Production preset: JSON info-level logs, internal detail hidden.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.debug = false;
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config
    }
}

/// Builder for [`SluiceConfig`].
#[derive(Debug, Default)]
pub struct SluiceConfigBuilder {
    debug: bool,
    service: Option<ServiceConfig>,
    telemetry: Option<TelemetrySection>,
    strategies: Option<StrategiesConfig>,
}

impl SluiceConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set debug mode.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the service section.
    #[must_use]
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetrySection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set the strategies section.
    #[must_use]
    pub fn strategies(mut self, strategies: StrategiesConfig) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> SluiceConfig {
        SluiceConfig {
            debug: self.debug,
            service: self.service.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
            strategies: self.strategies.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<SluiceConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
