//! Building runtime components from [`SluiceConfig`].

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sluice_config::{
    ConfigError, IpFilterConfig, JwtAuthConfig, LogFormat, ParamValidateConfig, RateLimitConfig,
    SluiceConfig, StrategiesConfig, TelemetrySection,
};
use sluice_middleware::stages::{
    IpFilterStrategy, JwtAuthStrategy, JwtKey, ParamValidateStrategy, RateLimitStrategy,
};
use sluice_middleware::{Executor, ExecutorBuilder, Service, ServiceBuilder, StrategyBuildError};
use sluice_telemetry::{LogConfig, MetricsConfig, TelemetryConfig, TelemetryError};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors raised while assembling a service from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A strategy rejected its settings.
    #[error("strategy `{strategy}`: {source}")]
    Strategy {
        /// Name of the strategy section.
        strategy: &'static str,
        /// Underlying build error.
        #[source]
        source: StrategyBuildError,
    },

    /// The JWT key file could not be read.
    #[error("failed to read key file {path}")]
    KeyFile {
        /// Configured path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Telemetry could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// The built-in strategies, configured once at startup.
///
/// Each strategy is shared; register the same instance globally or on as
/// many routes as needed.
#[derive(Debug, Clone)]
pub struct StrategySet {
    /// Token-bucket rate limiter.
    pub rate_limit: Arc<RateLimitStrategy>,
    /// JWT authentication, present when a key is configured.
    pub jwt_auth: Option<Arc<JwtAuthStrategy>>,
    /// Parameter validation.
    pub param_validate: Arc<ParamValidateStrategy>,
    /// Address filtering.
    pub ip_filter: Arc<IpFilterStrategy>,
}

impl StrategySet {
    /// Builds every strategy from its configuration section.
    ///
    /// `public_key_path` is read here, once.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::KeyFile` for an unreadable key file and
    /// `SetupError::Strategy` when a strategy rejects its settings.
    pub fn from_config(config: &StrategiesConfig) -> Result<Self, SetupError> {
        Ok(Self {
            rate_limit: Arc::new(rate_limit(&config.rate_limit)?),
            jwt_auth: jwt_auth(&config.jwt_auth)?.map(Arc::new),
            param_validate: Arc::new(param_validate(&config.param_validate)),
            ip_filter: Arc::new(ip_filter(&config.ip_filter)?),
        })
    }

    /// Starts background upkeep for the stateful strategies.
    ///
    /// Currently this sweeps idle rate-limit buckets every `period`, so
    /// `idle_ttl_secs` bounds the bucket map. The task ends once every
    /// clone of the rate limiter is dropped. Must be called inside a Tokio
    /// runtime.
    #[must_use = "dropping the handle detaches the sweeper"]
    pub fn spawn_maintenance(&self, period: Duration) -> JoinHandle<()> {
        tracing::debug!(period_ms = period.as_millis(), "starting rate limit sweeper");
        self.rate_limit.spawn_sweeper(period)
    }
}

fn rate_limit(config: &RateLimitConfig) -> Result<RateLimitStrategy, SetupError> {
    RateLimitStrategy::builder()
        .capacity(config.capacity)
        .interval(Duration::from_millis(config.interval_ms))
        .idle_ttl(Duration::from_secs(config.idle_ttl_secs))
        .error_code(config.error_code)
        .error_msg(config.error_msg.clone())
        .build()
        .map_err(|source| SetupError::Strategy {
            strategy: "rate_limit",
            source,
        })
}

fn jwt_auth(config: &JwtAuthConfig) -> Result<Option<JwtAuthStrategy>, SetupError> {
    let key = match (&config.public_key, &config.public_key_path) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path).map_err(|source| SetupError::KeyFile {
            path: PathBuf::from(path),
            source,
        })?,
        (None, None) => return Ok(None),
    };
    let key = if config.algorithm.starts_with("HS") {
        JwtKey::Secret(key.trim_end().as_bytes().to_vec())
    } else {
        JwtKey::Pem(key)
    };

    let mut builder = JwtAuthStrategy::builder()
        .algorithm(config.algorithm.clone())
        .key(key)
        .header_name(config.header_name.clone())
        .no_check_expire(config.no_check_expire)
        .error_code(config.error_code)
        .error_msg(config.error_msg.clone());
    builder = if config.disable_identity {
        builder.disable_identity()
    } else {
        builder.identity_claim(config.identity_claim.iter().cloned())
    };

    builder.build().map(Some).map_err(|source| SetupError::Strategy {
        strategy: "jwt_auth",
        source,
    })
}

fn param_validate(config: &ParamValidateConfig) -> ParamValidateStrategy {
    let strategy = ParamValidateStrategy::new().with_error_code(config.error_code);
    match &config.error_msg {
        Some(msg) => strategy.with_error_msg(msg.clone()),
        None => strategy,
    }
}

fn ip_filter(config: &IpFilterConfig) -> Result<IpFilterStrategy, SetupError> {
    let mut builder = IpFilterStrategy::builder()
        .trust_forwarded_for(config.trust_forwarded_for)
        .error_code(config.error_code)
        .error_msg(config.error_msg.clone());
    for rule in &config.allow {
        builder = builder.allow(rule.clone());
    }
    for rule in &config.deny {
        builder = builder.deny(rule.clone());
    }
    builder.build().map_err(|source| SetupError::Strategy {
        strategy: "ip_filter",
        source,
    })
}

/// Maps the `[telemetry]` section onto [`TelemetryConfig`].
#[must_use]
pub fn telemetry_config(section: &TelemetrySection) -> TelemetryConfig {
    let base = match section.logging.format {
        LogFormat::Json => LogConfig::production(),
        LogFormat::Pretty => LogConfig::development(),
    };
    TelemetryConfig::builder()
        .service_name(&section.service_name)
        .logging(LogConfig {
            enabled: section.logging.enabled,
            level: section.logging.level.clone(),
            ..base
        })
        .metrics(MetricsConfig {
            enabled: section.metrics.enabled,
            addr: section.metrics.addr.clone(),
            ..MetricsConfig::default()
        })
        .build()
}

/// Initializes logging and metrics from configuration.
///
/// # Errors
///
/// Returns `SetupError::Telemetry` if either subsystem fails to start.
pub fn init_telemetry(config: &SluiceConfig) -> Result<(), SetupError> {
    sluice_telemetry::init_telemetry(&telemetry_config(&config.telemetry))?;
    Ok(())
}

/// An executor builder with debug mode taken from configuration.
#[must_use]
pub fn executor_builder(config: &SluiceConfig) -> ExecutorBuilder {
    Executor::builder().debug(config.debug)
}

/// A service builder named and rooted from `[service]`.
#[must_use]
pub fn service_builder(config: &SluiceConfig, executor: Executor) -> ServiceBuilder {
    Service::builder(config.service.name.clone())
        .root_path(config.service.path.clone())
        .executor(executor)
}
