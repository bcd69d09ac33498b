//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};

/// JWT algorithm names accepted by `[strategies.jwt_auth]`.
pub const JWT_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256",
    "ES384", "EdDSA",
];

/// Service section.
///
/// # Example
///
/// ```
/// use sluice_config::ServiceConfig;
///
/// let config = ServiceConfig {
///     name: "accounts".to_string(),
///     path: "/api".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service name, used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Base path prefixed to every route.
    #[serde(default)]
    pub path: String,

    /// Host the transport binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the transport binds to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            path: String::new(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_service_name() -> String {
    "sluice-service".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or `EnvFilter` syntax).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scrape listener address. Without one the exposition is only
    /// available in-process.
    #[serde(default)]
    pub addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
        }
    }
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name attached to telemetry.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// `[strategies.rate_limit]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Default code for rejections.
    #[serde(default = "default_error_code")]
    pub error_code: u64,

    /// Rejection message.
    #[serde(default = "default_rate_limit_msg")]
    pub error_msg: String,

    /// Milliseconds per token.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Bucket capacity.
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Seconds a bucket may sit unused before it becomes evictable.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            error_code: default_error_code(),
            error_msg: default_rate_limit_msg(),
            interval_ms: default_interval_ms(),
            capacity: default_capacity(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

fn default_rate_limit_msg() -> String {
    "Too many requests".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_capacity() -> u64 {
    1
}

fn default_idle_ttl_secs() -> u64 {
    600
}

/// `[strategies.jwt_auth]`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JwtAuthConfig {
    /// Default code for rejections.
    #[serde(default = "default_error_code")]
    pub error_code: u64,

    /// Rejection message.
    #[serde(default = "default_jwt_msg")]
    pub error_msg: String,

    /// Header carrying the token.
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Algorithm name, one of [`JWT_ALGORITHMS`].
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Inline PEM public key, or the shared secret for HMAC algorithms.
    #[serde(default)]
    pub public_key: Option<String>,

    /// File holding the PEM public key or secret.
    #[serde(default)]
    pub public_key_path: Option<String>,

    /// Accept expired tokens.
    #[serde(default)]
    pub no_check_expire: bool,

    /// Verify tokens without extracting a caller id.
    #[serde(default)]
    pub disable_identity: bool,

    /// Path of the caller id inside the claims.
    #[serde(default = "default_identity_claim")]
    pub identity_claim: Vec<String>,
}

impl Default for JwtAuthConfig {
    fn default() -> Self {
        Self {
            error_code: default_error_code(),
            error_msg: default_jwt_msg(),
            header_name: default_header_name(),
            algorithm: default_algorithm(),
            public_key: None,
            public_key_path: None,
            no_check_expire: false,
            disable_identity: false,
            identity_claim: default_identity_claim(),
        }
    }
}

impl std::fmt::Debug for JwtAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthConfig")
            .field("error_code", &self.error_code)
            .field("error_msg", &self.error_msg)
            .field("header_name", &self.header_name)
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key.as_ref().map(|_| "<redacted>"))
            .field("public_key_path", &self.public_key_path)
            .field("no_check_expire", &self.no_check_expire)
            .field("disable_identity", &self.disable_identity)
            .field("identity_claim", &self.identity_claim)
            .finish()
    }
}

fn default_jwt_msg() -> String {
    "Unauthorized".to_string()
}

fn default_header_name() -> String {
    "Json-Web-Token".to_string()
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_identity_claim() -> Vec<String> {
    vec!["payload".to_string(), "user_id".to_string()]
}

/// `[strategies.param_validate]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ParamValidateConfig {
    /// Default code for rejections.
    #[serde(default = "default_error_code")]
    pub error_code: u64,

    /// Fixed rejection message. When unset the violation text is shown.
    #[serde(default)]
    pub error_msg: Option<String>,
}

impl Default for ParamValidateConfig {
    fn default() -> Self {
        Self {
            error_code: default_error_code(),
            error_msg: None,
        }
    }
}

/// `[strategies.ip_filter]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IpFilterConfig {
    /// Default code for rejections.
    #[serde(default = "default_error_code")]
    pub error_code: u64,

    /// Rejection message.
    #[serde(default = "default_ip_msg")]
    pub error_msg: String,

    /// Addresses or CIDR blocks to admit.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Addresses or CIDR blocks to reject.
    #[serde(default)]
    pub deny: Vec<String>,

    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for IpFilterConfig {
    fn default() -> Self {
        Self {
            error_code: default_error_code(),
            error_msg: default_ip_msg(),
            allow: Vec::new(),
            deny: Vec::new(),
            trust_forwarded_for: false,
        }
    }
}

fn default_ip_msg() -> String {
    "Forbidden".to_string()
}

/// `[strategies]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct StrategiesConfig {
    /// Token-bucket rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// JWT authentication.
    #[serde(default)]
    pub jwt_auth: JwtAuthConfig,

    /// Parameter validation.
    #[serde(default)]
    pub param_validate: ParamValidateConfig,

    /// Address filtering.
    #[serde(default)]
    pub ip_filter: IpFilterConfig,
}

// Matches sluice_core::INTERNAL_ERROR_CODE: an unconfigured code leaves
// errors unclassified.
fn default_error_code() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.name, "sluice-service");
        assert_eq!(config.path, "");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_strategy_defaults() {
        let config = StrategiesConfig::default();
        assert_eq!(config.rate_limit.capacity, 1);
        assert_eq!(config.rate_limit.interval_ms, 1000);
        assert_eq!(config.rate_limit.idle_ttl_secs, 600);
        assert_eq!(config.jwt_auth.header_name, "Json-Web-Token");
        assert_eq!(config.jwt_auth.algorithm, "RS256");
        assert_eq!(config.jwt_auth.identity_claim, vec!["payload", "user_id"]);
        assert_eq!(config.ip_filter.error_msg, "Forbidden");
        assert_eq!(config.param_validate.error_code, 1);
    }

    #[test]
    fn test_param_validate_defaults_match_serde() {
        let parsed: ParamValidateConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.error_code, 1);
        assert!(parsed.error_msg.is_none());
    }

    #[test]
    fn test_log_format_serde() {
        let json: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(json, LogFormat::Pretty);
        assert!(serde_json::from_str::<LogFormat>("\"xml\"").is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<RateLimitConfig, _> = toml::from_str("burst = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_jwt_debug_redacts_key() {
        let config = JwtAuthConfig {
            public_key: Some("super-secret".to_string()),
            ..Default::default()
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("super-secret"));
        assert!(shown.contains("<redacted>"));
    }
}
