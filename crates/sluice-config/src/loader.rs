//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{ConfigError, LogFormat, SluiceConfig};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// A file replaces the whole configuration; fields it omits take their
/// serde defaults.
///
/// # Example
///
/// ```no_run
/// use sluice_config::ConfigLoader;
///
/// # fn main() -> Result<(), sluice_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("sluice.toml")?
///     .with_env_prefix("SLUICE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: SluiceConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SluiceConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = SluiceConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!(config.debug);
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = SluiceConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = SluiceConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.config = parse(&content, extension)?;

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     debug = true
    ///
    ///     [strategies.rate_limit]
    ///     capacity = 5
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.strategies.rate_limit.capacity, 5);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `SLUICE__STRATEGIES__RATE_LIMIT__CAPACITY=3`. List values are
    /// comma-separated.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EnvParseError` if the file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::env_parse_error(".env", e.to_string())),
        }
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<SluiceConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> SluiceConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;
        let strategies = &mut config.strategies;

        match parts.as_slice() {
            ["DEBUG"] => config.debug = parse_bool(key, value)?,

            ["SERVICE", "NAME"] => config.service.name = value.to_string(),
            ["SERVICE", "PATH"] => config.service.path = value.to_string(),
            ["SERVICE", "HOST"] => config.service.host = value.to_string(),
            ["SERVICE", "PORT"] => config.service.port = parse_num(key, value)?,

            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_bool(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_bool(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => config.telemetry.metrics.addr = non_empty(value),

            ["STRATEGIES", "RATE_LIMIT", field] => {
                let section = &mut strategies.rate_limit;
                match *field {
                    "ERROR_CODE" => section.error_code = parse_num(key, value)?,
                    "ERROR_MSG" => section.error_msg = value.to_string(),
                    "INTERVAL_MS" => section.interval_ms = parse_num(key, value)?,
                    "CAPACITY" => section.capacity = parse_num(key, value)?,
                    "IDLE_TTL_SECS" => section.idle_ttl_secs = parse_num(key, value)?,
                    _ => {}
                }
            }
            ["STRATEGIES", "JWT_AUTH", field] => {
                let section = &mut strategies.jwt_auth;
                match *field {
                    "ERROR_CODE" => section.error_code = parse_num(key, value)?,
                    "ERROR_MSG" => section.error_msg = value.to_string(),
                    "HEADER_NAME" => section.header_name = value.to_string(),
                    "ALGORITHM" => section.algorithm = value.to_string(),
                    "PUBLIC_KEY" => section.public_key = non_empty(value),
                    "PUBLIC_KEY_PATH" => section.public_key_path = non_empty(value),
                    "NO_CHECK_EXPIRE" => section.no_check_expire = parse_bool(key, value)?,
                    "DISABLE_IDENTITY" => section.disable_identity = parse_bool(key, value)?,
                    "IDENTITY_CLAIM" => section.identity_claim = parse_list(value),
                    _ => {}
                }
            }
            ["STRATEGIES", "PARAM_VALIDATE", field] => {
                let section = &mut strategies.param_validate;
                match *field {
                    "ERROR_CODE" => section.error_code = parse_num(key, value)?,
                    "ERROR_MSG" => section.error_msg = non_empty(value),
                    _ => {}
                }
            }
            ["STRATEGIES", "IP_FILTER", field] => {
                let section = &mut strategies.ip_filter;
                match *field {
                    "ERROR_CODE" => section.error_code = parse_num(key, value)?,
                    "ERROR_MSG" => section.error_msg = value.to_string(),
                    "ALLOW" => section.allow = parse_list(value),
                    "DENY" => section.deny = parse_list(value),
                    "TRUST_FORWARDED_FOR" => {
                        section.trust_forwarded_for = parse_bool(key, value)?;
                    }
                    _ => {}
                }
            }

            // unknown keys are ignored
            _ => {}
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<SluiceConfig, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse_error(key, "expected boolean")),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn apply(pairs: &[(&str, &str)]) -> Result<SluiceConfig, ConfigError> {
        let mut loader = ConfigLoader::new();
        for (key, value) in pairs {
            loader.apply_env_var(key, value, "TEST")?;
        }
        Ok(loader.load_unvalidated())
    }

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, SluiceConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
        assert!(config.debug);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"service": {"name": "ledger", "path": "/v1"}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.service.name, "ledger");
        assert_eq!(config.service.path, "/v1");
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        let result = ConfigLoader::new().with_string("debug: true", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(f)) if f == "yaml"));
    }

    #[test]
    fn test_loader_rejects_unknown_fields() {
        let toml = r#"
            [strategies.rate_limit]
            burst = 10
        "#;
        let result = ConfigLoader::new().with_string(toml, "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            debug = true

            [service]
            name = "payments"
            path = "/api"

            [strategies.jwt_auth]
            algorithm = "HS256"
            public_key = "shared-secret"
            no_check_expire = true

            [strategies.ip_filter]
            allow = ["10.0.0.0/8"]
            deny = ["10.0.0.13"]
            "#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .unwrap()
            .load()
            .unwrap();

        assert!(config.debug);
        assert_eq!(config.service.name, "payments");
        assert_eq!(config.strategies.jwt_auth.algorithm, "HS256");
        assert!(config.strategies.jwt_auth.no_check_expire);
        assert_eq!(config.strategies.ip_filter.deny, vec!["10.0.0.13"]);
        // untouched sections keep their defaults
        assert_eq!(config.strategies.rate_limit.capacity, 1);
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/sluice.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/sluice.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, SluiceConfig::default());
    }

    #[test]
    fn test_load_validates() {
        let toml = r#"
            [strategies.rate_limit]
            capacity = 0
        "#;
        let result = ConfigLoader::new().with_string(toml, "toml").unwrap().load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_env_var_strategies() {
        let config = apply(&[
            ("TEST__STRATEGIES__RATE_LIMIT__CAPACITY", "3"),
            ("TEST__STRATEGIES__RATE_LIMIT__INTERVAL_MS", "250"),
            ("TEST__STRATEGIES__JWT_AUTH__IDENTITY_CLAIM", "sub, id"),
            ("TEST__STRATEGIES__IP_FILTER__DENY", "192.0.2.0/24,198.51.100.7"),
            ("TEST__STRATEGIES__PARAM_VALIDATE__ERROR_CODE", "2005"),
        ])
        .unwrap();

        assert_eq!(config.strategies.rate_limit.capacity, 3);
        assert_eq!(config.strategies.rate_limit.interval_ms, 250);
        assert_eq!(config.strategies.jwt_auth.identity_claim, vec!["sub", "id"]);
        assert_eq!(
            config.strategies.ip_filter.deny,
            vec!["192.0.2.0/24", "198.51.100.7"]
        );
        assert_eq!(config.strategies.param_validate.error_code, 2005);
    }

    #[test]
    fn test_env_var_service_and_telemetry() {
        let config = apply(&[
            ("TEST__DEBUG", "yes"),
            ("TEST__SERVICE__PORT", "9000"),
            ("TEST__TELEMETRY__LOGGING__FORMAT", "pretty"),
            ("TEST__TELEMETRY__METRICS__ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(config.telemetry.metrics.addr.as_deref(), Some("127.0.0.1:9090"));
    }

    #[test]
    fn test_env_var_parse_errors() {
        assert!(apply(&[("TEST__SERVICE__PORT", "eighty")]).is_err());
        assert!(apply(&[("TEST__STRATEGIES__JWT_AUTH__NO_CHECK_EXPIRE", "maybe")]).is_err());
        assert!(apply(&[("TEST__TELEMETRY__LOGGING__FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_env_var_unknown_key_ignored() {
        let config = apply(&[("TEST__STRATEGIES__RATE_LIMIT__BURST", "9")]).unwrap();
        assert_eq!(config, SluiceConfig::default());
    }

    #[test]
    fn test_env_overrides_through_load() {
        std::env::set_var("SLUICELOADERTEST__STRATEGIES__RATE_LIMIT__CAPACITY", "7");
        let config = ConfigLoader::new()
            .with_env_prefix("sluiceloadertest")
            .load()
            .unwrap();
        std::env::remove_var("SLUICELOADERTEST__STRATEGIES__RATE_LIMIT__CAPACITY");

        assert_eq!(config.strategies.rate_limit.capacity, 7);
    }
}
