//! The strategy trait and its supporting types.
//!
//! A [`Strategy`] is a named, configurable pre-processing unit executed
//! before a route's handler. Strategies are constructed once at startup,
//! shared as `Arc<dyn Strategy>`, and never reconfigured afterwards; any
//! state they mutate per request (rate-limit buckets) is internally
//! synchronized.
//!
//! # Example
//!
//! ```
//! use sluice_core::{ApiError, Session};
//! use sluice_middleware::{BoxFuture, Param, Strategy, StrategyResult};
//!
//! struct RequireTenant;
//!
//! impl Strategy for RequireTenant {
//!     fn name(&self) -> &str {
//!         "requireTenant"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "rejects requests without a tenant header"
//!     }
//!
//!     fn error_code(&self) -> u64 {
//!         2010
//!     }
//!
//!     fn execute<'a>(
//!         &'a self,
//!         session: &'a mut Session,
//!         _param: &'a Param,
//!     ) -> BoxFuture<'a, StrategyResult> {
//!         Box::pin(async move {
//!             let tenant = session
//!                 .header("x-tenant")
//!                 .map(str::to_string)
//!                 .ok_or_else(|| ApiError::forbidden("tenant required"))?;
//!             session.set_data("tenant", tenant.into());
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use sluice_core::{ApiError, Session};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a strategy execution.
pub type StrategyResult = Result<(), ApiError>;

/// A pre-processing unit executed before the handler.
///
/// # Invariants
///
/// - `execute` either returns `Ok(())` (the pipeline continues) or a
///   classified [`ApiError`] (the pipeline stops)
/// - An error left at the unclassified code has it replaced by
///   [`Strategy::error_code`]
/// - Strategies MUST NOT retain the session past `execute`
pub trait Strategy: Send + Sync + 'static {
    /// Returns the strategy name used in logs and metrics.
    fn name(&self) -> &str;

    /// Returns a human-readable description.
    fn description(&self) -> &str;

    /// Returns the default code for unclassified failures.
    fn error_code(&self) -> u64;

    /// Runs the strategy against the session.
    fn execute<'a>(&'a self, session: &'a mut Session, param: &'a Param)
        -> BoxFuture<'a, StrategyResult>;
}

impl fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name())
            .field("error_code", &self.error_code())
            .finish_non_exhaustive()
    }
}

/// Opaque per-invocation parameter handed to [`Strategy::execute`].
///
/// The strategy decides what type it expects and downcasts with
/// [`Param::get`].
///
/// ```
/// use sluice_middleware::Param;
///
/// let param = Param::new(30_u32);
/// assert_eq!(param.get::<u32>(), Some(&30));
/// assert!(param.get::<String>().is_none());
/// assert!(Param::none().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Param(Option<Arc<dyn Any + Send + Sync>>);

impl Param {
    /// Creates an empty parameter.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Wraps a value.
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Returns the value if it has type `T`.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref())
    }

    /// Returns `true` if no value is attached.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Param(None)")
        } else {
            f.write_str("Param(<value>)")
        }
    }
}

/// Errors raised while constructing a strategy.
#[derive(Debug, Error)]
pub enum StrategyBuildError {
    /// Key material could not be parsed for the algorithm.
    #[error("invalid key for {algorithm}: {reason}")]
    InvalidKey {
        /// The configured algorithm.
        algorithm: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The algorithm name is not supported.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A rule (IP rule, pattern) could not be parsed.
    #[error("invalid rule `{rule}`: {reason}")]
    InvalidRule {
        /// The offending rule.
        rule: String,
        /// Why parsing failed.
        reason: String,
    },
}

impl StrategyBuildError {
    /// Creates an invalid rule error.
    pub fn invalid_rule(rule: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.to_string(),
        }
    }
}

/// A strategy built from a closure.
///
/// # Example
///
/// ```
/// use sluice_core::ApiError;
/// use sluice_middleware::{FnStrategy, Strategy};
///
/// let strategy = FnStrategy::new("requireLang", "rejects unknown locales", 2011, |session, _param| {
///     Box::pin(async move {
///         match session.lang() {
///             "en-US" | "zh-CN" => Ok(()),
///             other => Err(ApiError::validation(format!("unsupported locale {other}"))),
///         }
///     })
/// });
/// assert_eq!(strategy.name(), "requireLang");
/// ```
pub struct FnStrategy<F> {
    name: String,
    description: String,
    error_code: u64,
    func: F,
}

impl<F> FnStrategy<F>
where
    F: for<'a> Fn(&'a mut Session, &'a Param) -> BoxFuture<'a, StrategyResult>
        + Send
        + Sync
        + 'static,
{
    /// Creates a strategy that runs `func`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        error_code: u64,
        func: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            error_code,
            func,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: for<'a> Fn(&'a mut Session, &'a Param) -> BoxFuture<'a, StrategyResult>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn error_code(&self) -> u64 {
        self.error_code
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut Session,
        param: &'a Param,
    ) -> BoxFuture<'a, StrategyResult> {
        (self.func)(session, param)
    }
}

impl<F> fmt::Debug for FnStrategy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy")
            .field("name", &self.name)
            .field("error_code", &self.error_code)
            .finish_non_exhaustive()
    }
}
