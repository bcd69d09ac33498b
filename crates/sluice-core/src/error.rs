//! Error types for Sluice.
//!
//! This module provides [`ApiError`], the single error type that strategies,
//! handlers, and return hooks produce. Every error carries:
//!
//! - an [`ErrorKind`] used for classification, logging, and HTTP status mapping
//! - a user-facing message (`msg`) that is always safe to render
//! - an internal message (`internal_msg`) that is only rendered in debug mode
//! - a numeric `code` that API clients key on
//! - optional structured `data`
//!
//! # Error codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | [`SUCCESS_CODE`] (`0`) | Success, never carried by an error |
//! | [`INTERNAL_ERROR_CODE`] (`1`) | Unclassified; replaced by the failing strategy's default code |
//! | anything else | Caller-defined, opaque to the pipeline |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Code carried by a successful envelope.
pub const SUCCESS_CODE: u64 = 0;

/// Sentinel code for an unclassified internal error.
///
/// A strategy failure carrying this code has it replaced by the strategy's
/// configured default code at the invocation boundary.
pub const INTERNAL_ERROR_CODE: u64 = 1;

/// Generic user-facing message for unclassified faults.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Result type alias using [`ApiError`].
pub type SluiceResult<T> = Result<T, ApiError>;

/// Classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input failed a validation rule.
    Validation,
    /// Caller parameters could not be decoded into the requested shape.
    Decoding,
    /// Identity could not be established (missing, invalid, or expired credentials).
    Auth,
    /// Policy denied the request.
    Forbidden,
    /// The caller exhausted its rate-limit budget.
    RateLimit,
    /// No route matched the request.
    NotFound,
    /// Unclassified fault, including panics.
    Internal,
}

impl ErrorKind {
    /// Returns the HTTP status code conventionally used for this kind.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Validation | Self::Decoding => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the caller is at fault (4xx class).
    #[must_use]
    pub const fn is_client_fault(self) -> bool {
        !matches!(self, Self::Internal)
    }

    /// Returns `true` if retrying the same request later may succeed.
    ///
    /// Only rate limiting is retriable; the pipeline itself never retries.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::RateLimit)
    }

    /// Returns the snake_case name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Decoding => "decoding",
            Self::Auth => "auth",
            Self::Forbidden => "forbidden",
            Self::RateLimit => "rate_limit",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for Sluice.
///
/// # Example
///
/// ```
/// use sluice_core::{ApiError, ErrorKind, INTERNAL_ERROR_CODE};
///
/// fn check_amount(amount: i64) -> Result<(), ApiError> {
///     if amount < 0 {
///         return Err(ApiError::validation("amount must not be negative").with_code(2005));
///     }
///     Ok(())
/// }
///
/// let err = check_amount(-1).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Validation);
/// assert_eq!(err.code(), 2005);
///
/// // Without an explicit code the error is unclassified.
/// assert_eq!(ApiError::auth("Unauthorized").code(), INTERNAL_ERROR_CODE);
/// ```
#[derive(Error, Debug)]
#[error("{kind} error (code {code}): {msg}")]
pub struct ApiError {
    kind: ErrorKind,
    msg: String,
    internal_msg: String,
    code: u64,
    data: Option<serde_json::Value>,
    #[source]
    source: Option<anyhow::Error>,
}

impl ApiError {
    /// Creates an error of the given kind with a user-facing message.
    ///
    /// The code starts as [`INTERNAL_ERROR_CODE`] until set explicitly.
    #[must_use]
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            internal_msg: String::new(),
            code: INTERNAL_ERROR_CODE,
            data: None,
            source: None,
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    /// Creates a decoding error.
    #[must_use]
    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decoding, msg)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, msg)
    }

    /// Creates a policy denial.
    #[must_use]
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, msg)
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    /// Creates an unclassified internal error.
    ///
    /// The user-facing message is always [`INTERNAL_ERROR_MESSAGE`]; the
    /// detail goes to the internal message.
    #[must_use]
    pub fn internal(internal_msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, INTERNAL_ERROR_MESSAGE).with_internal_msg(internal_msg)
    }

    /// Creates an internal error wrapping a source error.
    pub fn internal_with_source(
        internal_msg: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        let mut err = Self::internal(internal_msg);
        err.source = Some(source.into());
        err
    }

    /// Converts a caught panic payload into an internal error.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::internal(format!("panic: {detail}"))
    }

    /// Sets an explicit error code.
    #[must_use]
    pub fn with_code(mut self, code: u64) -> Self {
        self.code = code;
        self
    }

    /// Sets the internal-only message.
    #[must_use]
    pub fn with_internal_msg(mut self, internal_msg: impl Into<String>) -> Self {
        self.internal_msg = internal_msg.into();
        self
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the user-facing message.
    #[must_use]
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Returns the internal-only message.
    #[must_use]
    pub fn internal_msg(&self) -> &str {
        &self.internal_msg
    }

    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> u64 {
        self.code
    }

    /// Returns the structured data, if any.
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Returns `true` if no explicit code has been assigned.
    #[must_use]
    pub const fn is_unclassified(&self) -> bool {
        self.code == INTERNAL_ERROR_CODE
    }

    /// Replaces the sentinel code with `default_code`.
    ///
    /// An explicit non-sentinel code is kept.
    pub fn resolve_code(&mut self, default_code: u64) {
        if self.is_unclassified() {
            self.code = default_code;
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    /// Returns the full source chain rendered for logs.
    #[must_use]
    pub fn source_chain(&self) -> Option<String> {
        self.source.as_ref().map(|e| format!("{e:#}"))
    }
}
