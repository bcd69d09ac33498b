//! The uniform response envelope.
//!
//! Every reply, success or failure, is rendered as
//!
//! ```json
//! {"msg": "...", "internal_msg": "...", "code": 0, "data": null}
//! ```
//!
//! A zero code with empty messages denotes success. `internal_msg` is only
//! populated when the renderer runs in debug mode.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, SUCCESS_CODE};

/// The envelope returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    /// User-facing message.
    pub msg: String,
    /// Internal-only message, empty outside debug mode.
    pub internal_msg: String,
    /// Numeric result code; [`SUCCESS_CODE`] on success.
    pub code: u64,
    /// Payload on success, error-specific detail on failure.
    pub data: serde_json::Value,
}

impl ApiResult {
    /// Creates a success envelope carrying `data`.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            msg: String::new(),
            internal_msg: String::new(),
            code: SUCCESS_CODE,
            data,
        }
    }

    /// Returns `true` if this envelope denotes success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// Renders envelopes, hiding internal detail unless in debug mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeRenderer {
    debug: bool,
}

impl EnvelopeRenderer {
    /// Creates a renderer.
    #[must_use]
    pub const fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Returns `true` if internal messages are rendered.
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.debug
    }

    /// Renders an envelope from its parts.
    #[must_use]
    pub fn render(
        &self,
        msg: impl Into<String>,
        internal_msg: impl Into<String>,
        code: u64,
        data: serde_json::Value,
    ) -> ApiResult {
        ApiResult {
            msg: msg.into(),
            internal_msg: if self.debug {
                internal_msg.into()
            } else {
                String::new()
            },
            code,
            data,
        }
    }

    /// Renders a success envelope.
    #[must_use]
    pub fn render_success(&self, data: serde_json::Value) -> ApiResult {
        ApiResult::success(data)
    }

    /// Renders an error envelope.
    #[must_use]
    pub fn render_error(&self, err: &ApiError) -> ApiResult {
        self.render(
            err.msg(),
            err.internal_msg(),
            err.code(),
            err.data().cloned().unwrap_or(serde_json::Value::Null),
        )
    }
}

/// What the pipeline hands back to the transport.
///
/// `envelope` is `None` when nothing should be written, either because the
/// handler produced its own response or a return hook suppressed it.
/// Plain-text replies such as the health probe carry `text` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// HTTP status for the response.
    pub status: StatusCode,
    /// Envelope to serialize, if any.
    pub envelope: Option<ApiResult>,
    /// Plain-text body, written when there is no envelope.
    pub text: Option<String>,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    pub const fn new(status: StatusCode, envelope: Option<ApiResult>) -> Self {
        Self {
            status,
            envelope,
            text: None,
        }
    }

    /// Creates a plain-text reply.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            envelope: None,
            text: Some(body.into()),
        }
    }

    /// Returns the envelope code, or [`SUCCESS_CODE`] if nothing is written.
    #[must_use]
    pub fn code(&self) -> u64 {
        self.envelope.as_ref().map_or(SUCCESS_CODE, |e| e.code)
    }

    /// Serializes the envelope to JSON bytes.
    pub fn to_json(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        self.envelope.as_ref().map(serde_json::to_vec).transpose()
    }
}
