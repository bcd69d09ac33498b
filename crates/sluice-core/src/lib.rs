//! # Sluice Core
//!
//! Core types for the Sluice request pipeline.
//!
//! This crate provides the foundational types shared by every pipeline stage:
//!
//! - [`Session`] - Per-request context carrying parameters, identity, and deferred actions
//! - [`RequestId`] - UUID v7 request identifier
//! - [`ApiError`] / [`ErrorKind`] - Classified errors carrying a stable numeric code
//! - [`ApiResult`] / [`EnvelopeRenderer`] - The uniform response envelope
//! - [`ParamDecoder`] / [`LooseDecoder`] - Loosely-typed parameter decoding

#![doc(html_root_url = "https://docs.rs/sluice-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod decode;
mod envelope;
mod error;
mod session;

pub use decode::{DecodeError, LooseDecoder, ParamDecoder};
pub use envelope::{ApiResult, EnvelopeRenderer, Reply};
pub use error::{
    ApiError, ErrorKind, SluiceResult, INTERNAL_ERROR_CODE, INTERNAL_ERROR_MESSAGE, SUCCESS_CODE,
};
pub use session::{
    DeferredAction, RequestId, Session, CLIENT_TYPE_HEADER, DEFAULT_CLIENT_TYPE, DEFAULT_LANG,
    LANG_HEADER,
};
