//! Built-in strategies.
//!
//! | Strategy | Name | Purpose |
//! |----------|------|---------|
//! | [`JwtAuthStrategy`] | `jwtAuth` | Verifies a JSON Web Token and records the caller |
//! | [`RateLimitStrategy`] | `rateLimit` | Token bucket per caller |
//! | [`ParamValidateStrategy`] | `paramValidate` | Checks parameters against a [`ParamSchema`] |
//! | [`IpFilterStrategy`] | `ipFilter` | Allow and deny lists of addresses and CIDR blocks |
//! | [`StatsStrategy`] | `stats` | Per-route hit counter and latency histogram |
//!
//! Custom strategies implement [`Strategy`](crate::Strategy) directly or
//! wrap a closure in [`FnStrategy`](crate::FnStrategy).

pub mod ip_filter;
pub mod jwt_auth;
pub mod rate_limit;
pub mod stats;
pub mod validation;

pub use ip_filter::{IpFilterStrategy, IpFilterStrategyBuilder, IpRule};
pub use jwt_auth::{JwtAuthStrategy, JwtAuthStrategyBuilder, JwtKey};
pub use rate_limit::{
    Acquire, KeyExtractor, RateLimitStrategy, RateLimitStrategyBuilder, TokenBucket,
};
pub use stats::StatsStrategy;
pub use validation::{FieldRule, FieldType, ParamSchema, ParamValidateStrategy};

use sluice_core::Session;
use std::net::IpAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Returns the client address of the request.
///
/// With `trust_forwarded_for`, the first `X-Forwarded-For` hop and then
/// `X-Real-IP` take precedence over the connection address.
#[must_use]
pub fn client_ip(session: &Session, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = session
            .header(FORWARDED_FOR)
            .and_then(|value| value.split(',').next())
            .or_else(|| session.header(REAL_IP))
            .and_then(|value| value.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    session.remote_addr()
}
