//! Address allow and deny lists.
//!
//! Rules are single addresses (`203.0.113.9`) or CIDR blocks
//! (`10.0.0.0/8`, `2001:db8::/32`). IPv4-mapped IPv6 addresses are matched
//! as IPv4.
//!
//! Evaluation order:
//!
//! 1. A matching deny rule rejects.
//! 2. With a non-empty allow list, only matching addresses pass.
//! 3. Otherwise the request passes.
//!
//! A request without a known address is rejected whenever an allow list is
//! configured.

use super::client_ip;
use crate::strategy::{BoxFuture, Param, Strategy, StrategyBuildError, StrategyResult};
use serde_json::json;
use sluice_core::{ApiError, Session, INTERNAL_ERROR_CODE};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Strategy name.
pub const NAME: &str = "ipFilter";

const DEFAULT_MESSAGE: &str = "Forbidden";

/// An address or CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRule {
    network: IpAddr,
    prefix: u8,
}

impl IpRule {
    /// Returns `true` if `addr` falls inside this rule.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

const fn mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

const fn mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    }
}

impl FromStr for IpRule {
    type Err = StrategyBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network = IpAddr::from_str(addr)
            .map_err(|e| StrategyBuildError::invalid_rule(s, e))?
            .to_canonical();
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|e| StrategyBuildError::invalid_rule(s, e))?,
            None => max,
        };
        if prefix > max {
            return Err(StrategyBuildError::invalid_rule(
                s,
                format!("prefix longer than {max} bits"),
            ));
        }

        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Address filtering strategy.
#[derive(Debug, Clone)]
pub struct IpFilterStrategy {
    allow: Vec<IpRule>,
    deny: Vec<IpRule>,
    trust_forwarded_for: bool,
    error_code: u64,
    error_msg: String,
}

impl IpFilterStrategy {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> IpFilterStrategyBuilder {
        IpFilterStrategyBuilder::default()
    }

    /// Returns `true` if `addr` passes the lists.
    #[must_use]
    pub fn permits(&self, addr: Option<IpAddr>) -> bool {
        match addr {
            Some(ip) if self.deny.iter().any(|r| r.contains(ip)) => false,
            Some(ip) => self.allow.is_empty() || self.allow.iter().any(|r| r.contains(ip)),
            None => self.allow.is_empty(),
        }
    }
}

impl Strategy for IpFilterStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "ip allow and deny lists"
    }

    fn error_code(&self) -> u64 {
        self.error_code
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut Session,
        _param: &'a Param,
    ) -> BoxFuture<'a, StrategyResult> {
        Box::pin(async move {
            let addr = client_ip(session, self.trust_forwarded_for);
            if self.permits(addr) {
                return Ok(());
            }

            let shown = addr.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
            session.add_log_context(NAME, &shown);
            Err(ApiError::forbidden(self.error_msg.clone())
                .with_internal_msg(format!("address {shown} rejected"))
                .with_data(json!({ "ip": shown })))
        })
    }
}

/// Builder for [`IpFilterStrategy`].
#[derive(Debug, Clone)]
pub struct IpFilterStrategyBuilder {
    allow: Vec<String>,
    deny: Vec<String>,
    trust_forwarded_for: bool,
    error_code: u64,
    error_msg: String,
}

impl Default for IpFilterStrategyBuilder {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            trust_forwarded_for: false,
            error_code: INTERNAL_ERROR_CODE,
            error_msg: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl IpFilterStrategyBuilder {
    /// Adds an allow rule.
    #[must_use]
    pub fn allow(mut self, rule: impl Into<String>) -> Self {
        self.allow.push(rule.into());
        self
    }

    /// Adds a deny rule.
    #[must_use]
    pub fn deny(mut self, rule: impl Into<String>) -> Self {
        self.deny.push(rule.into());
        self
    }

    /// Uses `X-Forwarded-For` / `X-Real-IP` as the client address.
    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Sets the default error code.
    #[must_use]
    pub fn error_code(mut self, code: u64) -> Self {
        self.error_code = code;
        self
    }

    /// Sets the rejection message.
    #[must_use]
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = msg.into();
        self
    }

    /// Builds the strategy.
    ///
    /// # Errors
    ///
    /// Returns `StrategyBuildError::InvalidRule` for an unparseable rule.
    pub fn build(self) -> Result<IpFilterStrategy, StrategyBuildError> {
        let parse = |rules: Vec<String>| -> Result<Vec<IpRule>, StrategyBuildError> {
            rules.iter().map(|r| r.parse()).collect()
        };
        Ok(IpFilterStrategy {
            allow: parse(self.allow)?,
            deny: parse(self.deny)?,
            trust_forwarded_for: self.trust_forwarded_for,
            error_code: self.error_code,
            error_msg: self.error_msg,
        })
    }
}
