//! Token bucket rate limiting.
//!
//! Each caller key owns a bucket holding up to `capacity` tokens. A request
//! withdraws one token; one token is returned to the bucket every
//! `interval`. Refill is lazy: it is computed from elapsed whole intervals
//! at the moment of withdrawal, and the partial interval carries over.
//!
//! ## Keys
//!
//! The default [`KeyExtractor::Caller`] uses `user:<id>` for authenticated
//! callers, `ip:<addr>` otherwise, and `anonymous` when neither is known.
//!
//! ## Concurrency
//!
//! Buckets live in a [`DashMap`]. A withdrawal holds the key's shard lock for
//! the whole refill-and-take step, so two simultaneous requests against a
//! bucket with one token yield exactly one grant. Idle eviction runs under
//! the same locks and only removes buckets that would already be full, so a
//! recreated bucket never grants more than the evicted one would have.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use sluice_middleware::stages::{KeyExtractor, RateLimitStrategy};
//!
//! let limiter = RateLimitStrategy::builder()
//!     .capacity(5)
//!     .interval(Duration::from_millis(200))
//!     .key(KeyExtractor::Caller)
//!     .error_code(2006)
//!     .build()
//!     .unwrap();
//!
//! assert!(limiter.try_acquire("user:1").is_granted());
//! ```

use super::client_ip;
use crate::strategy::{BoxFuture, Param, Strategy, StrategyBuildError, StrategyResult};
use dashmap::DashMap;
use serde_json::json;
use sluice_core::{ApiError, Session, INTERNAL_ERROR_CODE};
use sluice_telemetry::metrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Strategy name.
pub const NAME: &str = "rateLimit";

const DEFAULT_CAPACITY: u64 = 1;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_MESSAGE: &str = "Too many requests";

/// How the bucket key is derived from a session.
#[derive(Clone, Default)]
pub enum KeyExtractor {
    /// Caller id when authenticated, client address otherwise.
    #[default]
    Caller,
    /// Client address only.
    Ip,
    /// Value of a request header.
    Header(String),
    /// One bucket shared by every request.
    Global,
    /// Custom key function.
    Custom(Arc<dyn Fn(&Session) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "KeyExtractor::Caller"),
            Self::Ip => write!(f, "KeyExtractor::Ip"),
            Self::Header(h) => f.debug_tuple("KeyExtractor::Header").field(h).finish(),
            Self::Global => write!(f, "KeyExtractor::Global"),
            Self::Custom(_) => write!(f, "KeyExtractor::Custom(<fn>)"),
        }
    }
}

/// Outcome of a withdrawal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A token was taken.
    Granted {
        /// Tokens left in the bucket.
        remaining: u64,
    },
    /// The bucket was empty.
    Denied {
        /// Time until the next token arrives.
        retry_after: Duration,
    },
}

impl Acquire {
    /// Returns `true` if a token was taken.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// A single caller's bucket.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    tokens: u64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Returns the tokens currently held, without refilling.
    #[must_use]
    pub const fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Adds one token per whole elapsed interval, up to `capacity`.
    pub fn refill(&mut self, capacity: u64, interval: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let step = interval.as_nanos().max(1);
        let intervals = elapsed.as_nanos() / step;

        if intervals > 0 {
            let added = u64::try_from(intervals).unwrap_or(u64::MAX);
            self.tokens = self.tokens.saturating_add(added).min(capacity);
            let carried = u64::try_from(elapsed.as_nanos() % step).unwrap_or(0);
            self.last_refill = now
                .checked_sub(Duration::from_nanos(carried))
                .unwrap_or(now);
        }

        // A full bucket does not bank time toward future tokens.
        if self.tokens >= capacity {
            self.last_refill = now;
        }
    }

    /// Refills, then tries to take one token.
    pub fn try_take(&mut self, capacity: u64, interval: Duration, now: Instant) -> Acquire {
        self.refill(capacity, interval, now);
        self.last_seen = now;

        if self.tokens > 0 {
            self.tokens -= 1;
            Acquire::Granted {
                remaining: self.tokens,
            }
        } else {
            let waited = now.saturating_duration_since(self.last_refill);
            Acquire::Denied {
                retry_after: interval.saturating_sub(waited),
            }
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Rate limiting strategy.
pub struct RateLimitStrategy {
    buckets: DashMap<String, TokenBucket>,
    capacity: u64,
    interval: Duration,
    idle_ttl: Duration,
    key: KeyExtractor,
    trust_forwarded_for: bool,
    error_code: u64,
    error_msg: String,
}

impl RateLimitStrategy {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RateLimitStrategyBuilder {
        RateLimitStrategyBuilder::default()
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the refill interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of tracked buckets.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Derives the bucket key for a session.
    #[must_use]
    pub fn key_for(&self, session: &Session) -> String {
        let key = match &self.key {
            KeyExtractor::Caller => session
                .caller_id()
                .map(|id| format!("user:{id}"))
                .or_else(|| ip_key(session, self.trust_forwarded_for)),
            KeyExtractor::Ip => ip_key(session, self.trust_forwarded_for),
            KeyExtractor::Header(name) => session.header(name).map(|v| format!("header:{v}")),
            KeyExtractor::Global => Some("global".to_string()),
            KeyExtractor::Custom(f) => f(session),
        };
        key.unwrap_or_else(|| "anonymous".to_string())
    }

    /// Tries to take a token from the bucket for `key`.
    ///
    /// The bucket is created full on first sight of the key.
    pub fn try_acquire(&self, key: &str) -> Acquire {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity, now));
        bucket.try_take(self.capacity, self.interval, now)
    }

    /// Evicts buckets idle for at least `max(idle_ttl, capacity * interval)`.
    ///
    /// Returns the number of evicted buckets.
    pub fn sweep_idle(&self) -> usize {
        let threshold = self.eviction_threshold();
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) < threshold);
        before.saturating_sub(self.buckets.len())
    }

    /// Runs [`RateLimitStrategy::sweep_idle`] every `period` until the
    /// strategy is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.sweep_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = limiter.tracked_keys(), "idle buckets evicted");
                }
            }
        })
    }

    fn eviction_threshold(&self) -> Duration {
        let refill_all = u32::try_from(self.capacity)
            .ok()
            .and_then(|c| self.interval.checked_mul(c))
            .unwrap_or(Duration::MAX);
        self.idle_ttl.max(refill_all)
    }
}

fn ip_key(session: &Session, trust_forwarded_for: bool) -> Option<String> {
    client_ip(session, trust_forwarded_for).map(|ip| format!("ip:{ip}"))
}

impl fmt::Debug for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitStrategy")
            .field("capacity", &self.capacity)
            .field("interval", &self.interval)
            .field("idle_ttl", &self.idle_ttl)
            .field("key", &self.key)
            .field("tracked_keys", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl Strategy for RateLimitStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "token bucket per caller"
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
            let key = self.key_for(session);
            match self.try_acquire(&key) {
                Acquire::Granted { .. } => Ok(()),
                Acquire::Denied { retry_after } => {
                    let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                    metrics::record_rate_limited(NAME);
                    session.add_log_context(NAME, &key);
                    tracing::debug!(
                        request_id = %session.request_id(),
                        key = %key,
                        retry_after_ms,
                        "rate limit exceeded"
                    );
                    Err(ApiError::rate_limited(self.error_msg.clone())
                        .with_data(json!({ "retry_after_ms": retry_after_ms })))
                }
            }
        })
    }
}

/// Builder for [`RateLimitStrategy`].
#[derive(Debug, Clone)]
pub struct RateLimitStrategyBuilder {
    capacity: u64,
    interval: Duration,
    idle_ttl: Duration,
    key: KeyExtractor,
    trust_forwarded_for: bool,
    error_code: u64,
    error_msg: String,
}

impl Default for RateLimitStrategyBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            interval: DEFAULT_INTERVAL,
            idle_ttl: DEFAULT_IDLE_TTL,
            key: KeyExtractor::default(),
            trust_forwarded_for: false,
            error_code: INTERNAL_ERROR_CODE,
            error_msg: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl RateLimitStrategyBuilder {
    /// Sets the bucket capacity. Default: 1.
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the refill interval. Default: 1 second.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the idle time after which a bucket may be evicted.
    #[must_use]
    pub fn idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Sets the key extractor.
    #[must_use]
    pub fn key(mut self, key: KeyExtractor) -> Self {
        self.key = key;
        self
    }

    /// Uses `X-Forwarded-For` / `X-Real-IP` for address keys.
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
    /// Returns `StrategyBuildError::InvalidRule` for a zero capacity or
    /// interval.
    pub fn build(self) -> Result<RateLimitStrategy, StrategyBuildError> {
        if self.capacity == 0 {
            return Err(StrategyBuildError::invalid_rule("capacity", "must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(StrategyBuildError::invalid_rule("interval", "must be positive"));
        }
        Ok(RateLimitStrategy {
            buckets: DashMap::new(),
            capacity: self.capacity,
            interval: self.interval,
            idle_ttl: self.idle_ttl,
            key: self.key,
            trust_forwarded_for: self.trust_forwarded_for,
            error_code: self.error_code,
            error_msg: self.error_msg,
        })
    }
}
