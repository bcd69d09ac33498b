//! # Sluice
//!
//! **Request-processing core for JSON HTTP APIs**
//!
//! Sluice runs every request through an ordered chain of strategies before
//! the handler, and answers with a uniform `{msg, internal_msg, code, data}`
//! envelope:
//!
//! - **Strategies** – JWT authentication, token-bucket rate limiting,
//!   parameter validation, IP filtering, stats, and custom closures
//! - **Fault isolation** – a panicking strategy or handler becomes an
//!   internal-error envelope instead of taking the process down
//! - **Code substitution** – unclassified faults take the failing
//!   strategy's configured code
//! - **Deferred actions** – cleanup registered by strategies always runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sluice::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), sluice::SetupError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("sluice.toml")?
//!     .with_env_prefix("SLUICE")
//!     .load()?;
//! let strategies = StrategySet::from_config(&config.strategies)?;
//!
//! let mut registry = StrategyRegistry::new();
//! registry.register_global(strategies.ip_filter.clone(), Param::none(), false);
//!
//! let executor = sluice::executor_builder(&config).registry(&registry).build();
//! let service = sluice::service_builder(&config, executor)
//!     .route(
//!         ApiDescriptor::builder(ApiMethod::Get, "/ping", |_session| {
//!             Box::pin(async { Ok(Some(json!("pong"))) })
//!         })
//!         .strategy(strategies.rate_limit.clone(), Param::none())
//!         .build(),
//!     )
//!     .build();
//! # let _ = service;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Session → global strategies → route strategies → handler
//!                                                     ↓
//! Reply ← return hook ← envelope ← deferred actions ←─┘
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod setup;

pub use setup::{
    executor_builder, init_telemetry, service_builder, telemetry_config, SetupError, StrategySet,
};

// Re-export core types
pub use sluice_core as core;

// Re-export the pipeline
pub use sluice_middleware as middleware;

// Re-export telemetry
pub use sluice_telemetry as telemetry;

// Re-export configuration
pub use sluice_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use sluice::prelude::*;
///
/// let err = ApiError::validation("name required");
/// assert_eq!(err.code(), INTERNAL_ERROR_CODE);
/// ```
pub mod prelude {
    pub use sluice_core::{
        ApiError, ApiResult, ErrorKind, Reply, RequestId, Session, INTERNAL_ERROR_CODE,
        SUCCESS_CODE,
    };

    pub use sluice_middleware::{
        ApiDescriptor, ApiMethod, BoxFuture, Executor, FnStrategy, HandlerResult, Param, Service,
        Strategy, StrategyRegistry, StrategyResult,
    };

    pub use sluice_middleware::stages::{
        FieldRule, FieldType, IpFilterStrategy, JwtAuthStrategy, JwtKey, KeyExtractor,
        ParamSchema, ParamValidateStrategy, RateLimitStrategy, StatsStrategy,
    };

    pub use sluice_config::{ConfigLoader, SluiceConfig};

    pub use crate::{SetupError, StrategySet};
}
