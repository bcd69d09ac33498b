//! # Sluice Middleware
//!
//! The strategy pipeline: a registry of global strategies, per-route
//! descriptors, and the executor that runs them in a fixed order.
//!
//! ## Request Flow
//!
//! ```text
//! Session → global strategies → route strategies → handler
//!                                                     ↓
//! Reply ← return hook ← envelope ← deferred actions ←─┘
//! ```
//!
//! | Step | Runs | Stops on |
//! |------|------|----------|
//! | Global strategies | Enabled registry entries, unless the route opts out | First failure |
//! | Route strategies | Enabled descriptor entries | First failure |
//! | Handler | Only if every strategy passed | - |
//! | Deferred actions | Always, in insertion order | Never |
//! | Return hook | When an envelope is produced | - |
//!
//! ## Error Codes
//!
//! An error left at the unclassified code receives the default code of the
//! strategy that produced it; an explicit code is kept. Panics are caught
//! at the same boundary and become internal errors.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use sluice_core::Session;
//! use sluice_middleware::stages::{RateLimitStrategy, StatsStrategy};
//! use sluice_middleware::{ApiDescriptor, ApiMethod, Executor, Param, Service, StrategyRegistry};
//!
//! let mut registry = StrategyRegistry::new();
//! registry.register_global(Arc::new(StatsStrategy::new()), Param::none(), false);
//!
//! let limiter = Arc::new(RateLimitStrategy::builder().capacity(10).error_code(2006).build().unwrap());
//!
//! let service = Service::builder("accounts")
//!     .root_path("/api")
//!     .executor(Executor::builder().registry(&registry).build())
//!     .route(
//!         ApiDescriptor::builder(ApiMethod::Get, "/balance", |session| {
//!             Box::pin(async move { Ok(Some(json!({"caller": session.caller_id()}))) })
//!         })
//!         .strategy(limiter, Param::none())
//!         .build(),
//!     )
//!     .build();
//!
//! assert_eq!(service.route_count(), 1);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod descriptor;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod stages;
pub mod strategy;

pub use descriptor::{
    ApiDescriptor, ApiDescriptorBuilder, ApiMethod, Handler, HandlerResult, ParamType, ReturnHook,
};
pub use pipeline::{Executor, ExecutorBuilder};
pub use registry::{StrategyInvocation, StrategyRegistry};
pub use service::{HealthCheck, Service, ServiceBuilder, HEALTH_PATH, NOT_FOUND_MESSAGE};
pub use strategy::{BoxFuture, FnStrategy, Param, Strategy, StrategyBuildError, StrategyResult};
