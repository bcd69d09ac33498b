//! The strategy pipeline executor.
//!
//! Every request runs through the same fixed sequence:
//!
//! 1. **Global strategies** - enabled registry entries, in registration
//!    order, unless the descriptor opts out
//! 2. **Route strategies** - enabled descriptor entries, in declaration order
//! 3. **Handler** - the descriptor's business function
//! 4. **Deferred actions** - everything queued on the session, in insertion
//!    order, on both the success and the fault path
//! 5. **Render** - the envelope, optionally passed through the return hook
//!
//! The first failing strategy short-circuits the rest of the sequence. Each
//! strategy invocation is isolated: a panic is caught at the invocation
//! boundary and classified as an internal error, and an error still carrying
//! the unclassified code receives the strategy's default code. Handler
//! errors keep their own code.

use crate::descriptor::{ApiDescriptor, HandlerResult};
use crate::registry::{StrategyInvocation, StrategyRegistry};
use crate::strategy::{Param, Strategy, StrategyResult};
use futures_util::FutureExt;
use http::StatusCode;
use sluice_core::{ApiError, ApiResult, EnvelopeRenderer, Reply, Session};
use sluice_telemetry::metrics;
use sluice_telemetry::InFlightGuard;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Runs descriptors against sessions.
///
/// Cheap to clone; the global strategy list is shared.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sluice_core::Session;
/// use sluice_middleware::{ApiDescriptor, ApiMethod, Executor};
///
/// # tokio_test::block_on(async {
/// let executor = Executor::builder().build();
/// let descriptor = ApiDescriptor::builder(ApiMethod::Get, "/ping", |_session| {
///     Box::pin(async { Ok(Some(json!("pong"))) })
/// })
/// .build();
///
/// let reply = executor.execute(&descriptor, Session::new()).await;
/// assert_eq!(reply.envelope.unwrap().data, json!("pong"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Executor {
    global: Arc<[StrategyInvocation]>,
    renderer: EnvelopeRenderer,
}

impl Executor {
    /// Creates a new executor builder.
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Returns the envelope renderer.
    #[must_use]
    pub fn renderer(&self) -> EnvelopeRenderer {
        self.renderer
    }

    /// Returns the names of the global strategies that will run.
    #[must_use]
    pub fn global_names(&self) -> Vec<&str> {
        self.global.iter().map(|i| i.strategy().name()).collect()
    }

    /// Runs the full pipeline for one request.
    pub async fn execute(&self, descriptor: &ApiDescriptor, mut session: Session) -> Reply {
        let _in_flight = InFlightGuard::new();
        let route = descriptor.label();
        session.set_route(route.clone());

        let outcome = self.run_stages(descriptor, &mut session).await;
        run_deferred(&mut session);

        if let Err(err) = &outcome {
            log_fault(&session, &route, err);
        }
        let reply = self.render(descriptor, &session, outcome);

        metrics::record_request(&route, reply.code(), session.elapsed());
        reply
    }

    /// Runs the pipeline on its own task.
    ///
    /// Dropping the returned handle does not cancel the request, so a
    /// strategy is never interrupted mid-unit by a disconnecting client.
    pub fn spawn(&self, descriptor: Arc<ApiDescriptor>, session: Session) -> JoinHandle<Reply> {
        let executor = self.clone();
        tokio::spawn(async move { executor.execute(&descriptor, session).await })
    }

    /// Runs the pipeline on its own task and waits for the reply.
    ///
    /// A task that panics or is cancelled yields an internal error reply.
    pub async fn execute_detached(&self, descriptor: Arc<ApiDescriptor>, session: Session) -> Reply {
        match self.spawn(descriptor, session).await {
            Ok(reply) => reply,
            Err(e) => {
                let err = if e.is_panic() {
                    metrics::record_fault("task");
                    ApiError::from_panic(e.into_panic())
                } else {
                    ApiError::internal("pipeline task cancelled")
                };
                tracing::error!(internal_msg = err.internal_msg(), "pipeline task failed");
                Reply::new(err.status_code(), Some(self.renderer.render_error(&err)))
            }
        }
    }

    async fn run_stages(&self, descriptor: &ApiDescriptor, session: &mut Session) -> HandlerResult {
        if !descriptor.ignores_global_strategies() {
            for invocation in self.global.iter() {
                invoke(invocation, session).await?;
            }
        }

        for invocation in descriptor.strategies().iter().filter(|i| !i.is_disabled()) {
            invoke(invocation, session).await?;
        }

        let handler = descriptor.handler();
        match AssertUnwindSafe(handler(session)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                metrics::record_fault("handler");
                Err(ApiError::from_panic(payload))
            }
        }
    }

    fn render(&self, descriptor: &ApiDescriptor, session: &Session, outcome: HandlerResult) -> Reply {
        let (status, envelope) = match outcome {
            Ok(Some(data)) => (StatusCode::OK, self.renderer.render_success(data)),
            Ok(None) => return Reply::new(StatusCode::OK, None),
            Err(err) => (err.status_code(), self.renderer.render_error(&err)),
        };

        match descriptor.return_hook() {
            Some(hook) => self.apply_hook(hook, session, status, envelope),
            None => Reply::new(status, Some(envelope)),
        }
    }

    fn apply_hook(
        &self,
        hook: &crate::descriptor::ReturnHook,
        session: &Session,
        status: StatusCode,
        envelope: ApiResult,
    ) -> Reply {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(session, envelope)))
            .unwrap_or_else(|payload| {
                metrics::record_fault("hook");
                Err(ApiError::from_panic(payload))
            });

        match outcome {
            Ok(envelope) => Reply::new(status, envelope),
            Err(err) => {
                log_fault(session, "return hook", &err);
                Reply::new(err.status_code(), Some(self.renderer.render_error(&err)))
            }
        }
    }
}

/// Runs one strategy invocation with fault isolation and code resolution.
async fn invoke(invocation: &StrategyInvocation, session: &mut Session) -> StrategyResult {
    let strategy = invocation.strategy();

    let outcome = AssertUnwindSafe(strategy.execute(session, invocation.param()))
        .catch_unwind()
        .await;

    let mut err = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => err,
        Err(payload) => {
            metrics::record_fault("strategy");
            ApiError::from_panic(payload)
        }
    };

    err.resolve_code(strategy.error_code());
    metrics::record_strategy_rejection(strategy.name(), err.code());
    tracing::debug!(
        request_id = %session.request_id(),
        strategy = strategy.name(),
        code = err.code(),
        kind = %err.kind(),
        "strategy stopped the request"
    );
    Err(err)
}

fn run_deferred(session: &mut Session) {
    for action in session.take_deferred() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
            metrics::record_fault("deferred");
            let err = ApiError::from_panic(payload);
            tracing::error!(
                request_id = %session.request_id(),
                internal_msg = err.internal_msg(),
                "deferred action panicked"
            );
        }
    }
}

fn log_fault(session: &Session, route: &str, err: &ApiError) {
    tracing::error!(
        request_id = %session.request_id(),
        route,
        method = %session.method(),
        path = session.path(),
        caller_id = ?session.caller_id(),
        code = err.code(),
        kind = %err.kind(),
        msg = err.msg(),
        internal_msg = err.internal_msg(),
        source = ?err.source_chain(),
        context = %session.log_context(),
        "request failed"
    );
}

/// Builder for [`Executor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    global: Vec<StrategyInvocation>,
    debug: bool,
}

impl ExecutorBuilder {
    /// Creates a builder with no global strategies and debug mode off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the enabled strategies of `registry`.
    #[must_use]
    pub fn registry(mut self, registry: &StrategyRegistry) -> Self {
        self.global.extend(registry.active().cloned());
        self
    }

    /// Appends one enabled global strategy.
    #[must_use]
    pub fn global(mut self, strategy: Arc<dyn Strategy>, param: Param) -> Self {
        self.global.push(StrategyInvocation::new(strategy, param));
        self
    }

    /// Renders internal messages when `true`.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builds the executor.
    #[must_use]
    pub fn build(self) -> Executor {
        Executor {
            global: self.global.into_iter().filter(|i| !i.is_disabled()).collect(),
            renderer: EnvelopeRenderer::new(self.debug),
        }
    }
}
