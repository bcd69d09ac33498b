//! The service route table.
//!
//! A [`Service`] maps full paths to descriptors per method and hands matched
//! requests to its [`Executor`]. A descriptor registered for a concrete
//! method wins over one registered for [`ApiMethod::All`].
//!
//! Every service also answers [`HEALTH_PATH`] with plain `ok`, or
//! `not ok` (500) when its health check fails or panics.

use crate::descriptor::{join_path, ApiDescriptor, ApiMethod};
use crate::pipeline::Executor;
use http::{Method, StatusCode};
use sluice_core::{ApiError, Reply, Session};
use sluice_telemetry::metrics;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Message rendered for unmatched requests.
pub const NOT_FOUND_MESSAGE: &str = "not found";

/// Health probe path. Not prefixed by the root path.
pub const HEALTH_PATH: &str = "/healthz";

type MethodTable = HashMap<ApiMethod, Arc<ApiDescriptor>>;

/// A liveness check run on every [`HEALTH_PATH`] request.
#[derive(Clone)]
pub struct HealthCheck(Arc<dyn Fn() -> Result<(), String> + Send + Sync>);

impl HealthCheck {
    fn run(&self) -> Result<(), String> {
        catch_unwind(AssertUnwindSafe(|| (self.0)()))
            .unwrap_or_else(|payload| Err(ApiError::from_panic(payload).internal_msg().to_string()))
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HealthCheck(..)")
    }
}

/// A named group of routes sharing a root path and an executor.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    root_path: String,
    executor: Executor,
    routes: HashMap<String, MethodTable>,
    health_check: Option<HealthCheck>,
}

impl Service {
    /// Starts building a service.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            root_path: String::new(),
            executor: None,
            descriptors: Vec::new(),
            health_check: None,
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the root path prefixed to routes.
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Returns the executor.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Finds the descriptor for `method` at `path`.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&Arc<ApiDescriptor>> {
        let table = self.routes.get(path)?;
        ApiMethod::from_http(method)
            .and_then(|m| table.get(&m))
            .or_else(|| table.get(&ApiMethod::All))
    }

    /// Returns every registered `(full path, descriptor)` pair.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &ApiDescriptor)> {
        self.routes
            .iter()
            .flat_map(|(path, table)| table.values().map(move |d| (path.as_str(), d.as_ref())))
    }

    /// Returns the number of registered descriptors.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// Answers the health probe: `ok`, or `not ok` with status 500.
    #[must_use]
    pub fn health(&self) -> Reply {
        match self.health_check.as_ref().map_or(Ok(()), HealthCheck::run) {
            Ok(()) => Reply::text(StatusCode::OK, "ok"),
            Err(reason) => {
                tracing::error!(service = %self.name, reason = %reason, "health check failed");
                Reply::text(StatusCode::INTERNAL_SERVER_ERROR, "not ok")
            }
        }
    }

    /// Matches the session's method and path, then runs the pipeline.
    ///
    /// [`HEALTH_PATH`] is answered before route lookup.
    pub async fn dispatch(&self, session: Session) -> Reply {
        if session.path() == HEALTH_PATH {
            return self.health();
        }
        match self.resolve(session.method(), session.path()) {
            Some(descriptor) => self.executor.execute(descriptor, session).await,
            None => self.not_found(&session),
        }
    }

    /// Like [`Service::dispatch`], but on its own task.
    pub fn spawn(&self, session: Session) -> JoinHandle<Reply> {
        if session.path() == HEALTH_PATH {
            let reply = self.health();
            return tokio::spawn(async move { reply });
        }
        match self.resolve(session.method(), session.path()) {
            Some(descriptor) => self.executor.spawn(descriptor.clone(), session),
            None => {
                let reply = self.not_found(&session);
                tokio::spawn(async move { reply })
            }
        }
    }

    fn not_found(&self, session: &Session) -> Reply {
        tracing::debug!(
            service = %self.name,
            method = %session.method(),
            path = session.path(),
            "no route matched"
        );
        let err = ApiError::not_found(NOT_FOUND_MESSAGE);
        metrics::record_request("unmatched", err.code(), session.elapsed());
        Reply::new(
            StatusCode::NOT_FOUND,
            Some(self.executor.renderer().render_error(&err)),
        )
    }
}

/// Builder for [`Service`].
pub struct ServiceBuilder {
    name: String,
    root_path: String,
    executor: Option<Executor>,
    descriptors: Vec<ApiDescriptor>,
    health_check: Option<HealthCheck>,
}

impl ServiceBuilder {
    /// Sets the check run by the [`HEALTH_PATH`] probe.
    ///
    /// Returning `Err` or panicking reports the service as unhealthy.
    #[must_use]
    pub fn health_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.health_check = Some(HealthCheck(Arc::new(check)));
        self
    }

    /// Sets the root path prefixed to every route that does not opt out.
    #[must_use]
    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    /// Sets the executor. Defaults to one with no global strategies.
    #[must_use]
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Adds a route.
    #[must_use]
    pub fn route(mut self, descriptor: ApiDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Builds the service.
    ///
    /// A later descriptor for the same method and path replaces an
    /// earlier one.
    #[must_use]
    pub fn build(self) -> Service {
        let root_path = join_path("/", &self.root_path);
        let mut routes: HashMap<String, MethodTable> = HashMap::new();

        for descriptor in self.descriptors {
            let path = descriptor.full_path(&root_path);
            let method = descriptor.method();
            tracing::debug!(service = %self.name, %method, path = %path, "route registered");
            if routes
                .entry(path.clone())
                .or_default()
                .insert(method, Arc::new(descriptor))
                .is_some()
            {
                tracing::warn!(service = %self.name, %method, path = %path, "route replaced");
            }
        }

        Service {
            name: self.name,
            root_path,
            executor: self.executor.unwrap_or_else(|| Executor::builder().build()),
            routes,
            health_check: self.health_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::INTERNAL_ERROR_CODE;

    fn route(method: ApiMethod, path: &str, tag: &'static str) -> ApiDescriptor {
        ApiDescriptor::builder(method, path, move |_session| {
            Box::pin(async move { Ok(Some(json!(tag))) })
        })
        .build()
    }

    fn session(method: Method, path: &str) -> Session {
        Session::from_request(method, path, http::HeaderMap::new(), None)
    }

    fn service() -> Service {
        let health = ApiDescriptor::builder(ApiMethod::Get, "/health", |_session| {
            Box::pin(async { Ok(Some(json!("health"))) })
        })
        .ignore_root_path(true)
        .build();

        Service::builder("accounts")
            .root_path("/api")
            .route(route(ApiMethod::Get, "/user", "get"))
            .route(route(ApiMethod::All, "/user", "all"))
            .route(health)
            .build()
    }

    #[tokio::test]
    async fn test_method_specific_wins_over_all() {
        let service = service();
        let reply = service.dispatch(session(Method::GET, "/api/user")).await;
        assert_eq!(reply.envelope.unwrap().data, json!("get"));

        let reply = service.dispatch(session(Method::POST, "/api/user")).await;
        assert_eq!(reply.envelope.unwrap().data, json!("all"));
    }

    #[tokio::test]
    async fn test_ignore_root_path() {
        let service = service();
        assert!(service.resolve(&Method::GET, "/health").is_some());
        assert!(service.resolve(&Method::GET, "/api/health").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let reply = service().dispatch(session(Method::GET, "/api/missing")).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        let envelope = reply.envelope.unwrap();
        assert_eq!(envelope.msg, NOT_FOUND_MESSAGE);
        assert_eq!(envelope.code, INTERNAL_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_unsupported_method_without_all_is_not_found() {
        let service = Service::builder("s")
            .route(route(ApiMethod::Get, "/only-get", "x"))
            .build();
        let reply = service.dispatch(session(Method::DELETE, "/only-get")).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_spawned_dispatch() {
        let reply = service()
            .spawn(session(Method::GET, "/api/user"))
            .await
            .unwrap();
        assert_eq!(reply.code(), 0);
    }

    #[tokio::test]
    async fn test_health_probe_defaults_to_ok() {
        let reply = service().dispatch(session(Method::GET, HEALTH_PATH)).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.text.as_deref(), Some("ok"));
        assert!(reply.envelope.is_none());
    }

    #[tokio::test]
    async fn test_failing_health_check_is_not_ok() {
        let failing = Service::builder("s")
            .health_check(|| Err("database unreachable".to_string()))
            .build();
        let reply = failing.dispatch(session(Method::GET, HEALTH_PATH)).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.text.as_deref(), Some("not ok"));

        let panicking = Service::builder("s")
            .health_check(|| panic!("pool poisoned"))
            .build();
        let reply = panicking
            .spawn(session(Method::HEAD, HEALTH_PATH))
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.text.as_deref(), Some("not ok"));
    }

    #[tokio::test]
    async fn test_health_probe_ignores_root_path() {
        let reply = service().dispatch(session(Method::GET, "/api/healthz")).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_later_route_replaces_earlier() {
        let service = Service::builder("s")
            .route(route(ApiMethod::Get, "/a", "first"))
            .route(route(ApiMethod::Get, "/a", "second"))
            .build();
        assert_eq!(service.route_count(), 1);
        assert_eq!(service.root_path(), "/");
        assert_eq!(service.routes().count(), 1);
    }
}
