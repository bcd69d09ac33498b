//! Per-route metadata.
//!
//! An [`ApiDescriptor`] names a route (method and path), the strategies
//! declared for it, its handler, and the optional return hook. It is built
//! once at registration time and read by the executor on every request.

use crate::registry::StrategyInvocation;
use crate::strategy::{BoxFuture, Param, Strategy};
use http::Method;
use sluice_core::{ApiError, ApiResult, Session};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Outcome of a handler.
///
/// `Ok(None)` means the handler produced its own response and nothing
/// should be written.
pub type HandlerResult = Result<Option<serde_json::Value>, ApiError>;

/// Business handler invoked after all strategies succeed.
pub type Handler =
    Arc<dyn for<'a> Fn(&'a mut Session) -> BoxFuture<'a, HandlerResult> + Send + Sync>;

/// Post-processing hook applied to the rendered envelope.
///
/// Returning `Ok(Some(_))` replaces the envelope, `Ok(None)` suppresses the
/// write, and `Err(_)` renders the hook's error instead.
pub type ReturnHook =
    Arc<dyn Fn(&Session, ApiResult) -> Result<Option<ApiResult>, ApiError> + Send + Sync>;

/// HTTP method a descriptor answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
    /// Any method without a more specific descriptor.
    All,
}

impl ApiMethod {
    /// Returns the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::All => "ALL",
        }
    }

    /// Maps an HTTP method, returning `None` for methods without a variant.
    #[must_use]
    pub fn from_http(method: &Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "ALL" => Ok(Self::All),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Accepted parameter encoding, used by documentation tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    /// `application/json`
    #[default]
    Json,
    /// `multipart/form-data`
    Multipart,
    /// Either encoding.
    Any,
}

impl ParamType {
    /// Returns the content type, or `None` for [`ParamType::Any`].
    #[must_use]
    pub const fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Json => Some("application/json"),
            Self::Multipart => Some("multipart/form-data"),
            Self::Any => None,
        }
    }
}

/// Static metadata for one route.
#[derive(Clone)]
pub struct ApiDescriptor {
    method: ApiMethod,
    path: String,
    description: String,
    ignore_root_path: bool,
    ignore_global_strategies: bool,
    param_type: ParamType,
    params_hint: Option<serde_json::Value>,
    return_hint: Option<serde_json::Value>,
    strategies: Vec<StrategyInvocation>,
    handler: Handler,
    return_hook: Option<ReturnHook>,
}

impl ApiDescriptor {
    /// Starts building a descriptor for `method path` served by `handler`.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use sluice_middleware::{ApiDescriptor, ApiMethod};
    ///
    /// let descriptor = ApiDescriptor::builder(ApiMethod::Get, "/user/info", |session| {
    ///     Box::pin(async move { Ok(Some(json!({"id": session.caller_id()}))) })
    /// })
    /// .description("current user")
    /// .build();
    ///
    /// assert_eq!(descriptor.full_path("/api"), "/api/user/info");
    /// ```
    pub fn builder<F>(method: ApiMethod, path: impl Into<String>, handler: F) -> ApiDescriptorBuilder
    where
        F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        ApiDescriptorBuilder {
            descriptor: Self {
                method,
                path: path.into(),
                description: String::new(),
                ignore_root_path: false,
                ignore_global_strategies: false,
                param_type: ParamType::default(),
                params_hint: None,
                return_hint: None,
                strategies: Vec::new(),
                handler: Arc::new(handler),
                return_hook: None,
            },
        }
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> ApiMethod {
        self.method
    }

    /// Returns the route path relative to the service root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the path the route is served at under `root`.
    #[must_use]
    pub fn full_path(&self, root: &str) -> String {
        if self.ignore_root_path {
            self.path.clone()
        } else {
            join_path(root, &self.path)
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns `true` if global strategies are skipped for this route.
    #[must_use]
    pub fn ignores_global_strategies(&self) -> bool {
        self.ignore_global_strategies
    }

    /// Returns the accepted parameter encoding.
    #[must_use]
    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    /// Returns the parameter shape hint.
    #[must_use]
    pub fn params_hint(&self) -> Option<&serde_json::Value> {
        self.params_hint.as_ref()
    }

    /// Returns the return shape hint.
    #[must_use]
    pub fn return_hint(&self) -> Option<&serde_json::Value> {
        self.return_hint.as_ref()
    }

    /// Returns the declared strategies, in declaration order.
    #[must_use]
    pub fn strategies(&self) -> &[StrategyInvocation] {
        &self.strategies
    }

    /// Returns the handler.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Returns the return hook.
    #[must_use]
    pub fn return_hook(&self) -> Option<&ReturnHook> {
        self.return_hook.as_ref()
    }

    /// Returns `METHOD path`, used as the route label in logs and metrics.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

impl fmt::Debug for ApiDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("ignore_root_path", &self.ignore_root_path)
            .field("ignore_global_strategies", &self.ignore_global_strategies)
            .field("param_type", &self.param_type)
            .field("strategies", &self.strategies)
            .field("return_hook", &self.return_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ApiDescriptor`].
pub struct ApiDescriptorBuilder {
    descriptor: ApiDescriptor,
}

impl ApiDescriptorBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    /// Serves the route at its own path, ignoring the service root.
    #[must_use]
    pub fn ignore_root_path(mut self, ignore: bool) -> Self {
        self.descriptor.ignore_root_path = ignore;
        self
    }

    /// Skips all global strategies for this route.
    #[must_use]
    pub fn ignore_global_strategies(mut self, ignore: bool) -> Self {
        self.descriptor.ignore_global_strategies = ignore;
        self
    }

    /// Sets the accepted parameter encoding.
    #[must_use]
    pub fn param_type(mut self, param_type: ParamType) -> Self {
        self.descriptor.param_type = param_type;
        self
    }

    /// Attaches a parameter shape hint.
    #[must_use]
    pub fn params_hint(mut self, hint: serde_json::Value) -> Self {
        self.descriptor.params_hint = Some(hint);
        self
    }

    /// Attaches a return shape hint.
    #[must_use]
    pub fn return_hint(mut self, hint: serde_json::Value) -> Self {
        self.descriptor.return_hint = Some(hint);
        self
    }

    /// Declares an enabled route strategy.
    #[must_use]
    pub fn strategy(self, strategy: Arc<dyn Strategy>, param: Param) -> Self {
        self.register(strategy, param, false)
    }

    /// Declares a route strategy with an explicit disable flag.
    #[must_use]
    pub fn register(
        mut self,
        strategy: Arc<dyn Strategy>,
        param: Param,
        disabled: bool,
    ) -> Self {
        self.descriptor
            .strategies
            .push(StrategyInvocation::new(strategy, param).disabled(disabled));
        self
    }

    /// Sets the return hook.
    #[must_use]
    pub fn return_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Session, ApiResult) -> Result<Option<ApiResult>, ApiError> + Send + Sync + 'static,
    {
        self.descriptor.return_hook = Some(Arc::new(hook));
        self
    }

    /// Builds the descriptor.
    #[must_use]
    pub fn build(self) -> ApiDescriptor {
        self.descriptor
    }
}

pub(crate) fn join_path(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if root.is_empty() {
            "/".to_string()
        } else {
            root.to_string()
        }
    } else {
        format!("{root}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::FnStrategy;
    use serde_json::json;

    fn ok_handler() -> ApiDescriptorBuilder {
        ApiDescriptor::builder(ApiMethod::Post, "/transfer", |_session| {
            Box::pin(async { Ok(Some(json!("done"))) })
        })
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<ApiMethod>().unwrap(), ApiMethod::Get);
        assert_eq!(ApiMethod::from_http(&Method::DELETE), Some(ApiMethod::Delete));
        assert_eq!(ApiMethod::from_http(&Method::TRACE), None);
        assert!("FETCH".parse::<ApiMethod>().is_err());
        assert_eq!(ApiMethod::All.to_string(), "ALL");
    }

    #[test]
    fn test_full_path() {
        let descriptor = ok_handler().build();
        assert_eq!(descriptor.full_path("/api/v1/"), "/api/v1/transfer");
        assert_eq!(descriptor.full_path(""), "/transfer");

        let descriptor = ok_handler().ignore_root_path(true).build();
        assert_eq!(descriptor.full_path("/api/v1"), "/transfer");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", ""), "/");
        assert_eq!(join_path("/api", "/"), "/api");
        assert_eq!(join_path("/api/", "/health"), "/api/health");
    }

    #[test]
    fn test_builder_fields() {
        let strategy = Arc::new(FnStrategy::new("s", "s", 9, |_session, _param| {
            Box::pin(async { Ok(()) })
        }));

        let descriptor = ok_handler()
            .description("move funds")
            .ignore_global_strategies(true)
            .param_type(ParamType::Multipart)
            .params_hint(json!({"amount": "number"}))
            .return_hint(json!("string"))
            .strategy(strategy.clone(), Param::none())
            .register(strategy, Param::none(), true)
            .return_hook(|_session, result| Ok(Some(result)))
            .build();

        assert_eq!(descriptor.description(), "move funds");
        assert!(descriptor.ignores_global_strategies());
        assert_eq!(descriptor.param_type().content_type(), Some("multipart/form-data"));
        assert_eq!(descriptor.params_hint(), Some(&json!({"amount": "number"})));
        assert_eq!(descriptor.strategies().len(), 2);
        assert!(descriptor.strategies()[1].is_disabled());
        assert!(descriptor.return_hook().is_some());
        assert_eq!(descriptor.label(), "POST /transfer");
    }

    #[test]
    fn test_param_type_default() {
        assert_eq!(ParamType::default(), ParamType::Json);
        assert_eq!(ParamType::Any.content_type(), None);
    }
}
