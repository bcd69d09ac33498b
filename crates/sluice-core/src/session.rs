//! Per-request session.
//!
//! A [`Session`] is created once per inbound request and owned by the
//! executor for the request's lifetime. Strategies and the handler borrow it
//! mutably, one at a time, to read parameters, record the caller identity,
//! exchange data, and queue deferred cleanup actions.

use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::decode::{LooseDecoder, ParamDecoder};
use crate::error::ApiError;

/// Header carrying the caller's locale.
pub const LANG_HEADER: &str = "lang";

/// Header carrying the caller's client type.
pub const CLIENT_TYPE_HEADER: &str = "client_type";

/// Locale used when the request does not name one.
pub const DEFAULT_LANG: &str = "zh-CN";

/// Client type used when the request does not name one.
pub const DEFAULT_CLIENT_TYPE: &str = "web";

/// A zero-argument action run once after the pipeline finishes.
pub type DeferredAction = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Unique identifier for a request.
///
/// Uses UUID v7, so identifiers sort by creation time.
///
/// # Example
///
/// ```
/// use sluice_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request mutable context shared by strategies and the handler.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sluice_core::Session;
///
/// let mut session = Session::new().with_params(
///     json!({"page": "3"}).as_object().cloned().unwrap(),
/// );
///
/// session.set_param("page", json!(4));
/// assert_eq!(session.original_params()["page"], "3");
/// assert_eq!(session.param("page"), Some(&json!(4)));
///
/// session.set_caller_id(42);
/// assert_eq!(session.caller_id(), Some(42));
/// ```
pub struct Session {
    request_id: RequestId,
    method: Method,
    path: String,
    route: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<IpAddr>,

    caller_id: Option<u64>,
    claims: Option<Value>,
    jwt_header_name: Option<String>,
    lang: String,
    client_type: String,

    data: Map<String, Value>,
    original_params: Map<String, Value>,
    params: Map<String, Value>,

    deferred: Vec<DeferredAction>,
    log_context: Vec<(String, String)>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    started_at: Instant,
}

impl Session {
    /// Creates an empty session with no parameters and no deferred actions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            method: Method::GET,
            path: String::from("/"),
            route: None,
            headers: HeaderMap::new(),
            remote_addr: None,
            caller_id: None,
            claims: None,
            jwt_header_name: None,
            lang: DEFAULT_LANG.to_string(),
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            data: Map::new(),
            original_params: Map::new(),
            params: Map::new(),
            deferred: Vec::new(),
            log_context: Vec::new(),
            extensions: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Creates a session from inbound request metadata.
    ///
    /// Locale and client type are read from the `lang` and `client_type`
    /// headers, falling back to [`DEFAULT_LANG`] and [`DEFAULT_CLIENT_TYPE`].
    #[must_use]
    pub fn from_request(
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        remote_addr: Option<IpAddr>,
    ) -> Self {
        let lang = header_or(&headers, LANG_HEADER, DEFAULT_LANG);
        let client_type = header_or(&headers, CLIENT_TYPE_HEADER, DEFAULT_CLIENT_TYPE);
        Self {
            method,
            path: path.into(),
            headers,
            remote_addr,
            lang,
            client_type,
            ..Self::new()
        }
    }

    /// Attaches parsed request parameters.
    ///
    /// The original mapping is kept unchanged; strategies work on a copy.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params.clone();
        self.original_params = params;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the matched route label (`METHOD /path` as declared).
    ///
    /// Set by the executor before any strategy runs; `None` until then.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Records the matched route label.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the source address of the request.
    #[must_use]
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Returns the authenticated caller ID.
    #[must_use]
    pub fn caller_id(&self) -> Option<u64> {
        self.caller_id
    }

    /// Records the authenticated caller ID.
    pub fn set_caller_id(&mut self, caller_id: u64) {
        self.caller_id = Some(caller_id);
    }

    /// Returns the verified token claims.
    #[must_use]
    pub fn claims(&self) -> Option<&Value> {
        self.claims.as_ref()
    }

    /// Records the verified token claims.
    pub fn set_claims(&mut self, claims: Value) {
        self.claims = Some(claims);
    }

    /// Returns the header the token was read from.
    #[must_use]
    pub fn jwt_header_name(&self) -> Option<&str> {
        self.jwt_header_name.as_deref()
    }

    /// Records the header the token was read from.
    pub fn set_jwt_header_name(&mut self, name: impl Into<String>) {
        self.jwt_header_name = Some(name.into());
    }

    /// Returns the caller's locale.
    #[must_use]
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Sets the caller's locale.
    pub fn set_lang(&mut self, lang: impl Into<String>) {
        self.lang = lang.into();
    }

    /// Returns the caller's client type.
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    /// Sets the caller's client type.
    pub fn set_client_type(&mut self, client_type: impl Into<String>) {
        self.client_type = client_type.into();
    }

    /// Returns a value from the shared data mapping.
    #[must_use]
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores a value in the shared data mapping.
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Returns the parameters as parsed from the request.
    #[must_use]
    pub fn original_params(&self) -> &Map<String, Value> {
        &self.original_params
    }

    /// Returns the processed parameters.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns the processed parameters for modification.
    pub fn params_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.params
    }

    /// Returns one processed parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Sets one processed parameter.
    pub fn set_param(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    /// Decodes the processed parameters into `T` with loose coercion.
    ///
    /// Fails with a decoding error (a caller fault) if the shape is
    /// incompatible.
    pub fn scan_params<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        self.scan_params_with(&LooseDecoder)
    }

    /// Decodes the processed parameters into `T` with the given decoder.
    pub fn scan_params_with<T, D>(&self, decoder: &D) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        D: ParamDecoder,
    {
        decoder.decode(&self.params).map_err(ApiError::from)
    }

    /// Queues an action to run after the pipeline finishes.
    ///
    /// Actions run exactly once, in insertion order, whether or not a later
    /// stage faults.
    pub fn add_deferred<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.deferred.push(Box::new(action));
    }

    /// Returns the number of queued deferred actions.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Removes and returns all queued deferred actions.
    pub fn take_deferred(&mut self) -> Vec<DeferredAction> {
        std::mem::take(&mut self.deferred)
    }

    /// Appends a `name: value` breadcrumb included in fault logs.
    pub fn add_log_context(&mut self, name: impl Into<String>, value: impl fmt::Display) {
        self.log_context.push((name.into(), value.to_string()));
    }

    /// Returns the breadcrumbs joined as `name: value; name: value`.
    #[must_use]
    pub fn log_context(&self) -> String {
        self.log_context
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the session was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_core::Session;
    ///
    /// struct Tenant(String);
    ///
    /// let mut session = Session::new();
    /// session.set_extension(Tenant("acme".to_string()));
    /// assert_eq!(session.get_extension::<Tenant>().unwrap().0, "acme");
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("route", &self.route)
            .field("remote_addr", &self.remote_addr)
            .field("caller_id", &self.caller_id)
            .field("lang", &self.lang)
            .field("client_type", &self.client_type)
            .field("params", &self.params)
            .field("deferred", &self.deferred.len())
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}
