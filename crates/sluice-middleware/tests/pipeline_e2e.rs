//! End-to-end pipeline tests.
//!
//! Requests run through a [`Service`] with real strategies: global
//! registration, route declaration, short-circuiting, code resolution,
//! deferred actions, and the built-in strategies working together.

use http::{HeaderMap, HeaderValue, Method, StatusCode};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Deserialize;
use serde_json::{json, Value};
use sluice_core::{ApiError, Reply, Session, INTERNAL_ERROR_CODE};
use sluice_middleware::stages::{
    FieldRule, FieldType, IpFilterStrategy, JwtAuthStrategy, JwtKey, ParamSchema,
    ParamValidateStrategy, RateLimitStrategy, StatsStrategy,
};
use sluice_middleware::{
    ApiDescriptor, ApiDescriptorBuilder, ApiMethod, Executor, FnStrategy, Param, Service, Strategy,
    StrategyRegistry, NOT_FOUND_MESSAGE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SECRET: &[u8] = b"e2e-secret";

/// Records the order in which strategies and handlers run.
#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn push(&self, step: impl Into<String>) {
        self.0.lock().unwrap().push(step.into());
    }

    fn steps(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn passing(name: &'static str, trace: &Trace) -> Arc<dyn Strategy> {
    let trace = trace.clone();
    Arc::new(FnStrategy::new(name, name, 3000, move |session, _param| {
        let trace = trace.clone();
        Box::pin(async move {
            trace.push(name);
            let deferred = trace.clone();
            session.add_deferred(move || deferred.push(format!("deferred:{name}")));
            Ok(())
        })
    }))
}

fn failing(name: &'static str, code: u64, err: fn() -> ApiError, trace: &Trace) -> Arc<dyn Strategy> {
    let trace = trace.clone();
    Arc::new(FnStrategy::new(name, name, code, move |_session, _param| {
        let trace = trace.clone();
        Box::pin(async move {
            trace.push(name);
            Err(err())
        })
    }))
}

fn traced_handler(path: &str, trace: &Trace) -> ApiDescriptorBuilder {
    let trace = trace.clone();
    ApiDescriptor::builder(ApiMethod::Post, path, move |_session| {
        let trace = trace.clone();
        Box::pin(async move {
            trace.push("handler");
            Ok(Some(json!("done")))
        })
    })
}

fn request(method: Method, path: &str, headers: &[(&str, String)], params: Value) -> Session {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Session::from_request(method, path, map, Some("10.0.0.5".parse().unwrap()))
        .with_params(params.as_object().cloned().unwrap_or_default())
}

fn envelope(reply: &Reply) -> &sluice_core::ApiResult {
    reply.envelope.as_ref().expect("envelope written")
}

fn now() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

fn jwt(user_id: u64, exp_offset: i64) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({"exp": now() + exp_offset, "payload": {"user_id": user_id}}),
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

fn jwt_strategy(no_check_expire: bool) -> Arc<dyn Strategy> {
    Arc::new(
        JwtAuthStrategy::builder()
            .algorithm("HS256")
            .key(JwtKey::Secret(SECRET.to_vec()))
            .no_check_expire(no_check_expire)
            .error_code(2001)
            .build()
            .unwrap(),
    )
}

// =============================================================================
// Ordering and short-circuit
// =============================================================================

#[tokio::test]
async fn test_global_then_route_then_handler_then_deferred() {
    let trace = Trace::default();
    let mut registry = StrategyRegistry::new();
    registry
        .register_global(passing("g1", &trace), Param::none(), false)
        .register_global(passing("g2", &trace), Param::none(), false);

    let service = Service::builder("svc")
        .executor(Executor::builder().registry(&registry).build())
        .route(
            traced_handler("/order", &trace)
                .strategy(passing("r1", &trace), Param::none())
                .build(),
        )
        .build();

    let reply = service
        .dispatch(request(Method::POST, "/order", &[], json!({})))
        .await;

    assert!(envelope(&reply).is_success());
    assert_eq!(
        trace.steps(),
        vec!["g1", "g2", "r1", "handler", "deferred:g1", "deferred:g2", "deferred:r1"]
    );
}

#[tokio::test]
async fn test_disabled_strategies_are_skipped() {
    let trace = Trace::default();
    let mut registry = StrategyRegistry::new();
    registry.register_global(
        failing("off-global", 9, || ApiError::forbidden("no"), &trace),
        Param::none(),
        true,
    );

    let service = Service::builder("svc")
        .executor(Executor::builder().registry(&registry).build())
        .route(
            traced_handler("/x", &trace)
                .register(
                    failing("off-route", 9, || ApiError::forbidden("no"), &trace),
                    Param::none(),
                    true,
                )
                .build(),
        )
        .build();

    let reply = service.dispatch(request(Method::POST, "/x", &[], json!({}))).await;
    assert!(envelope(&reply).is_success());
    assert_eq!(trace.steps(), vec!["handler"]);
}

#[tokio::test]
async fn test_failure_short_circuits_but_runs_prior_deferred() {
    let trace = Trace::default();
    let service = Service::builder("svc")
        .route(
            traced_handler("/x", &trace)
                .strategy(passing("first", &trace), Param::none())
                .strategy(
                    failing("second", 2002, || ApiError::forbidden("denied"), &trace),
                    Param::none(),
                )
                .strategy(passing("third", &trace), Param::none())
                .build(),
        )
        .build();

    let reply = service.dispatch(request(Method::POST, "/x", &[], json!({}))).await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(envelope(&reply).code, 2002);
    assert_eq!(trace.steps(), vec!["first", "second", "deferred:first"]);
}

#[tokio::test]
async fn test_route_can_ignore_global_strategies() {
    let trace = Trace::default();
    let executor = Executor::builder()
        .global(
            failing("gate", 2010, || ApiError::forbidden("closed"), &trace),
            Param::none(),
        )
        .build();
    let service = Service::builder("svc")
        .executor(executor)
        .route(traced_handler("/open", &trace).ignore_global_strategies(true).build())
        .route(traced_handler("/closed", &trace).build())
        .build();

    let open = service.dispatch(request(Method::POST, "/open", &[], json!({}))).await;
    assert!(envelope(&open).is_success());

    let closed = service.dispatch(request(Method::POST, "/closed", &[], json!({}))).await;
    assert_eq!(envelope(&closed).code, 2010);
}

// =============================================================================
// Code resolution and rendering
// =============================================================================

#[tokio::test]
async fn test_unclassified_failure_takes_strategy_default() {
    let trace = Trace::default();
    let service = Service::builder("svc")
        .route(
            traced_handler("/x", &trace)
                .strategy(
                    failing("limit", 2006, || ApiError::rate_limited("slow down"), &trace),
                    Param::none(),
                )
                .build(),
        )
        .build();

    let reply = service.dispatch(request(Method::POST, "/x", &[], json!({}))).await;
    assert_eq!(envelope(&reply).code, 2006);
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_explicit_code_is_kept() {
    let trace = Trace::default();
    let service = Service::builder("svc")
        .route(
            traced_handler("/x", &trace)
                .strategy(
                    failing(
                        "explicit",
                        2006,
                        || ApiError::forbidden("vip only").with_code(5001),
                        &trace,
                    ),
                    Param::none(),
                )
                .build(),
        )
        .build();

    let reply = service.dispatch(request(Method::POST, "/x", &[], json!({}))).await;
    assert_eq!(envelope(&reply).code, 5001);
}

#[tokio::test]
async fn test_debug_mode_controls_internal_msg() {
    let trace = Trace::default();
    let strategy = failing(
        "leaky",
        2004,
        || ApiError::internal("table users is locked"),
        &trace,
    );

    for (debug, expected) in [(false, ""), (true, "table users is locked")] {
        let service = Service::builder("svc")
            .executor(Executor::builder().debug(debug).build())
            .route(
                traced_handler("/x", &trace)
                    .strategy(strategy.clone(), Param::none())
                    .build(),
            )
            .build();
        let reply = service.dispatch(request(Method::POST, "/x", &[], json!({}))).await;
        let envelope = envelope(&reply);
        assert_eq!(envelope.internal_msg, expected);
        assert_eq!(envelope.msg, "internal error");
        assert_eq!(envelope.code, 2004);
    }
}

#[tokio::test]
async fn test_handler_fault_uses_generic_internal_code() {
    let service = Service::builder("svc")
        .route(
            ApiDescriptor::builder(ApiMethod::Get, "/boom", |_session| {
                Box::pin(async { Err(ApiError::internal("nil pointer")) })
            })
            .build(),
        )
        .build();

    let reply = service.dispatch(request(Method::GET, "/boom", &[], json!({}))).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(envelope(&reply).code, INTERNAL_ERROR_CODE);
}

// =============================================================================
// JWT
// =============================================================================

#[tokio::test]
async fn test_expired_jwt_depends_on_expiry_check() {
    let expired = jwt(5, -3600);

    for (no_check_expire, expect_ok) in [(false, false), (true, true)] {
        let service = Service::builder("svc")
            .route(
                ApiDescriptor::builder(ApiMethod::Get, "/me", |session| {
                    Box::pin(async move { Ok(Some(json!({"id": session.caller_id()}))) })
                })
                .strategy(jwt_strategy(no_check_expire), Param::none())
                .build(),
            )
            .build();

        let reply = service
            .dispatch(request(
                Method::GET,
                "/me",
                &[("Json-Web-Token", expired.clone())],
                json!({}),
            ))
            .await;
        let envelope = envelope(&reply);

        if expect_ok {
            assert_eq!(envelope.data, json!({"id": 5}));
        } else {
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
            assert_eq!(envelope.code, 2001);
            assert_eq!(envelope.msg, "Unauthorized");
        }
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_double_spend() {
    let limiter = Arc::new(
        RateLimitStrategy::builder()
            .capacity(1)
            .interval(Duration::from_secs(3600))
            .error_code(2006)
            .build()
            .unwrap(),
    );
    let service = Service::builder("svc")
        .route(
            ApiDescriptor::builder(ApiMethod::Get, "/once", |_session| {
                Box::pin(async { Ok(Some(json!("granted"))) })
            })
            .strategy(limiter, Param::none())
            .build(),
        )
        .build();

    let handles: Vec<_> = (0..32)
        .map(|_| service.spawn(request(Method::GET, "/once", &[], json!({}))))
        .collect();

    let mut granted = 0;
    let mut limited = 0;
    for handle in handles {
        let reply = handle.await.unwrap();
        match envelope(&reply).code {
            0 => granted += 1,
            2006 => limited += 1,
            other => panic!("unexpected code {other}"),
        }
    }
    assert_eq!(granted, 1);
    assert_eq!(limited, 31);
}

#[tokio::test(start_paused = true)]
async fn test_bucket_refills_after_interval() {
    let limiter = Arc::new(
        RateLimitStrategy::builder()
            .capacity(1)
            .interval(Duration::from_secs(1))
            .error_code(2006)
            .build()
            .unwrap(),
    );
    let service = Service::builder("svc")
        .route(
            ApiDescriptor::builder(ApiMethod::Get, "/tick", |_session| {
                Box::pin(async { Ok(Some(json!("ok"))) })
            })
            .strategy(limiter, Param::none())
            .build(),
        )
        .build();
    let call = || service.dispatch(request(Method::GET, "/tick", &[], json!({})));

    assert_eq!(call().await.code(), 0);
    assert_eq!(call().await.code(), 2006);

    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(call().await.code(), 2006);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(call().await.code(), 0);
}

// =============================================================================
// Full stack
// =============================================================================

#[derive(Debug, Deserialize)]
struct TransferParams {
    amount: u64,
    to: String,
}

fn transfer_service(counter: Arc<AtomicUsize>) -> Service {
    let mut registry = StrategyRegistry::new();
    registry
        .register_global(Arc::new(StatsStrategy::new()), Param::none(), false)
        .register_global(
            Arc::new(
                IpFilterStrategy::builder()
                    .deny("192.0.2.0/24")
                    .error_code(2003)
                    .build()
                    .unwrap(),
            ),
            Param::none(),
            false,
        );

    let limiter = Arc::new(
        RateLimitStrategy::builder()
            .capacity(2)
            .interval(Duration::from_secs(60))
            .error_code(2006)
            .build()
            .unwrap(),
    );
    let schema = ParamSchema::new()
        .field("amount", FieldRule::new(FieldType::Integer).required().range(1.0, 10_000.0))
        .field("to", FieldRule::new(FieldType::String).required().length(3, 32));

    Service::builder("payments")
        .root_path("/api")
        .executor(Executor::builder().registry(&registry).debug(true).build())
        .route(
            ApiDescriptor::builder(ApiMethod::Post, "/transfer", move |session| {
                let counter = counter.clone();
                Box::pin(async move {
                    let params: TransferParams = session.scan_params()?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(json!({
                        "from": session.caller_id(),
                        "to": params.to,
                        "amount": params.amount,
                    })))
                })
            })
            .strategy(limiter, Param::none())
            .strategy(jwt_strategy(false), Param::none())
            .strategy(
                Arc::new(ParamValidateStrategy::new().with_error_code(2005)),
                Param::new(schema),
            )
            .build(),
        )
        .build()
}

#[tokio::test]
async fn test_rate_limit_jwt_validate_stack() {
    let handled = Arc::new(AtomicUsize::new(0));
    let service = transfer_service(handled.clone());
    let token = jwt(42, 600);
    let auth = [("Json-Web-Token", token)];

    // valid request, amount arrives as a string and is coerced
    let reply = service
        .dispatch(request(
            Method::POST,
            "/api/transfer",
            &auth,
            json!({"amount": "250", "to": "bob"}),
        ))
        .await;
    assert_eq!(
        envelope(&reply).data,
        json!({"from": 42, "to": "bob", "amount": 250})
    );

    // validation failure carries the field and rule
    let reply = service
        .dispatch(request(
            Method::POST,
            "/api/transfer",
            &auth,
            json!({"amount": 0, "to": "bob"}),
        ))
        .await;
    let failed = envelope(&reply);
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(failed.code, 2005);
    assert_eq!(failed.data, json!({"field": "amount", "rule": "min"}));

    // bucket (capacity 2) is now empty for this address
    let reply = service
        .dispatch(request(
            Method::POST,
            "/api/transfer",
            &auth,
            json!({"amount": 1, "to": "bob"}),
        ))
        .await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(envelope(&reply).code, 2006);

    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_request_limited_before_auth_runs() {
    let trace = Trace::default();
    let limiter = Arc::new(
        RateLimitStrategy::builder()
            .capacity(1)
            .interval(Duration::from_secs(1))
            .error_code(2006)
            .build()
            .unwrap(),
    );
    let service = Service::builder("svc")
        .route(
            traced_handler("/pay", &trace)
                .strategy(limiter, Param::none())
                .strategy(jwt_strategy(false), Param::none())
                .strategy(
                    Arc::new(ParamValidateStrategy::new().with_error_code(2005)),
                    Param::new(
                        ParamSchema::new().field("amount", FieldRule::new(FieldType::Integer).required()),
                    ),
                )
                .build(),
        )
        .build();

    let first = service
        .dispatch(request(
            Method::POST,
            "/pay",
            &[("Json-Web-Token", jwt(7, 600))],
            json!({"amount": 5}),
        ))
        .await;
    assert_eq!(first.code(), 0);

    // no token and no params: only the limiter can answer
    let second = service
        .dispatch(request(Method::POST, "/pay", &[], json!({})))
        .await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.code(), 2006);
    assert_eq!(trace.steps(), vec!["handler"]);
}

#[tokio::test]
async fn test_stack_rejects_missing_token_before_validation() {
    let service = transfer_service(Arc::new(AtomicUsize::new(0)));
    let reply = service
        .dispatch(request(Method::POST, "/api/transfer", &[], json!({})))
        .await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    let envelope = envelope(&reply);
    assert_eq!(envelope.code, 2001);
    assert!(envelope.internal_msg.contains("Json-Web-Token"));
}

#[tokio::test]
async fn test_global_ip_filter_runs_before_route_strategies() {
    let service = transfer_service(Arc::new(AtomicUsize::new(0)));
    let session = Session::from_request(
        Method::POST,
        "/api/transfer",
        HeaderMap::new(),
        Some("192.0.2.10".parse().unwrap()),
    );

    let reply = service.dispatch(session).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(envelope(&reply).code, 2003);
}

#[tokio::test]
async fn test_unknown_route() {
    let service = transfer_service(Arc::new(AtomicUsize::new(0)));
    let reply = service
        .dispatch(request(Method::GET, "/api/nothing", &[], json!({})))
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let envelope = envelope(&reply);
    assert_eq!(envelope.msg, NOT_FOUND_MESSAGE);
    assert_eq!(envelope.code, INTERNAL_ERROR_CODE);
}
