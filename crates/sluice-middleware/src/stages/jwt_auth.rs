//! JSON Web Token authentication.
//!
//! [`JwtAuthStrategy`] reads a token from a request header, verifies its
//! signature and expiry, stores the decoded claims on the session, and
//! records the caller id found at the identity claim path.
//!
//! Every failure is reported with the configured message (default
//! `Unauthorized`); the underlying reason goes to the internal message.
//!
//! ## Example
//!
//! ```
//! use sluice_middleware::stages::{JwtAuthStrategy, JwtKey};
//!
//! let strategy = JwtAuthStrategy::builder()
//!     .algorithm("HS256")
//!     .key(JwtKey::Secret(b"change-me".to_vec()))
//!     .header_name("Authorization")
//!     .error_code(2001)
//!     .build()
//!     .unwrap();
//! ```

use crate::strategy::{BoxFuture, Param, Strategy, StrategyBuildError, StrategyResult};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use sluice_core::{ApiError, Session, INTERNAL_ERROR_CODE};
use std::fmt;
use std::str::FromStr;

/// Strategy name.
pub const NAME: &str = "jwtAuth";

/// Default header carrying the token.
pub const DEFAULT_HEADER: &str = "Json-Web-Token";

const DEFAULT_MESSAGE: &str = "Unauthorized";
const BEARER_PREFIX: &str = "Bearer ";

/// Verification key material.
#[derive(Clone)]
pub enum JwtKey {
    /// PEM-encoded public key for RSA, EC, or Ed25519 algorithms.
    Pem(String),
    /// Shared secret for HMAC algorithms.
    Secret(Vec<u8>),
}

impl fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem(_) => f.write_str("JwtKey::Pem(..)"),
            Self::Secret(_) => f.write_str("JwtKey::Secret(<redacted>)"),
        }
    }
}

/// JWT authentication strategy.
pub struct JwtAuthStrategy {
    key: DecodingKey,
    validation: Validation,
    header_name: String,
    identity_claim: Option<Vec<String>>,
    error_code: u64,
    error_msg: String,
}

impl JwtAuthStrategy {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> JwtAuthStrategyBuilder {
        JwtAuthStrategyBuilder::default()
    }

    /// Returns the header the token is read from.
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    fn reject(&self, session: &Session, reason: impl Into<String>) -> ApiError {
        let reason = reason.into();
        tracing::debug!(
            request_id = %session.request_id(),
            reason = %reason,
            "jwt rejected"
        );
        ApiError::auth(self.error_msg.clone()).with_internal_msg(reason)
    }

    fn caller_id(&self, session: &Session, claims: &Value, path: &[String]) -> Result<u64, ApiError> {
        let claim = path
            .iter()
            .try_fold(claims, |value, segment| value.get(segment))
            .filter(|value| !value.is_null())
            .ok_or_else(|| self.reject(session, format!("identity claim `{}` missing", path.join("."))))?;

        match claim {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            self.reject(
                session,
                format!("identity claim `{}` is not an unsigned integer", path.join(".")),
            )
        })
    }
}

impl fmt::Debug for JwtAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtAuthStrategy")
            .field("algorithms", &self.validation.algorithms)
            .field("validate_exp", &self.validation.validate_exp)
            .field("leeway", &self.validation.leeway)
            .field("header_name", &self.header_name)
            .field("identity_claim", &self.identity_claim)
            .field("error_code", &self.error_code)
            .finish_non_exhaustive()
    }
}

impl Strategy for JwtAuthStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "jwt auth"
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
            session.set_jwt_header_name(self.header_name.clone());

            let token = session
                .header(&self.header_name)
                .map(|raw| raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw).trim().to_string())
                .filter(|token| !token.is_empty())
                .ok_or_else(|| self.reject(session, format!("header `{}` missing", self.header_name)))?;

            let claims = decode::<Value>(&token, &self.key, &self.validation)
                .map_err(|e| self.reject(session, e.to_string()))?
                .claims;
            if !claims.is_object() {
                return Err(self.reject(session, "claims are not an object"));
            }

            if let Some(path) = &self.identity_claim {
                let caller_id = self.caller_id(session, &claims, path)?;
                session.set_caller_id(caller_id);
                session.add_log_context(NAME, caller_id);
            }
            session.set_claims(claims);
            Ok(())
        })
    }
}

/// Builder for [`JwtAuthStrategy`].
#[derive(Debug, Clone)]
pub struct JwtAuthStrategyBuilder {
    algorithm: String,
    key: Option<JwtKey>,
    header_name: String,
    no_check_expire: bool,
    leeway_secs: u64,
    identity_claim: Option<Vec<String>>,
    error_code: u64,
    error_msg: String,
}

impl Default for JwtAuthStrategyBuilder {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            key: None,
            header_name: DEFAULT_HEADER.to_string(),
            no_check_expire: false,
            leeway_secs: 0,
            identity_claim: Some(vec!["payload".to_string(), "user_id".to_string()]),
            error_code: INTERNAL_ERROR_CODE,
            error_msg: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl JwtAuthStrategyBuilder {
    /// Sets the signing algorithm by name (`RS256`, `HS256`, `EdDSA`, ...).
    #[must_use]
    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    /// Sets the verification key.
    #[must_use]
    pub fn key(mut self, key: JwtKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Sets the header the token is read from.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Accepts expired tokens and tokens without `exp`.
    #[must_use]
    pub fn no_check_expire(mut self, skip: bool) -> Self {
        self.no_check_expire = skip;
        self
    }

    /// Allows `exp` to lag the clock by this many seconds. Defaults to zero.
    #[must_use]
    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Sets the path of the caller id inside the claims.
    #[must_use]
    pub fn identity_claim<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_claim = Some(path.into_iter().map(Into::into).collect());
        self
    }

    /// Verifies the token without extracting a caller id.
    #[must_use]
    pub fn disable_identity(mut self) -> Self {
        self.identity_claim = None;
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
    /// Returns `StrategyBuildError::UnsupportedAlgorithm` for an unknown
    /// algorithm name and `StrategyBuildError::InvalidKey` if the key is
    /// missing or does not fit the algorithm.
    pub fn build(self) -> Result<JwtAuthStrategy, StrategyBuildError> {
        let algorithm = Algorithm::from_str(&self.algorithm)
            .map_err(|_| StrategyBuildError::UnsupportedAlgorithm(self.algorithm.clone()))?;
        let key = decoding_key(algorithm, self.key.as_ref()).map_err(|reason| {
            StrategyBuildError::InvalidKey {
                algorithm: self.algorithm.clone(),
                reason,
            }
        })?;

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = self.leeway_secs;
        if self.no_check_expire {
            validation.validate_exp = false;
            validation.required_spec_claims.remove("exp");
        }

        Ok(JwtAuthStrategy {
            key,
            validation,
            header_name: self.header_name,
            identity_claim: self.identity_claim,
            error_code: self.error_code,
            error_msg: self.error_msg,
        })
    }
}

fn decoding_key(algorithm: Algorithm, key: Option<&JwtKey>) -> Result<DecodingKey, String> {
    use Algorithm::{EdDSA, ES256, ES384, HS256, HS384, HS512, PS256, PS384, PS512, RS256, RS384, RS512};

    let key = key.ok_or_else(|| "no key configured".to_string())?;
    match (algorithm, key) {
        (HS256 | HS384 | HS512, JwtKey::Secret(secret)) => Ok(DecodingKey::from_secret(secret)),
        (HS256 | HS384 | HS512, JwtKey::Pem(secret)) => Ok(DecodingKey::from_secret(secret.as_bytes())),
        (RS256 | RS384 | RS512 | PS256 | PS384 | PS512, JwtKey::Pem(pem)) => {
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| e.to_string())
        }
        (ES256 | ES384, JwtKey::Pem(pem)) => {
            DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| e.to_string())
        }
        (EdDSA, JwtKey::Pem(pem)) => DecodingKey::from_ed_pem(pem.as_bytes()).map_err(|e| e.to_string()),
        (_, JwtKey::Secret(_)) => Err("asymmetric algorithms need a PEM public key".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use sluice_core::ErrorKind;

    const SECRET: &[u8] = b"test-secret";

    fn hs256() -> JwtAuthStrategyBuilder {
        JwtAuthStrategy::builder()
            .algorithm("HS256")
            .key(JwtKey::Secret(SECRET.to_vec()))
            .error_code(2001)
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

    fn token(claims: &Value) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn session_with(header: &str, value: &str) -> Session {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::HeaderName::from_bytes(header.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        Session::from_request(Method::GET, "/", headers, None)
    }

    async fn run(strategy: &JwtAuthStrategy, session: &mut Session) -> StrategyResult {
        strategy.execute(session, &Param::none()).await
    }

    #[tokio::test]
    async fn test_valid_token_sets_identity() {
        let strategy = hs256().build().unwrap();
        let jwt = token(&json!({"exp": now() + 600, "payload": {"user_id": 42}}));
        let mut session = session_with(DEFAULT_HEADER, &jwt);

        run(&strategy, &mut session).await.unwrap();
        assert_eq!(session.caller_id(), Some(42));
        assert_eq!(session.jwt_header_name(), Some(DEFAULT_HEADER));
        assert_eq!(session.claims().unwrap()["payload"]["user_id"], 42);
        assert_eq!(session.log_context(), "jwtAuth: 42");
    }

    #[tokio::test]
    async fn test_bearer_prefix_and_string_identity() {
        let strategy = hs256().header_name("authorization").build().unwrap();
        let jwt = token(&json!({"exp": now() + 600, "payload": {"user_id": "7"}}));
        let mut session = session_with("authorization", &format!("Bearer {jwt}"));

        run(&strategy, &mut session).await.unwrap();
        assert_eq!(session.caller_id(), Some(7));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let strategy = hs256().build().unwrap();
        let err = run(&strategy, &mut Session::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(err.msg(), "Unauthorized");
        assert!(err.internal_msg().contains("Json-Web-Token"));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let jwt = token(&json!({"exp": now() - 3600, "payload": {"user_id": 1}}));

        let strict = hs256().build().unwrap();
        let err = run(&strict, &mut session_with(DEFAULT_HEADER, &jwt)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.internal_msg().contains("ExpiredSignature"));

        let lenient = hs256().no_check_expire(true).build().unwrap();
        let mut session = session_with(DEFAULT_HEADER, &jwt);
        run(&lenient, &mut session).await.unwrap();
        assert_eq!(session.caller_id(), Some(1));
    }

    #[tokio::test]
    async fn test_recently_expired_token_rejected() {
        let jwt = token(&json!({"exp": now() - 30, "payload": {"user_id": 1}}));

        let err = run(&hs256().build().unwrap(), &mut session_with(DEFAULT_HEADER, &jwt))
            .await
            .unwrap_err();
        assert!(err.internal_msg().contains("ExpiredSignature"));

        let tolerant = hs256().leeway_secs(60).build().unwrap();
        assert!(run(&tolerant, &mut session_with(DEFAULT_HEADER, &jwt)).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_check_expire_accepts_missing_exp() {
        let jwt = token(&json!({"payload": {"user_id": 3}}));
        assert!(run(&hs256().build().unwrap(), &mut session_with(DEFAULT_HEADER, &jwt))
            .await
            .is_err());
        assert!(run(
            &hs256().no_check_expire(true).build().unwrap(),
            &mut session_with(DEFAULT_HEADER, &jwt)
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn test_identity_failures() {
        let strategy = hs256().error_msg("login required").build().unwrap();

        let missing = token(&json!({"exp": now() + 600, "payload": {}}));
        let err = run(&strategy, &mut session_with(DEFAULT_HEADER, &missing)).await.unwrap_err();
        assert_eq!(err.msg(), "login required");
        assert!(err.internal_msg().contains("payload.user_id"));

        let negative = token(&json!({"exp": now() + 600, "payload": {"user_id": -5}}));
        let err = run(&strategy, &mut session_with(DEFAULT_HEADER, &negative)).await.unwrap_err();
        assert!(err.internal_msg().contains("not an unsigned integer"));

        let disabled = hs256().disable_identity().build().unwrap();
        let mut session = session_with(DEFAULT_HEADER, &missing);
        run(&disabled, &mut session).await.unwrap();
        assert_eq!(session.caller_id(), None);
        assert!(session.claims().is_some());
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let jwt = encode(
            &Header::new(Algorithm::HS256),
            &json!({"exp": now() + 600, "payload": {"user_id": 1}}),
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        let err = run(&hs256().build().unwrap(), &mut session_with(DEFAULT_HEADER, &jwt))
            .await
            .unwrap_err();
        assert!(err.internal_msg().contains("InvalidSignature"));
    }

    #[tokio::test]
    async fn test_rs256_round_trip() {
        let private = include_str!("../../tests/fixtures/rsa_private.pem");
        let public = include_str!("../../tests/fixtures/rsa_public.pem");

        let strategy = JwtAuthStrategy::builder()
            .key(JwtKey::Pem(public.to_string()))
            .identity_claim(["sub"])
            .build()
            .unwrap();
        let jwt = encode(
            &Header::new(Algorithm::RS256),
            &json!({"exp": now() + 600, "sub": "99"}),
            &EncodingKey::from_rsa_pem(private.as_bytes()).unwrap(),
        )
        .unwrap();

        let mut session = session_with(DEFAULT_HEADER, &jwt);
        run(&strategy, &mut session).await.unwrap();
        assert_eq!(session.caller_id(), Some(99));
    }

    #[test]
    fn test_build_errors() {
        assert!(matches!(
            JwtAuthStrategy::builder().algorithm("XX999").build(),
            Err(StrategyBuildError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            JwtAuthStrategy::builder().build(),
            Err(StrategyBuildError::InvalidKey { .. })
        ));
        assert!(matches!(
            JwtAuthStrategy::builder()
                .key(JwtKey::Pem("not a pem".to_string()))
                .build(),
            Err(StrategyBuildError::InvalidKey { .. })
        ));
        assert!(matches!(
            JwtAuthStrategy::builder()
                .key(JwtKey::Secret(b"s".to_vec()))
                .build(),
            Err(StrategyBuildError::InvalidKey { .. })
        ));
    }
}
