//! Parameter validation.
//!
//! [`ParamValidateStrategy`] checks the session's processed parameters
//! against a [`ParamSchema`] passed as the invocation [`Param`]. Values are
//! matched loosely: `"42"` satisfies an integer field and `"true"` a boolean
//! one. A loosely matched value is rewritten to its typed form in the
//! processed parameters; the original parameters are left untouched.
//!
//! The first violation stops the request with a validation error whose data
//! names the field and the rule.
//!
//! # Example
//!
//! ```
//! use sluice_middleware::stages::{FieldRule, FieldType, ParamSchema};
//!
//! let schema = ParamSchema::new()
//!     .field("name", FieldRule::new(FieldType::String).required().length(1, 32))
//!     .field("age", FieldRule::new(FieldType::Integer).range(0.0, 150.0));
//! assert_eq!(schema.len(), 2);
//! ```

use crate::strategy::{BoxFuture, Param, Strategy, StrategyBuildError, StrategyResult};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{json, Map, Number, Value};
use sluice_core::{ApiError, Session, INTERNAL_ERROR_CODE};
use std::fmt;

/// Strategy name.
pub const NAME: &str = "paramValidate";

/// Expected type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A string, or a number rendered as one.
    String,
    /// An integer or an integer string.
    Integer,
    /// Any number or numeric string.
    Number,
    /// A boolean, `"true"`/`"false"`, or `"1"`/`"0"`.
    Bool,
    /// An array.
    Array,
    /// An object.
    Object,
    /// Anything.
    Any,
}

impl FieldType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Returns the value in this type's canonical form, or `None` on mismatch.
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Any, v) => Some(v.clone()),
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| s.trim().parse::<u64>().ok().map(Value::from)),
            (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (Self::Bool, Value::Bool(_)) => Some(value.clone()),
            (Self::Bool, Value::String(s)) => match s.trim() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Array, Value::Array(_)) | (Self::Object, Value::Object(_)) => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

/// Constraints on one parameter.
#[derive(Debug, Clone)]
pub struct FieldRule {
    field_type: FieldType,
    required: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    one_of: Vec<Value>,
    pattern: Option<Regex>,
}

impl FieldRule {
    /// Creates an optional field of the given type.
    #[must_use]
    pub const fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            one_of: Vec::new(),
            pattern: None,
        }
    }

    /// Marks the field as required. `null` counts as missing.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Bounds the character count of a string or the length of an array.
    #[must_use]
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    /// Sets only the minimum length.
    #[must_use]
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    /// Bounds a numeric value, inclusive.
    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Restricts the value to a fixed set.
    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.one_of = values.into_iter().collect();
        self
    }

    /// Requires a string value to match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `StrategyBuildError::InvalidRule` if the pattern does not compile.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, StrategyBuildError> {
        let regex = Regex::new(pattern).map_err(|e| StrategyBuildError::invalid_rule(pattern, e))?;
        self.pattern = Some(regex);
        Ok(self)
    }

    fn check(&self, value: &Value) -> Result<Value, Violation> {
        let value = self
            .field_type
            .coerce(value)
            .ok_or_else(|| Violation::new("type", format!("must be {}", self.field_type.as_str())))?;

        let length = match &value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        };
        if let (Some(len), Some(min)) = (length, self.min_length) {
            if len < min {
                return Err(Violation::new("min_length", format!("must be at least {min} long")));
            }
        }
        if let (Some(len), Some(max)) = (length, self.max_length) {
            if len > max {
                return Err(Violation::new("max_length", format!("must be at most {max} long")));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min.filter(|min| n < *min) {
                return Err(Violation::new("min", format!("must be >= {min}")));
            }
            if let Some(max) = self.max.filter(|max| n > *max) {
                return Err(Violation::new("max", format!("must be <= {max}")));
            }
        }

        if !self.one_of.is_empty() && !self.one_of.contains(&value) {
            return Err(Violation::new("one_of", "is not an allowed value"));
        }

        if let (Some(regex), Value::String(s)) = (&self.pattern, &value) {
            if !regex.is_match(s) {
                return Err(Violation::new("pattern", format!("must match {}", regex.as_str())));
            }
        }

        Ok(value)
    }
}

struct Violation {
    rule: &'static str,
    reason: String,
}

impl Violation {
    fn new(rule: &'static str, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

/// Ordered field rules.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    fields: IndexMap<String, FieldRule>,
}

impl ParamSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field. Fields are checked in insertion order.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks `params`, rewriting loosely matched values in place.
    fn apply(&self, params: &mut Map<String, Value>) -> Result<(), (String, Violation)> {
        for (name, rule) in &self.fields {
            match params.get(name) {
                None | Some(Value::Null) => {
                    if rule.required {
                        return Err((name.clone(), Violation::new("required", "is required")));
                    }
                }
                Some(value) => {
                    let coerced = rule.check(value).map_err(|v| (name.clone(), v))?;
                    params.insert(name.clone(), coerced);
                }
            }
        }
        Ok(())
    }
}

/// Strategy validating parameters against a [`ParamSchema`].
pub struct ParamValidateStrategy {
    default_schema: Option<ParamSchema>,
    error_code: u64,
    error_msg: Option<String>,
}

impl ParamValidateStrategy {
    /// Creates a strategy with the unclassified default code.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_schema: None,
            error_code: INTERNAL_ERROR_CODE,
            error_msg: None,
        }
    }

    /// Sets the default error code.
    #[must_use]
    pub fn with_error_code(mut self, code: u64) -> Self {
        self.error_code = code;
        self
    }

    /// Replaces the per-field message with a fixed one.
    ///
    /// The per-field detail moves to the internal message.
    #[must_use]
    pub fn with_error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Sets the schema used when the invocation carries none.
    #[must_use]
    pub fn with_default_schema(mut self, schema: ParamSchema) -> Self {
        self.default_schema = Some(schema);
        self
    }
}

impl Default for ParamValidateStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ParamValidateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamValidateStrategy")
            .field("error_code", &self.error_code)
            .field("error_msg", &self.error_msg)
            .field("default_schema", &self.default_schema.is_some())
            .finish()
    }
}

impl Strategy for ParamValidateStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "validates request parameters"
    }

    fn error_code(&self) -> u64 {
        self.error_code
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut Session,
        param: &'a Param,
    ) -> BoxFuture<'a, StrategyResult> {
        Box::pin(async move {
            let Some(schema) = param.get::<ParamSchema>().or(self.default_schema.as_ref()) else {
                tracing::debug!(request_id = %session.request_id(), "no parameter schema");
                return Ok(());
            };

            let Err((field, violation)) = schema.apply(session.params_mut()) else {
                return Ok(());
            };

            let detail = format!("param `{field}` {}", violation.reason);
            session.add_log_context(NAME, &detail);
            let err = match &self.error_msg {
                Some(msg) => ApiError::validation(msg.clone()).with_internal_msg(detail),
                None => ApiError::validation(detail),
            };
            Err(err.with_data(json!({"field": field, "rule": violation.rule})))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ErrorKind;

    fn session(params: Value) -> Session {
        Session::new().with_params(params.as_object().cloned().unwrap())
    }

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field("name", FieldRule::new(FieldType::String).required().length(2, 8))
            .field("age", FieldRule::new(FieldType::Integer).range(0.0, 150.0))
            .field(
                "role",
                FieldRule::new(FieldType::String).one_of([json!("admin"), json!("user")]),
            )
            .field(
                "code",
                FieldRule::new(FieldType::String).pattern("^[A-Z]{3}$").unwrap(),
            )
    }

    async fn run(strategy: &ParamValidateStrategy, params: Value) -> Result<Session, ApiError> {
        let mut session = session(params);
        let param = Param::new(schema());
        strategy.execute(&mut session, &param).await?;
        Ok(session)
    }

    /// Returns `field:rule` of the first violation.
    async fn violation(params: Value) -> String {
        let err = run(&ParamValidateStrategy::new(), params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let data = err.data().unwrap();
        format!("{}:{}", data["field"].as_str().unwrap(), data["rule"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_valid_params_are_coerced() {
        let session = run(
            &ParamValidateStrategy::new(),
            json!({"name": "ada", "age": "36", "role": "admin", "code": "ABC"}),
        )
        .await
        .unwrap();

        assert_eq!(session.param("age"), Some(&json!(36)));
        assert_eq!(session.original_params()["age"], json!("36"));
    }

    #[tokio::test]
    async fn test_each_rule_reports_field() {
        assert_eq!(violation(json!({})).await, "name:required");
        assert_eq!(violation(json!({"name": null})).await, "name:required");
        assert_eq!(violation(json!({"name": "a"})).await, "name:min_length");
        assert_eq!(violation(json!({"name": "abcdefghi"})).await, "name:max_length");
        assert_eq!(violation(json!({"name": "ada", "age": "old"})).await, "age:type");
        assert_eq!(violation(json!({"name": "ada", "age": 200})).await, "age:max");
        assert_eq!(violation(json!({"name": "ada", "age": -1})).await, "age:min");
        assert_eq!(violation(json!({"name": "ada", "role": "root"})).await, "role:one_of");
        assert_eq!(violation(json!({"name": "ada", "code": "abc"})).await, "code:pattern");
    }

    #[tokio::test]
    async fn test_fixed_message_moves_detail_inside() {
        let strategy = ParamValidateStrategy::new()
            .with_error_code(2005)
            .with_error_msg("invalid parameters");
        let err = run(&strategy, json!({})).await.unwrap_err();
        assert_eq!(err.msg(), "invalid parameters");
        assert_eq!(err.internal_msg(), "param `name` is required");
        assert_eq!(strategy.error_code(), 2005);
    }

    #[tokio::test]
    async fn test_default_schema_and_missing_schema() {
        let mut session = session(json!({}));
        ParamValidateStrategy::new()
            .execute(&mut session, &Param::none())
            .await
            .unwrap();

        let strategy = ParamValidateStrategy::new().with_default_schema(schema());
        assert!(strategy.execute(&mut session, &Param::none()).await.is_err());
    }

    #[test]
    fn test_loose_type_matching() {
        assert_eq!(FieldType::Bool.coerce(&json!("1")), Some(json!(true)));
        assert_eq!(FieldType::Bool.coerce(&json!("yes")), None);
        assert_eq!(FieldType::Number.coerce(&json!("2.5")), Some(json!(2.5)));
        assert_eq!(FieldType::String.coerce(&json!(7)), Some(json!("7")));
        assert_eq!(FieldType::Integer.coerce(&json!(1.5)), None);
        assert_eq!(FieldType::Array.coerce(&json!({})), None);
    }

    #[test]
    fn test_bad_pattern_is_build_error() {
        assert!(FieldRule::new(FieldType::String).pattern("(").is_err());
    }
}
