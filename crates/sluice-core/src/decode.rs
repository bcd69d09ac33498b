//! Loose parameter decoding.
//!
//! Request parameters arrive as a JSON object whose leaf types depend on the
//! transport: a query string yields strings, a JSON body yields numbers and
//! booleans. [`LooseDecoder`] populates a typed destination from such a
//! mapping, coercing scalars where the destination asks for a different
//! scalar type:
//!
//! | Source | Destination | Result |
//! |--------|-------------|--------|
//! | `"42"` | integer | `42` |
//! | `"1.5"` | float | `1.5` |
//! | `""` | number | `0` |
//! | `true` | integer | `1` |
//! | `"true"`, `"1"`, `"t"` | bool | `true` |
//! | `0`, `1` | bool | `false`, `true` |
//! | `42` | string | `"42"` |
//! | `true` | string | `"1"` |
//! | scalar | sequence | one-element sequence |
//! | `[]` | map | empty map |
//!
//! Field names follow the destination's serde attributes.

use serde::de::{self, DeserializeOwned, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::error::ApiError;

/// Error produced when parameters cannot be decoded into the destination.
#[derive(Debug, Error)]
#[error("invalid parameters: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a decode error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description of the incompatibility.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        ApiError::decoding(err.to_string())
    }
}

/// Decodes a loosely-typed parameter mapping into a typed destination.
pub trait ParamDecoder: Send + Sync {
    /// Populates `T` from `params` or fails with a [`DecodeError`].
    fn decode<T: DeserializeOwned>(&self, params: &Map<String, Value>) -> Result<T, DecodeError>;
}

/// The default [`ParamDecoder`], applying weak scalar coercion.
///
/// # Example
///
/// ```
/// use serde::Deserialize;
/// use serde_json::json;
/// use sluice_core::{LooseDecoder, ParamDecoder};
///
/// #[derive(Deserialize)]
/// struct Page {
///     page: u32,
///     size: u32,
/// }
///
/// let params = json!({"page": "2", "size": 50});
/// let page: Page = LooseDecoder.decode(params.as_object().unwrap()).unwrap();
/// assert_eq!(page.page, 2);
/// assert_eq!(page.size, 50);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LooseDecoder;

impl ParamDecoder for LooseDecoder {
    fn decode<T: DeserializeOwned>(&self, params: &Map<String, Value>) -> Result<T, DecodeError> {
        T::deserialize(Loose(Value::Object(params.clone()))).map_err(DecodeError::from)
    }
}

type Error = serde_json::Error;

/// A `Deserializer` over an owned JSON value that coerces scalars on demand.
struct Loose(Value);

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_integer(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn coerce_integer(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Value::from(0)
            } else if let Ok(i) = t.parse::<i64>() {
                Value::from(i)
            } else if let Ok(u) = t.parse::<u64>() {
                Value::from(u)
            } else if let Some(v) = t.parse::<f64>().ok().and_then(float_to_integer) {
                v
            } else {
                Value::String(s)
            }
        }
        Value::Bool(b) => Value::from(u8::from(b)),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .and_then(float_to_integer)
            .unwrap_or(Value::Number(n)),
        other => other,
    }
}

fn coerce_float(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Value::from(0.0)
            } else {
                t.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map_or(Value::String(s), Value::Number)
            }
        }
        Value::Bool(b) => Value::from(if b { 1.0 } else { 0.0 }),
        other => other,
    }
}

fn coerce_bool(value: Value) -> Value {
    match value {
        Value::String(s) => parse_bool(&s).map_or(Value::String(s), Value::Bool),
        Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        other => other,
    }
}

fn coerce_string(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(if b { "1" } else { "0" }.to_string()),
        other => other,
    }
}

macro_rules! deserialize_integer {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                coerce_integer(self.0).$method(visitor)
            }
        )*
    };
}

macro_rules! deserialize_float {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                coerce_float(self.0).$method(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Loose {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Array(items) => visitor.visit_seq(LooseSeq::new(items)),
            Value::Object(map) => visitor.visit_map(LooseMap::new(map)),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        coerce_bool(self.0).deserialize_bool(visitor)
    }

    deserialize_integer! {
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64 deserialize_i128
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_u128
    }

    deserialize_float! { deserialize_f32 deserialize_f64 }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        coerce_string(self.0).deserialize_char(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        coerce_string(self.0).deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        coerce_string(self.0).deserialize_string(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.0.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.0.deserialize_byte_buf(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(Loose(other)),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.0.deserialize_unit(visitor)
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.0.deserialize_unit_struct(name, visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Array(items) => visitor.visit_seq(LooseSeq::new(items)),
            Value::Null => visitor.visit_seq(LooseSeq::new(Vec::new())),
            Value::Object(map) => Value::Object(map).deserialize_seq(visitor),
            scalar => visitor.visit_seq(LooseSeq::new(vec![scalar])),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Object(map) => visitor.visit_map(LooseMap::new(map)),
            Value::Array(items) if items.is_empty() => visitor.visit_map(LooseMap::new(Map::new())),
            other => other.deserialize_map(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.0.deserialize_enum(name, variants, visitor)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }
}

struct LooseSeq {
    iter: std::vec::IntoIter<Value>,
}

impl LooseSeq {
    fn new(items: Vec<Value>) -> Self {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<'de> SeqAccess<'de> for LooseSeq {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        self.iter
            .next()
            .map(|value| seed.deserialize(Loose(value)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct LooseMap {
    iter: serde_json::map::IntoIter,
    value: Option<Value>,
}

impl LooseMap {
    fn new(map: Map<String, Value>) -> Self {
        Self {
            iter: map.into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for LooseMap {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Loose(Value::String(key))).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        match self.value.take() {
            Some(value) => seed.deserialize(Loose(value)),
            None => Err(de::Error::custom("value is missing")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}
