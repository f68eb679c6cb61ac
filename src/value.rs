//! Value Tree - the data every step and deferred value is made of
//!
//! JSON-shaped data plus opaque handles that only resolution produces.
//! A mapping carrying the [`DEFERRED_KEY`] is a deferred expression.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::raster::{Canvas, FontHandle};

/// Reserved key marking a mapping as a deferred expression.
pub const DEFERRED_KEY: &str = "deferred";

pub type Mapping = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
    Handle(Handle),
}

/// Resources produced during resolution. Never present in source JSON.
#[derive(Debug, Clone)]
pub enum Handle {
    Image(Canvas),
    Font(FontHandle),
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Handle::Image(a), Handle::Image(b)) => a.same_as(b),
            (Handle::Font(a), Handle::Font(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Image(canvas) => write!(f, "<image {}x{}>", canvas.width(), canvas.height()),
            Handle::Font(font) => write!(f, "<font {}px>", font.size()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Mapping(a), Value::Mapping(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from_json).collect())
            }
            Json::Object(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Handles become descriptive strings; non-finite numbers become null.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Sequence(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Mapping(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Handle(handle) => Json::String(handle.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Handle(Handle::Image(_)) => "image",
            Value::Handle(Handle::Font(_)) => "font",
        }
    }

    /// The deferred expression tag, if this value is one.
    pub fn deferred_kind(&self) -> EngineResult<Option<&str>> {
        let Value::Mapping(map) = self else {
            return Ok(None);
        };
        match map.get(DEFERRED_KEY) {
            None => Ok(None),
            Some(Value::String(kind)) => Ok(Some(kind)),
            Some(other) => Err(EngineError::invalid(DEFERRED_KEY, "string", other.type_name())),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Sequence(items) => !items.is_empty(),
            Value::Mapping(map) => !map.is_empty(),
            Value::Handle(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    // --- Typed accessors for resolved parameters ---

    pub fn expect_str(&self, parameter: &str) -> EngineResult<&str> {
        self.as_str()
            .ok_or_else(|| EngineError::invalid(parameter, "string", self.type_name()))
    }

    pub fn expect_f64(&self, parameter: &str) -> EngineResult<f64> {
        self.as_f64()
            .ok_or_else(|| EngineError::invalid(parameter, "number", self.type_name()))
    }

    /// A non-negative number, rounded to the nearest integer.
    pub fn expect_u32(&self, parameter: &str) -> EngineResult<u32> {
        let n = self.expect_f64(parameter)?;
        if !n.is_finite() || n < 0.0 || n > u32::MAX as f64 {
            return Err(EngineError::invalid(parameter, "non-negative integer", n.to_string()));
        }
        Ok(n.round() as u32)
    }

    pub fn expect_usize(&self, parameter: &str) -> EngineResult<usize> {
        self.expect_u32(parameter).map(|n| n as usize)
    }

    pub fn expect_sequence(&self, parameter: &str) -> EngineResult<&[Value]> {
        match self {
            Value::Sequence(items) => Ok(items),
            other => Err(EngineError::invalid(parameter, "sequence", other.type_name())),
        }
    }

    pub fn expect_mapping(&self, parameter: &str) -> EngineResult<&Mapping> {
        match self {
            Value::Mapping(map) => Ok(map),
            other => Err(EngineError::invalid(parameter, "mapping", other.type_name())),
        }
    }

    /// Two numbers, e.g. a position.
    pub fn expect_point(&self, parameter: &str) -> EngineResult<(f64, f64)> {
        match self.expect_sequence(parameter)? {
            [x, y] => Ok((x.expect_f64(parameter)?, y.expect_f64(parameter)?)),
            other => Err(EngineError::invalid(
                parameter,
                "pair of numbers",
                format!("sequence of {}", other.len()),
            )),
        }
    }

    pub fn expect_size(&self, parameter: &str) -> EngineResult<(u32, u32)> {
        match self.expect_sequence(parameter)? {
            [w, h] => Ok((w.expect_u32(parameter)?, h.expect_u32(parameter)?)),
            other => Err(EngineError::invalid(
                parameter,
                "pair of sizes",
                format!("sequence of {}", other.len()),
            )),
        }
    }

    pub fn expect_image(&self, parameter: &str) -> EngineResult<&Canvas> {
        match self {
            Value::Handle(Handle::Image(canvas)) => Ok(canvas),
            other => Err(EngineError::invalid(parameter, "image", other.type_name())),
        }
    }

    pub fn expect_font(&self, parameter: &str) -> EngineResult<&FontHandle> {
        match self {
            Value::Handle(Handle::Font(font)) => Ok(font),
            other => Err(EngineError::invalid(parameter, "font", other.type_name())),
        }
    }
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(json)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Canvas> for Value {
    fn from(canvas: Canvas) -> Self {
        Value::Handle(Handle::Image(canvas))
    }
}

impl From<Option<Canvas>> for Value {
    fn from(canvas: Option<Canvas>) -> Self {
        canvas.map_or(Value::Null, Value::from)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Handle(handle) => handle.fmt(f),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Value::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_deferred_expressions() {
        let deferred = Value::from(json!({"deferred": "cached", "key": "x"}));
        assert_eq!(deferred.deferred_kind().unwrap(), Some("cached"));

        let plain = Value::from(json!({"key": "x"}));
        assert_eq!(plain.deferred_kind().unwrap(), None);
        assert_eq!(Value::from(json!([1, 2])).deferred_kind().unwrap(), None);
    }

    #[test]
    fn test_non_string_tag_is_invalid() {
        let bad = Value::from(json!({"deferred": 3}));
        assert!(matches!(
            bad.deferred_kind(),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_integers() {
        let source = json!({"size": [100, 200], "ratio": 0.5, "name": "front"});
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn test_display_strings_unquoted() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Number(15.0).to_string(), "15");
        assert_eq!(Value::from(json!([1, "a"])).to_string(), r#"[1,"a"]"#);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Sequence(vec![]).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::from(json!({"a": 1})).is_truthy());
    }

    #[test]
    fn test_expect_size_rejects_negative() {
        let size = Value::from(json!([100, -1]));
        assert!(size.expect_size("size").is_err());
        assert_eq!(Value::from(json!([100.4, 50])).expect_size("size").unwrap(), (100, 50));
    }
}
