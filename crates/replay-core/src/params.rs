//! Request parameter typing and value normalization
//!
//! Incoming form values are typed explicitly (integer before float before
//! text). Matching compares normalized renderings of stored and incoming
//! values with all whitespace removed.

use crate::events::ParamMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A typed request parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Type a raw form value
    ///
    /// All-digit strings become integers (text on overflow), strings that
    /// contain a `.` and parse as a float become floats, anything else stays
    /// text.
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return ParamValue::Integer(n);
            }
            return ParamValue::Text(raw.to_string());
        }

        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return ParamValue::Float(f);
            }
        }

        ParamValue::Text(raw.to_string())
    }

    /// Normalized rendering used for matching
    pub fn normalized(&self) -> String {
        match self {
            ParamValue::Integer(n) => n.to_string(),
            ParamValue::Float(f) => float_text(*f),
            ParamValue::Text(s) => normalize_text(s),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(n) => write!(f, "{}", n),
            ParamValue::Float(v) => f.write_str(&float_text(*v)),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

fn float_text(f: f64) -> String {
    serde_json::Number::from_f64(f)
        .map(|n| n.to_string())
        .unwrap_or_else(|| f.to_string())
}

/// Typed parameters of an incoming replay request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    values: BTreeMap<String, ParamValue>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw form pairs; a repeated name keeps its last value
    pub fn from_form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            params.insert(key, ParamValue::parse(value.as_ref()));
        }
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether a stored parameter set satisfies every requested parameter
    ///
    /// Stored keys absent from the request are not compared. A requested key
    /// missing from the stored set compares as the empty string.
    pub fn matches(&self, stored: &ParamMap) -> bool {
        self.values.iter().all(|(key, value)| {
            let stored_text = stored.get(key).map(normalize_value).unwrap_or_default();
            strip_whitespace(&stored_text) == strip_whitespace(&value.normalized())
        })
    }
}

/// Normalize a string value
///
/// Empty strings stay empty, JSON objects and arrays are re-serialized
/// compactly (key order kept), other text is trimmed.
pub fn normalize_text(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            if parsed.is_object() || parsed.is_array() {
                return parsed.to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Normalize a stored JSON value; `null` is equivalent to the empty string
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => normalize_text(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(pairs: &[(&str, Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_precedence() {
        assert_eq!(ParamValue::parse("42"), ParamValue::Integer(42));
        assert_eq!(ParamValue::parse("007"), ParamValue::Integer(7));
        assert_eq!(ParamValue::parse("3.25"), ParamValue::Float(3.25));
        assert_eq!(ParamValue::parse(".5"), ParamValue::Float(0.5));
        assert_eq!(ParamValue::parse("1.2.3"), ParamValue::Text("1.2.3".into()));
        assert_eq!(ParamValue::parse("-4"), ParamValue::Text("-4".into()));
        assert_eq!(ParamValue::parse("1e5"), ParamValue::Text("1e5".into()));
        assert_eq!(ParamValue::parse(""), ParamValue::Text(String::new()));
        assert_eq!(ParamValue::parse("abc"), ParamValue::Text("abc".into()));
    }

    #[test]
    fn test_parse_integer_overflow_stays_text() {
        let huge = "123456789012345678901234567890";
        assert_eq!(ParamValue::parse(huge), ParamValue::Text(huge.into()));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello  "), "hello");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("  {\"a\":1, \"b\":2}  "), r#"{"a":1,"b":2}"#);
        assert_eq!(normalize_text("[1, 2,\n 3]"), "[1,2,3]");
        assert_eq!(normalize_text("{not json"), "{not json");
    }

    #[test]
    fn test_normalize_keeps_key_order() {
        assert_eq!(normalize_text(r#"{"b": 1, "a": 2}"#), r#"{"b":1,"a":2}"#);
    }

    #[test]
    fn test_json_text_matches_stored_object() {
        let stored = stored(&[("q", json!({"a": 1, "b": 2}))]);
        let request = RequestParams::from_form([("q", "  {\"a\":1, \"b\":2}  ")]);
        assert!(request.matches(&stored));
    }

    #[test]
    fn test_json_text_matches_stored_json_string() {
        let stored = stored(&[("q", json!("{\"a\": 1,\n \"b\": 2}"))]);
        let request = RequestParams::from_form([("q", "{\"a\":1,\"b\":2}")]);
        assert!(request.matches(&stored));
    }

    #[test]
    fn test_null_and_empty_are_equivalent() {
        let request = RequestParams::from_form([("x", "")]);
        assert!(request.matches(&stored(&[("x", Value::Null)])));
        assert!(request.matches(&stored(&[("x", json!(""))])));
        // missing stored key compares as empty
        assert!(request.matches(&stored(&[])));

        assert_eq!(normalize_value(&Value::Null), normalize_value(&json!("")));
    }

    #[test]
    fn test_typed_values_match_stored_numbers() {
        let stored = stored(&[("n", json!(42)), ("f", json!(1.5)), ("s", json!("42"))]);
        let request = RequestParams::from_form([("n", "42"), ("f", "1.5"), ("s", "42")]);
        assert!(request.matches(&stored));
    }

    #[test]
    fn test_whitespace_insensitive() {
        let stored = stored(&[("city", json!("New York"))]);
        assert!(RequestParams::from_form([("city", " New York ")]).matches(&stored));
        assert!(!RequestParams::from_form([("city", "Boston")]).matches(&stored));
    }

    #[test]
    fn test_every_requested_key_must_match() {
        let stored = stored(&[("a", json!("1")), ("b", json!("2"))]);
        assert!(RequestParams::from_form([("a", "1")]).matches(&stored));
        assert!(!RequestParams::from_form([("a", "1"), ("b", "3")]).matches(&stored));
        assert!(!RequestParams::from_form([("c", "x")]).matches(&stored));
        assert!(RequestParams::new().matches(&stored));
    }

    #[test]
    fn test_repeated_form_key_keeps_last() {
        let params = RequestParams::from_form([("a", "1"), ("a", "2")]);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("a"), Some(&ParamValue::Integer(2)));
    }

    #[test]
    fn test_display() {
        assert_eq!(ParamValue::Integer(3).to_string(), "3");
        assert_eq!(ParamValue::Float(2.5).to_string(), "2.5");
        assert_eq!(ParamValue::Text("http://m".into()).to_string(), "http://m");
    }
}
