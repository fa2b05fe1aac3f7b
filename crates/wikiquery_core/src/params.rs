use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Result, WikiError};

/// Separator MediaWiki accepts in place of `|` when a list item itself contains `|`.
const ALT_LIST_SEPARATOR: char = '\u{1f}';

/// One request parameter before it is coerced to its wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Absent,
    Flag(bool),
    Text(String),
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Convert a continuation value sent by the server back into a parameter.
    /// Strings are kept verbatim so they are echoed exactly as received.
    pub fn from_continuation(value: &Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Bool(true) => Self::Flag(true),
            Value::Bool(false) => Self::Text("false".to_string()),
            Value::String(text) => Self::Text(text.clone()),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Text(number.to_string()),
            },
            other => Self::Text(other.to_string()),
        }
    }
}

/// Coerce a parameter to its wire string. `None` means the key is omitted.
pub fn to_wire_value(value: &ParamValue) -> Result<Option<String>> {
    match value {
        ParamValue::Absent | ParamValue::Flag(false) => Ok(None),
        ParamValue::Flag(true) => Ok(Some(String::new())),
        ParamValue::List(items) => encode_list(items),
        scalar => encode_scalar(scalar).map(Some),
    }
}

fn encode_scalar(value: &ParamValue) -> Result<String> {
    match value {
        ParamValue::Text(text) => Ok(text.clone()),
        ParamValue::Integer(integer) => Ok(integer.to_string()),
        ParamValue::Float(float) if float.is_finite() => Ok(float.to_string()),
        ParamValue::Float(float) => Err(WikiError::config(format!(
            "unsupported parameter value: non-finite number {float}"
        ))),
        ParamValue::DateTime(instant) => Ok(format_timestamp(instant)),
        other => Err(WikiError::config(format!(
            "unsupported parameter value type inside a list: {other:?}"
        ))),
    }
}

fn encode_list(items: &[ParamValue]) -> Result<Option<String>> {
    if items.is_empty() {
        return Ok(None);
    }
    let encoded = items
        .iter()
        .map(encode_scalar)
        .collect::<Result<Vec<_>>>()?;
    if encoded.iter().any(|item| item.contains('|')) {
        let mut joined = String::from(ALT_LIST_SEPARATOR);
        joined.push_str(&encoded.join(&ALT_LIST_SEPARATOR.to_string()));
        return Ok(Some(joined));
    }
    Ok(Some(encoded.join("|")))
}

/// UTC, fixed width: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any RFC 3339 / ISO-8601 timestamp the server may echo.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        i64::try_from(value)
            .map(Self::Integer)
            .unwrap_or_else(|_| Self::Text(value.to_string()))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for ParamValue {
    fn from(value: DateTime<Tz>) -> Self {
        Self::DateTime(value.with_timezone(&Utc))
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Ordered parameter bag with unique keys.
///
/// Setting an existing key overwrites it in place, so a continuation step
/// never reorders or drops the base parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a parameter set with `action=query` fixed.
    pub fn query() -> Self {
        Self::new().with("action", "query")
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Wire value of one key, `None` when absent or omitted.
    pub fn wire_value(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            Some(value) => to_wire_value(value),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode every key in order, dropping omitted values.
    pub fn to_wire_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            if let Some(encoded) = to_wire_value(value)
                .map_err(|error| annotate_key(error, key))?
            {
                pairs.push((key.clone(), encoded));
            }
        }
        Ok(pairs)
    }
}

fn annotate_key(error: WikiError, key: &str) -> WikiError {
    match error {
        WikiError::Config { message } => WikiError::config(format!("parameter {key}: {message}")),
        other => other,
    }
}

impl fmt::Display for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            let rendered = match to_wire_value(value) {
                Ok(Some(encoded)) => encoded,
                Ok(None) => continue,
                Err(_) => "<invalid>".to_string(),
            };
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{key}={rendered}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;
    use serde_json::json;

    use super::*;

    #[test]
    fn flags_use_presence_encoding() {
        assert_eq!(to_wire_value(&true.into()).expect("encode"), Some(String::new()));
        assert_eq!(to_wire_value(&false.into()).expect("encode"), None);
        assert_eq!(to_wire_value(&ParamValue::Absent).expect("encode"), None);
    }

    #[test]
    fn strings_are_not_reencoded() {
        let value = ParamValue::from("Foo bar&baz=1");
        assert_eq!(
            to_wire_value(&value).expect("encode").as_deref(),
            Some("Foo bar&baz=1")
        );
    }

    #[test]
    fn timestamps_are_fixed_width_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        let local = offset
            .with_ymd_and_hms(2024, 3, 5, 9, 7, 1)
            .single()
            .expect("timestamp");
        assert_eq!(
            to_wire_value(&local.into()).expect("encode").as_deref(),
            Some("2024-03-05T07:07:01Z")
        );
    }

    #[test]
    fn lists_join_with_pipe_or_unit_separator() {
        let plain = ParamValue::from(vec!["A", "B"]);
        assert_eq!(to_wire_value(&plain).expect("encode").as_deref(), Some("A|B"));

        let piped = ParamValue::from(vec!["A|1", "B"]);
        assert_eq!(
            to_wire_value(&piped).expect("encode").as_deref(),
            Some("\u{1f}A|1\u{1f}B")
        );

        let empty: Vec<String> = Vec::new();
        assert_eq!(to_wire_value(&empty.into()).expect("encode"), None);
    }

    #[test]
    fn unsupported_values_are_configuration_errors() {
        let nested = ParamValue::List(vec![ParamValue::List(vec![])]);
        let error = to_wire_value(&nested).expect_err("nested list must fail");
        assert!(matches!(error, WikiError::Config { .. }));

        let params = QueryParameters::query().with("bad", f64::NAN);
        let error = params.to_wire_pairs().expect_err("NaN must fail");
        assert!(error.to_string().contains("parameter bad"));
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut params = QueryParameters::query()
            .with("list", "allpages")
            .with("aplimit", 500usize);
        params.set("list", "categorymembers");
        params.set("cmcontinue", "page|X");
        let pairs = params.to_wire_pairs().expect("pairs");
        let keys = pairs.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["action", "list", "aplimit", "cmcontinue"]);
        assert_eq!(pairs[1].1, "categorymembers");
    }

    #[test]
    fn omitted_values_are_dropped_from_wire_pairs() {
        let params = QueryParameters::query()
            .with("redirects", true)
            .with("watch", false)
            .with("rvstart", Option::<String>::None);
        let pairs = params.to_wire_pairs().expect("pairs");
        assert_eq!(
            pairs,
            vec![
                ("action".to_string(), "query".to_string()),
                ("redirects".to_string(), String::new()),
            ]
        );
        assert_eq!(params.to_string(), "action=query&redirects=");
    }

    #[test]
    fn continuation_values_parse_back() {
        assert_eq!(
            ParamValue::from_continuation(&json!("20240101|123")),
            ParamValue::Text("20240101|123".to_string())
        );
        assert_eq!(ParamValue::from_continuation(&json!(42)), ParamValue::Integer(42));
        assert_eq!(ParamValue::from_continuation(&json!(null)), ParamValue::Absent);
    }

    #[test]
    fn false_continuation_value_keeps_its_key() {
        let value = ParamValue::from_continuation(&json!(false));
        assert_eq!(to_wire_value(&value).expect("encode").as_deref(), Some("false"));
        let flag = ParamValue::from_continuation(&json!(true));
        assert_eq!(to_wire_value(&flag).expect("encode").as_deref(), Some(""));
    }

    #[test]
    fn parse_timestamp_accepts_fractional_seconds() {
        let plain = parse_timestamp("2024-01-01T00:00:00Z").expect("plain");
        let fractional = parse_timestamp("2024-01-01T00:00:00.000+00:00").expect("fractional");
        assert_eq!(plain, fractional);
        assert!(parse_timestamp("not a date").is_none());
    }
}
