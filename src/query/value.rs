//! Typed literal values shared by predicates, bound plan parameters and
//! decoded rows.
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Typed value tagged with explicit type information so a bound parameter
/// keeps its type across the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Binary payload; travels base64 encoded.
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch, UTC.
    DateTime(i64),
}

impl Value {
    /// Remote type name used when the value is bound as a runtime parameter.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "xs:untypedAtomic",
            Value::Bool(_) => "xs:boolean",
            Value::Int(_) => "xs:long",
            Value::Float(_) => "xs:double",
            Value::String(_) => "xs:string",
            Value::Bytes(_) => "xs:base64Binary",
            Value::Date(_) => "xs:date",
            Value::DateTime(_) => "xs:dateTime",
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Lexical JSON form sent to the remote engine.
    ///
    /// Dates and timestamps are rendered as ISO-8601 strings, bytes as base64.
    /// Non-finite floats have no JSON form and render as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => serde_json::Value::String(BASE64_ENGINE.encode(v)),
            Value::Date(days) => match format_date(*days) {
                Some(text) => serde_json::Value::String(text),
                None => serde_json::Value::Null,
            },
            Value::DateTime(micros) => match format_datetime(*micros) {
                Some(text) => serde_json::Value::String(text),
                None => serde_json::Value::Null,
            },
        }
    }
}

/// Formats days since the epoch as `YYYY-MM-DD`.
pub fn format_date(days: i32) -> Option<String> {
    let date = Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY.checked_add(days)?).ok()?;
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

/// Parses `YYYY-MM-DD` into days since the epoch.
pub fn parse_date(text: &str) -> Option<i32> {
    let date = Date::parse(text, format_description!("[year]-[month]-[day]")).ok()?;
    Some(date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY)
}

/// Formats microseconds since the epoch as RFC 3339.
pub fn format_datetime(micros: i64) -> Option<String> {
    let nanos = i128::from(micros) * 1_000;
    let ts = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    ts.format(&Rfc3339).ok()
}

/// Parses an RFC 3339 timestamp into microseconds since the epoch.
pub fn parse_datetime(text: &str) -> Option<i64> {
    let ts = OffsetDateTime::parse(text, &Rfc3339).ok()?;
    i64::try_from(ts.unix_timestamp_nanos() / 1_000).ok()
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}
