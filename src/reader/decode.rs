//! Decoding of remote row payloads against the declared schema.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{ReadError, Result};
use crate::query::schema::{DataType, Field};
use crate::query::value::{parse_date, parse_datetime};
use crate::query::{Schema, Value};
use crate::reader::Row;

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    rows: Vec<serde_json::Map<String, Json>>,
}

/// Turns `{"columns": [...], "rows": [{...}]}` payloads into [`Row`]s.
#[derive(Clone, Debug)]
pub struct RowDecoder {
    schema: Arc<Schema>,
}

impl RowDecoder {
    /// Decoder for rows of `schema`.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Declared schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decodes a payload fetched for `partition`.
    pub fn decode(&self, payload: &str, partition: usize) -> Result<Vec<Row>> {
        let fail = |reason: String| ReadError::Decode { partition, reason };
        let payload: Payload =
            serde_json::from_str(payload).map_err(|err| fail(format!("invalid payload: {err}")))?;
        payload
            .rows
            .iter()
            .map(|raw| {
                self.schema
                    .fields()
                    .iter()
                    .map(|field| decode_value(field, raw.get(&field.name)).map_err(&fail))
                    .collect::<Result<Vec<_>>>()
                    .map(Row::new)
            })
            .collect()
    }
}

fn decode_value(field: &Field, raw: Option<&Json>) -> std::result::Result<Value, String> {
    let raw = match raw {
        None | Some(Json::Null) if field.nullable => return Ok(Value::Null),
        None | Some(Json::Null) => {
            return Err(format!("column '{}' is not nullable but has no value", field.name))
        }
        Some(raw) => raw,
    };
    let mismatch = || format!("column '{}' expects {:?}, found {raw}", field.name, field.data_type);
    match field.data_type {
        DataType::Boolean => raw.as_bool().map(Value::Bool).ok_or_else(mismatch),
        DataType::Long => match raw {
            Json::Number(n) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
            Json::String(s) => s.parse().map(Value::Int).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        DataType::Double => match raw {
            Json::Number(n) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
            Json::String(s) => s.parse().map(Value::Float).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        DataType::String => match raw {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(_) | Json::Bool(_) => Ok(Value::String(raw.to_string())),
            _ => Err(mismatch()),
        },
        DataType::Binary => raw
            .as_str()
            .and_then(|s| BASE64_ENGINE.decode(s).ok())
            .map(Value::Bytes)
            .ok_or_else(mismatch),
        DataType::Date => raw
            .as_str()
            .and_then(parse_date)
            .map(Value::Date)
            .ok_or_else(mismatch),
        DataType::Timestamp => raw
            .as_str()
            .and_then(parse_datetime)
            .map(Value::DateTime)
            .ok_or_else(mismatch),
    }
}
