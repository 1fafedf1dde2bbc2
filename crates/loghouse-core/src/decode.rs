//! Decoding record bytes received at the ingestion boundary.
//!
//! Accepted payloads are a JSON object (one record) or a JSON array of
//! objects. Nested objects are flattened with `.` separators
//! (`{"http": {"status": 200}}` becomes field `http.status`); arrays are kept
//! as their JSON text.
//!
//! The record timestamp is read from the configured timestamp field when one
//! is set (integer milliseconds or an RFC 3339 string), otherwise the ingest
//! time is used.

use crate::error::{Error, Result};
use crate::record::{FieldValue, Record};
use crate::schema::SchemaHint;
use crate::RESERVED_COLUMNS;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Turns raw record bytes into [`Record`]s.
#[derive(Debug, Clone, Default)]
pub struct RecordDecoder {
    timestamp_field: Option<String>,
}

impl RecordDecoder {
    pub fn new(timestamp_field: Option<String>) -> Self {
        Self { timestamp_field }
    }

    /// Decode `bytes` using `ingest_time` for records without an event time.
    pub fn decode(
        &self,
        bytes: &[u8],
        hint: Option<&SchemaHint>,
        ingest_time: i64,
    ) -> Result<Vec<Record>> {
        let value: Value = serde_json::from_slice(bytes)?;
        let objects = match value {
            Value::Object(map) => vec![map],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(Error::InvalidRecord(format!(
                        "expected a JSON object, found {}",
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(Error::InvalidRecord(format!(
                    "expected a JSON object or array, found {}",
                    json_kind(&other)
                )))
            }
        };

        objects
            .into_iter()
            .map(|map| self.decode_object(map, hint, ingest_time))
            .collect()
    }

    fn decode_object(
        &self,
        map: Map<String, Value>,
        hint: Option<&SchemaHint>,
        ingest_time: i64,
    ) -> Result<Record> {
        let mut fields = BTreeMap::new();
        flatten(None, map, &mut fields)?;

        if let Some(name) = fields.keys().find(|k| RESERVED_COLUMNS.contains(&k.as_str())) {
            return Err(Error::InvalidRecord(format!(
                "field '{}' is reserved",
                name
            )));
        }

        let timestamp = match &self.timestamp_field {
            Some(field) => match fields.get(field) {
                Some(value) => parse_timestamp(field, value)?,
                None => {
                    return Err(Error::InvalidRecord(format!(
                        "missing timestamp field '{}'",
                        field
                    )))
                }
            },
            None => ingest_time,
        };

        let mut record = Record::new(timestamp, fields);
        if let Some(hint) = hint {
            hint.apply(&mut record)?;
        }
        Ok(record)
    }
}

fn flatten(
    prefix: Option<&str>,
    map: Map<String, Value>,
    out: &mut BTreeMap<String, FieldValue>,
) -> Result<()> {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key,
        };
        let field = match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s),
            Value::Array(_) => FieldValue::Text(value.to_string()),
            Value::Object(inner) => {
                flatten(Some(&name), inner, out)?;
                continue;
            }
        };
        out.insert(name, field);
    }
    Ok(())
}

fn parse_timestamp(field: &str, value: &FieldValue) -> Result<i64> {
    match value {
        FieldValue::Int(ms) => Ok(*ms),
        FieldValue::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| {
                Error::InvalidRecord(format!("timestamp field '{}' is not RFC 3339: {}", field, e))
            }),
        _ => Err(Error::InvalidRecord(format!(
            "timestamp field '{}' must be an integer or RFC 3339 string",
            field
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
