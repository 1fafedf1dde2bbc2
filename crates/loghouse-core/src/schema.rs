//! Stream schemas and schema hints.
//!
//! The first record written to a stream establishes its schema. Later records
//! are checked field by field:
//!
//! - a field already in the schema must carry the same type (`Null` is
//!   compatible with every type);
//! - a field not yet in the schema extends it.
//!
//! A conflicting type is a [`Error::SchemaMismatch`] and leaves the schema
//! untouched.

use crate::error::{Error, Result};
use crate::record::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Field name to type mapping for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    pub fn new(fields: BTreeMap<String, FieldType>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    /// Fields in name order (the column order used by segments).
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Validate `record` against this schema.
    ///
    /// Returns `Ok(None)` when the record fits as-is, `Ok(Some(schema))` with
    /// the extended schema when the record introduces new fields, and
    /// `SchemaMismatch` on the first conflicting field.
    pub fn check(&self, record: &Record) -> Result<Option<Schema>> {
        let mut additions: Vec<(&String, FieldType)> = Vec::new();

        for (name, value) in &record.fields {
            let Some(actual) = value.field_type() else {
                continue;
            };
            match self.fields.get(name) {
                Some(expected) if *expected != actual => {
                    return Err(Error::SchemaMismatch {
                        field: name.clone(),
                        expected: *expected,
                        actual,
                    });
                }
                Some(_) => {}
                None => additions.push((name, actual)),
            }
        }

        if additions.is_empty() {
            return Ok(None);
        }

        let mut extended = self.clone();
        for (name, ty) in additions {
            extended.fields.insert(name.clone(), ty);
        }
        Ok(Some(extended))
    }

    /// Union of two schemas, or `SchemaMismatch` on the first field the two
    /// type differently.
    pub fn merge(&self, other: &Schema) -> Result<Schema> {
        let mut merged = self.clone();
        for (name, ty) in &other.fields {
            match merged.fields.get(name) {
                Some(existing) if existing != ty => {
                    return Err(Error::SchemaMismatch {
                        field: name.clone(),
                        expected: *existing,
                        actual: *ty,
                    });
                }
                Some(_) => {}
                None => {
                    merged.fields.insert(name.clone(), *ty);
                }
            }
        }
        Ok(merged)
    }
}

/// Caller-declared field types supplied alongside record bytes.
///
/// Decoded values are coerced to the hinted type where that is lossless
/// enough to be unambiguous (integer to float, numeric or boolean strings to
/// numbers or booleans, anything to text). Values that cannot be coerced are
/// rejected with `SchemaMismatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaHint {
    pub fields: BTreeMap<String, FieldType>,
}

impl SchemaHint {
    pub fn new(fields: BTreeMap<String, FieldType>) -> Self {
        Self { fields }
    }

    /// Coerce the hinted fields of `record` in place.
    pub fn apply(&self, record: &mut Record) -> Result<()> {
        for (name, target) in &self.fields {
            if let Some(value) = record.fields.get_mut(name) {
                let coerced = coerce(value, *target).ok_or_else(|| Error::SchemaMismatch {
                    field: name.clone(),
                    expected: *target,
                    // Only non-null values can fail coercion
                    actual: value.field_type().unwrap_or(*target),
                })?;
                *value = coerced;
            }
        }
        Ok(())
    }
}

fn coerce(value: &FieldValue, target: FieldType) -> Option<FieldValue> {
    match (value, target) {
        (FieldValue::Null, _) => Some(FieldValue::Null),
        (FieldValue::Bool(_), FieldType::Bool)
        | (FieldValue::Int(_), FieldType::Int)
        | (FieldValue::Float(_), FieldType::Float)
        | (FieldValue::Text(_), FieldType::Text) => Some(value.clone()),
        (FieldValue::Int(i), FieldType::Float) => Some(FieldValue::Float(*i as f64)),
        (FieldValue::Float(f), FieldType::Int) if f.fract() == 0.0 => {
            Some(FieldValue::Int(*f as i64))
        }
        (FieldValue::Text(s), FieldType::Int) => s.parse().ok().map(FieldValue::Int),
        (FieldValue::Text(s), FieldType::Float) => s.parse().ok().map(FieldValue::Float),
        (FieldValue::Text(s), FieldType::Bool) => s.parse().ok().map(FieldValue::Bool),
        (FieldValue::Bool(b), FieldType::Text) => Some(FieldValue::Text(b.to_string())),
        (FieldValue::Int(i), FieldType::Text) => Some(FieldValue::Text(i.to_string())),
        (FieldValue::Float(f), FieldType::Text) => Some(FieldValue::Text(f.to_string())),
        _ => None,
    }
}
