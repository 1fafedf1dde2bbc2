//! Record Data Structure
//!
//! A record is a single structured event in a stream:
//! - **timestamp**: event time in milliseconds since epoch
//! - **fields**: flat map of field name to typed value
//! - **origin** / **sequence**: identity assigned by the ingest node that
//!   accepted the record (see [`RecordId`])
//!
//! Records are immutable once the staging buffer accepts them. The identity
//! travels with the record into segments (`p_origin`, `p_sequence` columns) and
//! over the fan-out wire, so a query node can recognise the same record when it
//! shows up both in a committed segment and in a live buffer snapshot.
//!
//! ## Example
//! ```
//! use loghouse_core::{FieldValue, Record};
//! use std::collections::BTreeMap;
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("level".to_string(), FieldValue::Text("info".to_string()));
//! fields.insert("latency_ms".to_string(), FieldValue::Int(12));
//!
//! let record = Record::new(1_700_000_000_000, fields);
//! assert_eq!(record.timestamp, 1_700_000_000_000);
//! ```

use crate::schema::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Type of this value, or `None` for `Null` (compatible with any type).
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(FieldType::Bool),
            FieldValue::Int(_) => Some(FieldType::Int),
            FieldValue::Float(_) => Some(FieldType::Float),
            FieldValue::Text(_) => Some(FieldType::Text),
        }
    }

    fn estimated_size(&self) -> usize {
        match self {
            FieldValue::Null => 1,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 8,
            FieldValue::Text(s) => s.len(),
        }
    }
}

/// Stable identity of a record within its stream.
///
/// `origin` is the id of the ingest node that accepted the record and
/// `sequence` is that node's per-stream append counter. The pair is unique
/// per stream for the lifetime of the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub origin: String,
    pub sequence: u64,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

/// A single record in a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Timestamp in milliseconds since epoch
    pub timestamp: i64,

    /// Ingest node that accepted this record (empty until accepted)
    #[serde(default)]
    pub origin: String,

    /// Per-node, per-stream sequence number (0 until accepted)
    #[serde(default)]
    pub sequence: u64,

    /// Field values keyed by field name
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a record that has not yet been accepted by a staging buffer.
    pub fn new(timestamp: i64, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            timestamp,
            origin: String::new(),
            sequence: 0,
            fields,
        }
    }

    /// Identity of this record.
    pub fn id(&self) -> RecordId {
        RecordId {
            origin: self.origin.clone(),
            sequence: self.sequence,
        }
    }

    /// Value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Estimate the in-memory size of this record in bytes
    pub fn estimated_size(&self) -> usize {
        8 + // timestamp
        8 + // sequence
        self.origin.len() +
        self.fields
            .iter()
            .map(|(name, value)| name.len() + value.estimated_size())
            .sum::<usize>()
    }
}
