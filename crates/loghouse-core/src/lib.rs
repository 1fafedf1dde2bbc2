//! Core data model shared by every LogHouse crate.
//!
//! A *stream* is a named sequence of [`Record`]s. Each record carries a
//! timestamp, a flat map of typed field values and an identity
//! ([`RecordId`]) assigned by the ingest node that accepted it. The first
//! record written to a stream establishes its [`Schema`]; later records may
//! add fields but never change the type of an existing one.

pub mod decode;
pub mod error;
pub mod record;
pub mod schema;
pub mod stream;
pub mod time;

pub use decode::RecordDecoder;
pub use error::{Error, Result};
pub use record::{FieldValue, Record, RecordId};
pub use schema::{FieldType, Schema, SchemaHint};
pub use stream::validate_stream_name;
pub use time::{now_ms, TimeRange};

/// Column holding the record timestamp in segments and wire payloads.
pub const TIMESTAMP_COLUMN: &str = "p_timestamp";

/// Column holding the id of the ingest node that accepted the record.
pub const ORIGIN_COLUMN: &str = "p_origin";

/// Column holding the per-node, per-stream sequence number of the record.
pub const SEQUENCE_COLUMN: &str = "p_sequence";

/// Field names reserved for system columns.
pub const RESERVED_COLUMNS: [&str; 3] = [TIMESTAMP_COLUMN, ORIGIN_COLUMN, SEQUENCE_COLUMN];
