//! Error Types for LogHouse core
//!
//! ## Error Categories
//!
//! ### Validation Errors
//! - `SchemaMismatch`: A field's type conflicts with the stream's established schema
//! - `InvalidRecord`: Record bytes could not be decoded into records
//! - `InvalidStreamName`: Stream name is empty, too long, or has illegal characters
//!
//! Validation errors are reported to the caller immediately and never retried.

use crate::schema::FieldType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Schema mismatch on field '{field}': expected {expected}, got {actual}")]
    SchemaMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid stream name: {0}")]
    InvalidStreamName(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
