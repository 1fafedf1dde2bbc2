//! Catalog Error Types
//!
//! ## Error Categories
//!
//! - `InvalidStreamName`: stream name failed validation
//! - `InvalidEntry`: manifest entry is inconsistent with the call (wrong stream,
//!   inverted time range)
//! - `Backend`: the durable store behind the catalog failed; transient, the
//!   uploader retries it within its budget
//! - `SerializationError`: a persisted entry could not be encoded or decoded
//!
//! A duplicate checksum is not an error: `append_manifest` reports it as
//! [`AppendOutcome::Duplicate`](crate::AppendOutcome::Duplicate).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid stream name: {0}")]
    InvalidStreamName(String),

    #[error("Invalid manifest entry: {0}")]
    InvalidEntry(String),

    #[error("Catalog backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CatalogError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Backend(_))
    }
}

impl From<loghouse_core::Error> for CatalogError {
    fn from(e: loghouse_core::Error) -> Self {
        match e {
            loghouse_core::Error::InvalidStreamName(msg) => CatalogError::InvalidStreamName(msg),
            other => CatalogError::InvalidEntry(other.to_string()),
        }
    }
}
