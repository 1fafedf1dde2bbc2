//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Ingest Errors
//! - `Core`: record rejected at append (`SchemaMismatch`, invalid record or
//!   stream name); reported to the caller, never retried
//!
//! ### Segment Errors
//! - `EmptyBatch`: compaction of a batch with no records; benign no-op
//! - `SegmentError`: Arrow/Parquet encoding or decoding failed
//! - `ChecksumMismatch`: segment bytes do not hash to the catalogued checksum
//!
//! ### Backend Errors
//! - `NotFound`: storage key absent
//! - `Backend`: transient object store failure (network, throttling, ...)
//! - `UploadFailed`: a segment or manifest write exhausted its retry budget;
//!   the batch stays pending for the next commit cycle
//!
//! ### Catalog Errors
//! - `Catalog`: the catalog rejected or failed an operation
//!
//! `ChecksumMismatch` and `NotFound` for a catalogued segment are data
//! integrity failures and are never retried.

use loghouse_catalog::CatalogError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] loghouse_core::Error),

    #[error("Empty batch")]
    EmptyBatch,

    #[error("Segment error: {0}")]
    SegmentError(String),

    #[error("Checksum mismatch for {location}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Backend(_) => true,
            Error::Catalog(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path),
            other => Error::Backend(other.to_string()),
        }
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::SegmentError(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::SegmentError(e.to_string())
    }
}
