//! Query Error Types
//!
//! ## Error Categories
//!
//! ### Caller Errors
//! - `Core`: invalid stream name or malformed range
//!
//! ### Data Integrity Errors
//! - `DataIntegrity`: a catalogued segment is missing from storage or its
//!   bytes do not match the catalogued checksum. Never retried or skipped;
//!   the whole query fails.
//!
//! ### Backend Errors
//! - `Catalog`: the catalog could not be read
//! - `Storage`: a storage read failed for a reason other than data loss
//!
//! ### Live Fan-out Errors
//! - `NodeUnreachable`: a live node did not answer within the deadline or
//!   answered with an error. Returned by [`LiveDataSource`] implementations;
//!   the coordinator turns it into a partial result instead of failing.
//!
//! [`LiveDataSource`]: crate::live::LiveDataSource

use loghouse_catalog::CatalogError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Core(#[from] loghouse_core::Error),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage error: {0}")]
    Storage(#[from] loghouse_storage::Error),

    #[error("Node {node_id} unreachable: {reason}")]
    NodeUnreachable { node_id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Whether the query failed because durable data is missing or corrupt.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, QueryError::DataIntegrity(_))
    }
}
