//! Server Error Types
//!
//! [`ServerError`] covers node startup and shutdown. Request handlers return
//! [`ApiError`], which maps the component errors onto HTTP status codes:
//!
//! - **400**: schema mismatch, undecodable records, bad stream names, bad
//!   schema hints, invalid heartbeats
//! - **404**: unknown stream
//! - **502**: missing or corrupt segments, storage and catalog failures,
//!   exhausted uploads
//! - **503**: closed ingest queue
//! - **500**: anything else

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use loghouse_agent::AgentError;
use loghouse_catalog::CatalogError;
use loghouse_connectors::ConnectorError;
use loghouse_query::QueryError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] loghouse_storage::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn catalog_status(error: &CatalogError) -> StatusCode {
    match error {
        CatalogError::InvalidStreamName(_) | CatalogError::InvalidEntry(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl From<loghouse_core::Error> for ApiError {
    fn from(error: loghouse_core::Error) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl From<loghouse_storage::Error> for ApiError {
    fn from(error: loghouse_storage::Error) -> Self {
        use loghouse_storage::Error;
        let status = match &error {
            Error::Core(_) => StatusCode::BAD_REQUEST,
            Error::Catalog(e) => catalog_status(e),
            Error::ChecksumMismatch { .. }
            | Error::NotFound(_)
            | Error::Backend(_)
            | Error::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        let status = match &error {
            QueryError::Core(_) => StatusCode::BAD_REQUEST,
            QueryError::Catalog(e) => catalog_status(e),
            QueryError::DataIntegrity(_)
            | QueryError::Storage(_)
            | QueryError::NodeUnreachable { .. } => StatusCode::BAD_GATEWAY,
            QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        let status = match &error {
            AgentError::InvalidHeartbeat(_) => StatusCode::BAD_REQUEST,
            AgentError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, error.to_string())
    }
}

impl From<ConnectorError> for ApiError {
    fn from(error: ConnectorError) -> Self {
        let status = match &error {
            ConnectorError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            ConnectorError::UnknownMessage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}
