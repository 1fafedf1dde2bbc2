//! Error types for LogHouse record sources.

use thiserror::Error;

/// Errors that can occur while consuming a record source.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The queue no longer accepts messages.
    #[error("Queue closed")]
    QueueClosed,

    /// An ack or nack referenced a message that is not in flight.
    #[error("Unknown message: {0}")]
    UnknownMessage(u64),
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
