//! Error types for the LogHouse agent crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid heartbeat: {0}")]
    InvalidHeartbeat(String),

    #[error("Heartbeat transport error: {0}")]
    Transport(String),
}
