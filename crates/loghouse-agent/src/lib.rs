//! LogHouse Agent - ingest node liveness
//!
//! Query nodes own an [`IngestorRegistry`] fed by heartbeats; ingest nodes run
//! a [`HeartbeatTask`] that sends them. Role assignment is external: there is
//! no election, and the registry only answers "which ingest nodes are alive
//! right now".
//!
//! ## Components
//!
//! - **IngestorRegistry**: heartbeat-refreshed node records with lazy expiry
//! - **HeartbeatTask**: periodic heartbeat sender with cancellation
//! - **Clock**: time source (`SystemClock`, `ManualClock` for tests)

pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AgentError, Result};
pub use heartbeat::{HeartbeatSummary, HeartbeatTask};
pub use registry::{HeartbeatSink, IngestorRecord, IngestorRegistry, RegistryConfig};
