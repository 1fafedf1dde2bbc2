//! LogHouse Record Sources
//!
//! Adapters that feed records into an ingest node.
//!
//! ## Architecture
//!
//! - **Direct ingest**: HTTP handlers call [`RecordSink::ingest`] themselves
//!   (see `loghouse-server`)
//! - **Message queue**: [`QueueIngestTask`] consumes any [`MessageQueue`] and
//!   acks a message only once the sink accepted it
//! - **ChannelQueue**: in-process [`MessageQueue`] with redelivery and
//!   dead-lettering of nacked messages
//!
//! [`RecordSink::ingest`]: loghouse_storage::RecordSink::ingest

pub mod error;
pub mod queue;
pub mod task;

pub use error::{ConnectorError, Result};
pub use queue::{ChannelQueue, MessageId, MessageQueue, QueueConfig, QueueMessage};
pub use task::{QueueIngestSummary, QueueIngestTask};
