//! LogHouse Query Layer
//!
//! Query nodes answer time-range queries over a stream by merging committed
//! segments with the uncommitted records still buffered on live ingest
//! nodes.
//!
//! ## Main Components
//!
//! - [`QueryCoordinator`]: concurrent durable and live resolution, merge,
//!   partial results
//! - [`LiveDataSource`] / [`HttpFanout`]: per-node fetch of buffered records
//!   and staging state
//! - [`merge()`]: de-duplication by record identity and timestamp ordering

pub mod config;
pub mod coordinator;
pub mod error;
pub mod live;
pub mod merge;

pub use config::QueryConfig;
pub use coordinator::{
    NodeStagingStats, QueryCoordinator, QueryResult, StreamOverview, StreamSchema, UnreachableNode,
};
pub use error::{QueryError, Result};
pub use live::{
    buffered_path, schema_path, stats_path, BufferedResponse, HttpFanout, LiveDataSource,
    RangeParams,
};
pub use merge::{merge, Merged};
