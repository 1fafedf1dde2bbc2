//! LogHouse Server
//!
//! One binary, two roles. The role and everything else is configured through
//! environment variables.
//!
//! ## Node
//! - `LOGHOUSE_ROLE`: `ingest` or `query` (default: ingest)
//! - `LOGHOUSE_NODE_ID`: node name; a random suffix is added per start
//! - `LOGHOUSE_BIND_ADDR`: HTTP bind address (default: 0.0.0.0:8001 ingest, 0.0.0.0:8000 query)
//! - `LOGHOUSE_ADVERTISE_URL`: URL query nodes use to reach this ingest node
//! - `LOGHOUSE_QUERY_URLS`: comma-separated query node URLs to heartbeat to
//!
//! ## Ingest
//! - `LOGHOUSE_TIMESTAMP_FIELD`: record field holding the event time
//! - `LOGHOUSE_FLUSH_MAX_RECORDS` / `LOGHOUSE_FLUSH_MAX_BYTES` / `LOGHOUSE_FLUSH_INTERVAL_MS`
//! - `LOGHOUSE_COMPRESSION`: uncompressed, snappy, gzip, lz4 or zstd
//! - `LOGHOUSE_UPLOAD_MAX_ATTEMPTS`
//! - `LOGHOUSE_QUEUE_MAX_DELIVERIES`
//!
//! ## Cluster
//! - `LOGHOUSE_HEARTBEAT_INTERVAL_MS` / `LOGHOUSE_HEARTBEAT_TIMEOUT_MS`
//! - `LOGHOUSE_FANOUT_TIMEOUT_MS`
//!
//! ## Storage
//! - `LOGHOUSE_STORAGE`: `s3`, `local` or `memory` (default: local)
//! - `LOGHOUSE_LOCAL_PATH`: root for local storage (default: ./data/storage)
//! - `LOGHOUSE_S3_BUCKET`, `AWS_REGION`, `LOGHOUSE_S3_ENDPOINT`,
//!   `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `LOGHOUSE_S3_PATH_STYLE`,
//!   `LOGHOUSE_S3_ALLOW_HTTP`, `LOGHOUSE_S3_MAX_REQUESTS`
//!
//! ## Example Usage
//! ```bash
//! LOGHOUSE_ROLE=query LOGHOUSE_LOCAL_PATH=/tmp/lh cargo run -p loghouse-server
//! LOGHOUSE_ROLE=ingest LOGHOUSE_LOCAL_PATH=/tmp/lh \
//!   LOGHOUSE_ADVERTISE_URL=http://localhost:8001 \
//!   LOGHOUSE_QUERY_URLS=http://localhost:8000 cargo run -p loghouse-server
//! ```

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod ingest;
pub mod node;
pub mod query;

pub use config::{NodeRole, ServerConfig};
pub use error::{ApiError, Result, ServerError};
pub use heartbeat::{HeartbeatRequest, HttpHeartbeatSink};
pub use ingest::{ingest_router, IngestState};
pub use node::{IngestNode, Node, QueryNode};
pub use query::{query_router, QueryState};
