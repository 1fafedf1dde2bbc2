//! LogHouse Storage Layer
//!
//! Everything between an accepted record and a committed segment:
//!
//! ```text
//! ┌────────────────┐
//! │ Record sources │
//! └───────┬────────┘
//!         │ RecordSink::ingest
//!         ▼
//! ┌────────────────┐   snapshot   ┌──────────────────┐
//! │ StagingBuffer  │ ───────────► │ live fan-out     │
//! └───────┬────────┘              └──────────────────┘
//!         │ DetachedBatch
//!         ▼
//! ┌────────────────┐
//! │SegmentCompactor│  Parquet, sorted, SHA-256 checksum
//! └───────┬────────┘
//!         │ CompactedSegment
//!         ▼
//! ┌────────────────┐  put {stream}/segments/{checksum}.parquet
//! │   Uploader     │ ─────────────────────────────────────────► StorageBackend
//! └───────┬────────┘
//!         │ append_manifest
//!         ▼
//! ┌────────────────┐
//! │    Catalog     │  MemoryCatalog / ObjectStoreCatalog
//! └────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`StorageBackend`] / [`ObjectStoreBackend`]: put/get/list/delete over S3,
//!   the local filesystem or memory
//! - [`StagingBuffer`]: per-stream accumulation with size-triggered detach
//! - [`SegmentCompactor`] / [`SegmentReader`]: deterministic Parquet encoding
//!   and checksum-verified decoding
//! - [`Uploader`]: retried, idempotent segment commit
//! - [`ObjectStoreCatalog`]: durable catalog on the storage backend
//! - [`IngestPipeline`]: flush scheduling and ordered commit cycles; the
//!   [`RecordSink`] every record source writes to

pub mod backend;
pub mod catalog_store;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod segment;
pub mod staging;
pub mod uploader;

pub use backend::{ObjectStoreBackend, StorageBackend};
pub use catalog_store::ObjectStoreCatalog;
pub use config::{
    BackendConfig, CompactionConfig, Compression, IngestConfig, S3Config, StagingConfig,
    UploadConfig,
};
pub use error::{Error, Result};
pub use pipeline::{FlushReport, IngestPipeline, IngestReceipt, RecordSink};
pub use segment::{CompactedSegment, SegmentCompactor, SegmentReader};
pub use staging::{AppendOutcome, DetachedBatch, StagingBuffer, StagingStats, StreamContext};
pub use uploader::{CommitOutcome, Uploader};
