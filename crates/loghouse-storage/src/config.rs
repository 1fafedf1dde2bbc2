//! Storage Configuration
//!
//! ## StagingConfig
//!
//! Controls when a stream's in-progress batch is detached:
//!
//! - **flush_max_records**: detach when the batch holds this many records (default: 10,000)
//! - **flush_max_bytes**: detach when the batch's estimated size reaches this (default: 16MB)
//! - **flush_interval_ms**: detach a non-empty batch older than this (default: 30s)
//!
//! ## CompactionConfig
//!
//! - **compression**: Parquet column compression (default: zstd)
//! - **compaction_workers**: concurrent compactions per node (default: 2)
//!
//! ## UploadConfig
//!
//! - **max_attempts**: put/append attempts before `UploadFailed` (default: 3)
//! - **base_backoff_ms** / **max_backoff_ms**: exponential backoff bounds
//! - **upload_workers**: concurrent uploads per node (default: 4)
//!
//! ## BackendConfig
//!
//! Selects the storage backend at startup:
//!
//! ```ignore
//! use loghouse_storage::{BackendConfig, S3Config};
//!
//! // MinIO
//! let config = BackendConfig::S3(S3Config {
//!     bucket: "loghouse".to_string(),
//!     endpoint: Some("http://localhost:9000".to_string()),
//!     path_style: true,
//!     allow_http: true,
//!     ..Default::default()
//! });
//!
//! // Local development
//! let config = BackendConfig::Local { root: "./data".into() };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_flush_max_records")]
    pub flush_max_records: usize,

    #[serde(default = "default_flush_max_bytes")]
    pub flush_max_bytes: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl StagingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            flush_max_records: default_flush_max_records(),
            flush_max_bytes: default_flush_max_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_flush_max_records() -> usize {
    10_000
}

fn default_flush_max_bytes() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_flush_interval_ms() -> u64 {
    30_000
}

/// Parquet column compression for segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
    #[default]
    Zstd,
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => Ok(Compression::Uncompressed),
            "snappy" => Ok(Compression::Snappy),
            "gzip" => Ok(Compression::Gzip),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub compression: Compression,

    #[serde(default = "default_compaction_workers")]
    pub compaction_workers: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compaction_workers: default_compaction_workers(),
        }
    }
}

fn default_compaction_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
}

impl UploadConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            upload_workers: default_upload_workers(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_upload_workers() -> usize {
    4
}

/// Everything an ingest node's pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Node id; origin of accepted records and writer of committed entries
    pub node_id: String,

    /// Field holding the event time; ingest time is used when unset
    #[serde(default)]
    pub timestamp_field: Option<String>,

    #[serde(default)]
    pub staging: StagingConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

impl IngestConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp_field: None,
            staging: StagingConfig::default(),
            compaction: CompactionConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// S3 or any S3-compatible service (MinIO, R2, ...)
    S3(S3Config),
    /// Directory on the local filesystem
    Local { root: PathBuf },
    /// Process memory; contents are lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (MinIO, localstack)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style requests instead of virtual-hosted style
    #[serde(default)]
    pub path_style: bool,

    #[serde(default)]
    pub allow_http: bool,

    /// Cap on in-flight requests to the bucket
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "loghouse".to_string(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            path_style: false,
            allow_http: false,
            max_requests: default_max_requests(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_requests() -> usize {
    1000
}
