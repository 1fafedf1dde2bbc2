//! LogHouse Catalog
//!
//! The catalog is the append-only, per-stream log of committed segment
//! manifests and the single source of truth for which durable data exists.
//!
//! ## Contract
//!
//! - `append_manifest` adds an entry unless the stream already holds one with
//!   the same checksum, in which case it is a successful no-op
//!   ([`AppendOutcome::Duplicate`]). Retried commits are therefore harmless.
//! - `list_manifests` returns, in commit order, every entry whose
//!   `[min, max]` intersects the query range.
//! - Readers observe a point-in-time snapshot and are never blocked by an
//!   in-flight append beyond a pointer clone.
//!
//! ## Implementations
//!
//! - [`MemoryCatalog`]: in-process, for tests and single-process setups
//! - `ObjectStoreCatalog` (in `loghouse-storage`): entries persisted as JSON
//!   objects on the shared storage backend
//!
//! Both are built on [`StreamLog`], which owns ordering, duplicate detection
//! and snapshot semantics.

pub mod error;
pub mod log;
pub mod memory;
pub mod types;

pub use error::{CatalogError, Result};
pub use log::StreamLog;
pub use memory::MemoryCatalog;
pub use types::{AppendOutcome, ManifestEntry, StreamStats};

use async_trait::async_trait;
use loghouse_core::{validate_stream_name, TimeRange};

/// Catalog trait - abstracts over in-memory and durable implementations.
///
/// All implementations must be Send + Sync, allowing safe sharing across
/// async tasks via `Arc<dyn Catalog>`.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Append a manifest entry for `stream`.
    ///
    /// The catalog stamps `writer_sequence` and `committed_at`; the stamped
    /// entry is returned in [`AppendOutcome::Appended`].
    ///
    /// # Errors
    ///
    /// - `InvalidEntry`: `entry.stream` differs from `stream` or its time range is inverted
    /// - `Backend`: the durable store failed (transient)
    async fn append_manifest(&self, stream: &str, entry: ManifestEntry) -> Result<AppendOutcome>;

    /// Entries of `stream` intersecting `range`, in commit order.
    async fn list_manifests(&self, stream: &str, range: TimeRange) -> Result<Vec<ManifestEntry>>;

    /// All streams with at least one appended entry, sorted by name.
    async fn list_streams(&self) -> Result<Vec<String>>;

    /// Whether `stream` already holds an entry with `checksum`.
    ///
    /// Implementations that keep the log in memory answer without listing.
    async fn contains_checksum(&self, stream: &str, checksum: &str) -> Result<bool> {
        let entries = self.list_manifests(stream, TimeRange::all()).await?;
        Ok(entries.iter().any(|e| e.checksum == checksum))
    }

    /// Aggregate statistics for `stream`, or `None` if it has no entries.
    async fn stream_stats(&self, stream: &str) -> Result<Option<StreamStats>> {
        let entries = self.list_manifests(stream, TimeRange::all()).await?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(StreamStats::from_entries(stream, &entries)))
    }
}

/// Validate an entry before it is appended to `stream`.
pub fn check_entry(stream: &str, entry: &ManifestEntry) -> Result<()> {
    validate_stream_name(stream)?;
    if entry.stream != stream {
        return Err(CatalogError::InvalidEntry(format!(
            "entry for stream '{}' appended to '{}'",
            entry.stream, stream
        )));
    }
    if entry.min_timestamp > entry.max_timestamp {
        return Err(CatalogError::InvalidEntry(format!(
            "inverted time range [{}, {}]",
            entry.min_timestamp, entry.max_timestamp
        )));
    }
    Ok(())
}
