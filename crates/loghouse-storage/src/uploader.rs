//! Segment Uploader
//!
//! Durably persists a compacted segment and commits its manifest entry.
//!
//! ## Commit steps
//!
//! 1. If the catalog already holds the segment's checksum for the stream, stop
//!    with [`CommitOutcome::AlreadyCommitted`].
//! 2. Put the bytes at the checksum-derived location. A retried put of the
//!    same batch writes the same key, so no second copy can appear elsewhere.
//! 3. Append the manifest entry. A duplicate checksum is reported as
//!    `AlreadyCommitted`, not as an error.
//!
//! Steps 2 and 3 retry transient failures with exponential backoff
//! (`base_backoff_ms * 2^attempt`, capped at `max_backoff_ms`) up to
//! `max_attempts`, then fail with `UploadFailed`. The caller keeps the batch
//! pending and resubmits it on the next commit cycle.
//!
//! Concurrent uploads per node are bounded by `upload_workers`.

use crate::backend::StorageBackend;
use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::segment::CompactedSegment;
use loghouse_catalog::{AppendOutcome, Catalog, ManifestEntry};
use loghouse_observability::metrics::{
    DUPLICATE_COMMITS_TOTAL, SEGMENTS_COMMITTED_TOTAL, SEGMENT_SIZE_BYTES, UPLOAD_FAILURES_TOTAL,
    UPLOAD_RETRIES_TOTAL,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The entry was appended; carries the entry as stamped by the catalog.
    Committed(ManifestEntry),
    /// The stream already had an entry with this checksum.
    AlreadyCommitted,
}

pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    catalog: Arc<dyn Catalog>,
    config: UploadConfig,
    permits: Arc<Semaphore>,
}

impl Uploader {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
        config: UploadConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.upload_workers.max(1)));
        Self {
            backend,
            catalog,
            config,
            permits,
        }
    }

    /// Persist `segment` and append its manifest entry to the catalog.
    #[tracing::instrument(skip(self, segment), fields(stream = %segment.entry.stream, checksum = %segment.entry.checksum))]
    pub async fn commit(&self, segment: &CompactedSegment) -> Result<CommitOutcome> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::UploadFailed("upload pool closed".to_string()))?;

        let entry = &segment.entry;
        let stream = entry.stream.as_str();

        if self.is_committed(entry).await? {
            tracing::debug!("Segment already in catalog");
            DUPLICATE_COMMITS_TOTAL.with_label_values(&[stream]).inc();
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        self.with_retry(stream, "put", || {
            self.backend.put(&entry.location, segment.bytes.clone())
        })
        .await?;

        let outcome = self
            .with_retry(stream, "append", || async move {
                self.catalog
                    .append_manifest(stream, entry.clone())
                    .await
                    .map_err(Error::from)
            })
            .await?;

        match outcome {
            AppendOutcome::Appended(stamped) => {
                SEGMENTS_COMMITTED_TOTAL.with_label_values(&[stream]).inc();
                SEGMENT_SIZE_BYTES
                    .with_label_values(&[stream])
                    .observe(entry.size_bytes as f64);
                tracing::info!(
                    rows = stamped.row_count,
                    size = stamped.size_bytes,
                    writer_sequence = stamped.writer_sequence,
                    "Segment committed"
                );
                Ok(CommitOutcome::Committed(stamped))
            }
            AppendOutcome::Duplicate => {
                DUPLICATE_COMMITS_TOTAL.with_label_values(&[stream]).inc();
                Ok(CommitOutcome::AlreadyCommitted)
            }
        }
    }

    async fn is_committed(&self, entry: &ManifestEntry) -> Result<bool> {
        self.with_retry(&entry.stream, "lookup", || async move {
            self.catalog
                .contains_checksum(&entry.stream, &entry.checksum)
                .await
                .map_err(Error::from)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, stream: &str, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    UPLOAD_RETRIES_TOTAL.with_label_values(&[stream]).inc();
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Upload step failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    UPLOAD_FAILURES_TOTAL.with_label_values(&[stream]).inc();
                    tracing::error!(
                        operation,
                        attempts = max_attempts,
                        error = %e,
                        "Upload step failed after all retries"
                    );
                    return Err(Error::UploadFailed(format!("{} failed: {}", operation, e)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
