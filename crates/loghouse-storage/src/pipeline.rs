//! Ingest Pipeline
//!
//! Wires the staging buffer, compactor and uploader together on an ingest
//! node and drives per-stream commit cycles.
//!
//! ## Flush triggers
//!
//! A stream's batch is detached when whichever comes first happens:
//!
//! - **size**: the append that reaches `flush_max_records` / `flush_max_bytes`
//!   detaches it and schedules a commit cycle in the background
//! - **interval**: the stream's flush evaluator (one task per stream, spawned
//!   by the first append that finds the stream's context, accepted or not)
//!   finds the batch older than `flush_interval_ms`
//! - **manual**: [`IngestPipeline::flush`]
//!
//! ## Commit cycles
//!
//! A cycle compacts and commits the stream's pending batches strictly in
//! detach order while holding the stream's commit lock, so segments of one
//! stream are never committed out of order. When a batch fails to commit the
//! cycle stops; that batch and every later one stay pending for the next
//! trigger. Streams run their cycles independently.

use crate::backend::StorageBackend;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::segment::SegmentCompactor;
use crate::staging::{AppendOutcome, StagingBuffer};
use crate::uploader::{CommitOutcome, Uploader};
use async_trait::async_trait;
use loghouse_catalog::Catalog;
use loghouse_core::{now_ms, Record, RecordDecoder, SchemaHint, TimeRange};
use loghouse_observability::metrics::{
    BATCHES_FLUSHED_TOTAL, RECORDS_APPENDED_TOTAL, RECORDS_REJECTED_TOTAL,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ingestion entry point shared by every record source.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Decode `bytes` (a JSON object or array of objects) and append the
    /// records to `stream` as one unit.
    async fn ingest(
        &self,
        stream: &str,
        bytes: &[u8],
        hint: Option<&SchemaHint>,
    ) -> Result<IngestReceipt>;
}

/// Acknowledgement of accepted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IngestReceipt {
    pub accepted: usize,
}

/// Outcome of a commit cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlushReport {
    /// Segments newly committed
    pub segments: usize,
    /// Rows in the newly committed segments
    pub rows: u64,
    /// Batches whose segment was already in the catalog
    pub duplicates: usize,
}

struct Inner {
    staging: StagingBuffer,
    decoder: RecordDecoder,
    compactor: SegmentCompactor,
    uploader: Uploader,
    flush_interval: Duration,
    cancel: CancellationToken,
    evaluators: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct IngestPipeline {
    inner: Arc<Inner>,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let flush_interval = config.staging.flush_interval();
        let inner = Inner {
            staging: StagingBuffer::new(config.node_id.clone(), config.staging),
            decoder: RecordDecoder::new(config.timestamp_field),
            compactor: SegmentCompactor::new(config.node_id, &config.compaction),
            uploader: Uploader::new(backend, catalog, config.upload),
            flush_interval,
            cancel: CancellationToken::new(),
            evaluators: Mutex::new(Vec::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.inner.staging
    }

    pub fn node_id(&self) -> &str {
        self.inner.staging.node_id()
    }

    /// Append decoded records to `stream`.
    pub async fn append(&self, stream: &str, records: Vec<Record>) -> Result<AppendOutcome> {
        let result = self.inner.staging.append_all(stream, records).await;
        // A rejected append may still have created the stream
        self.ensure_evaluator(stream).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = match e {
                    loghouse_core::Error::SchemaMismatch { .. } => "schema_mismatch",
                    _ => "invalid_record",
                };
                RECORDS_REJECTED_TOTAL
                    .with_label_values(&[stream, reason])
                    .inc();
                tracing::debug!(stream = %stream, error = %e, "Records rejected");
                return Err(e.into());
            }
        };

        RECORDS_APPENDED_TOTAL
            .with_label_values(&[stream])
            .inc_by(outcome.accepted as u64);

        if !outcome.detached.is_empty() {
            BATCHES_FLUSHED_TOTAL
                .with_label_values(&[stream, "size"])
                .inc_by(outcome.detached.len() as u64);
            let pipeline = self.clone();
            let stream = stream.to_string();
            tokio::spawn(async move {
                if let Err(e) = pipeline.commit_pending(&stream).await {
                    tracing::warn!(stream = %stream, error = %e, "Background commit failed");
                }
            });
        }

        Ok(outcome)
    }

    /// Detach the stream's current batch and run a commit cycle.
    pub async fn flush(&self, stream: &str) -> Result<FlushReport> {
        if self.inner.staging.flush(stream).await.is_some() {
            BATCHES_FLUSHED_TOTAL
                .with_label_values(&[stream, "manual"])
                .inc();
        }
        self.commit_pending(stream).await
    }

    /// Compact and commit every pending batch of `stream` in detach order.
    pub async fn commit_pending(&self, stream: &str) -> Result<FlushReport> {
        let staging = &self.inner.staging;
        let Some(ctx) = staging.context(stream).await else {
            return Ok(FlushReport::default());
        };
        let _cycle = ctx.commit_lock.lock().await;

        let mut report = FlushReport::default();
        for batch in staging.pending(stream).await {
            let batch_no = batch.batch_no;
            let segment = match self.inner.compactor.compact(batch).await {
                Ok(segment) => segment,
                Err(Error::EmptyBatch) => {
                    staging.mark_committed(stream, batch_no).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.inner.uploader.commit(&segment).await {
                Ok(CommitOutcome::Committed(entry)) => {
                    report.segments += 1;
                    report.rows += entry.row_count;
                }
                Ok(CommitOutcome::AlreadyCommitted) => report.duplicates += 1,
                Err(e) => {
                    tracing::warn!(
                        stream = %stream,
                        batch_no,
                        error = %e,
                        "Commit cycle stopped, batch stays pending"
                    );
                    return Err(e);
                }
            }
            staging.mark_committed(stream, batch_no).await;
        }
        Ok(report)
    }

    /// Uncommitted records of `stream` within `range`.
    pub async fn snapshot(&self, stream: &str, range: TimeRange, limit: Option<usize>) -> Vec<Record> {
        self.inner.staging.snapshot(stream, range, limit).await
    }

    /// Spawns the stream's flush evaluator the first time its context is seen.
    async fn ensure_evaluator(&self, stream: &str) {
        let Some(ctx) = self.inner.staging.context(stream).await else {
            return;
        };
        if ctx.claim_evaluator() {
            self.spawn_evaluator(stream.to_string()).await;
        }
    }

    async fn spawn_evaluator(&self, stream: String) {
        let pipeline = self.clone();
        let token = self.inner.cancel.child_token();
        let interval = self.inner.flush_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                pipeline.evaluate(&stream).await;
            }
            tracing::debug!(stream = %stream, "Flush evaluator stopped");
        });
        self.inner.evaluators.lock().await.push(handle);
    }

    async fn evaluate(&self, stream: &str) {
        let staging = &self.inner.staging;
        if staging.due_for_flush(stream, now_ms()).await && staging.flush(stream).await.is_some() {
            BATCHES_FLUSHED_TOTAL
                .with_label_values(&[stream, "interval"])
                .inc();
        }
        if staging.pending(stream).await.is_empty() {
            return;
        }
        match self.commit_pending(stream).await {
            Ok(report) if report.segments > 0 => {
                tracing::debug!(stream = %stream, segments = report.segments, "Interval commit");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(stream = %stream, error = %e, "Interval commit failed"),
        }
    }

    /// Stop flush evaluators and flush every stream.
    ///
    /// Records of batches that still fail to commit are lost when the process
    /// exits.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.inner.evaluators.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        for stream in self.inner.staging.streams().await {
            match self.flush(&stream).await {
                Ok(report) => tracing::info!(
                    stream = %stream,
                    segments = report.segments,
                    rows = report.rows,
                    "Stream flushed on shutdown"
                ),
                Err(e) => tracing::error!(
                    stream = %stream,
                    error = %e,
                    "Failed to flush stream on shutdown"
                ),
            }
        }
    }
}

#[async_trait]
impl RecordSink for IngestPipeline {
    async fn ingest(
        &self,
        stream: &str,
        bytes: &[u8],
        hint: Option<&SchemaHint>,
    ) -> Result<IngestReceipt> {
        let records = match self.inner.decoder.decode(bytes, hint, now_ms()) {
            Ok(records) => records,
            Err(e) => {
                let reason = match e {
                    loghouse_core::Error::SchemaMismatch { .. } => "schema_mismatch",
                    _ => "invalid_record",
                };
                RECORDS_REJECTED_TOTAL
                    .with_label_values(&[stream, reason])
                    .inc();
                return Err(e.into());
            }
        };
        let outcome = self.append(stream, records).await?;
        Ok(IngestReceipt {
            accepted: outcome.accepted,
        })
    }
}
