//! Staging Buffer
//!
//! Per-stream, in-process accumulation of accepted records before they are
//! durable.
//!
//! ## Per-stream context
//!
//! Every stream has one [`StreamContext`] holding its schema, the in-progress
//! batch, the queue of detached-but-uncommitted batches and its commit lock.
//! The stream map lock is held only to look a context up or insert a new
//! one, so appends, flushes and snapshots of different streams never wait on
//! each other.
//!
//! ## Batch lifecycle
//!
//! ```text
//! append ──► current batch ──(size / interval / explicit flush)──► detached
//!                                                                     │
//!                                  pending queue (detach order) ◄─────┘
//!                                                                     │
//!                                   mark_committed(batch_no) ◄── commit cycle
//! ```
//!
//! A detached batch stays in the pending queue until its segment is in the
//! catalog, so a failed upload never drops records and live snapshots keep
//! serving them in the meantime.

use crate::config::StagingConfig;
use loghouse_core::{validate_stream_name, Record, RecordId, Result, Schema, TimeRange};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A batch handed off for compaction.
#[derive(Debug, Clone)]
pub struct DetachedBatch {
    pub stream: String,
    /// Per-stream detach counter, starting at 0
    pub batch_no: u64,
    /// Stream schema at detach time
    pub schema: Schema,
    pub records: Arc<Vec<Record>>,
}

impl DetachedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of appending records to a stream.
#[derive(Debug, Default)]
pub struct AppendOutcome {
    /// Number of records accepted
    pub accepted: usize,
    /// Identity of the first accepted record
    pub first_id: Option<RecordId>,
    /// Batches detached because a size threshold was reached
    pub detached: Vec<DetachedBatch>,
    /// Whether this append created the stream
    pub new_stream: bool,
}

/// Point-in-time counters for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StagingStats {
    pub buffered_records: usize,
    pub buffered_bytes: usize,
    pub pending_batches: usize,
    pub pending_records: usize,
    pub schema_fields: usize,
}

#[derive(Debug, Default)]
struct StreamState {
    schema: Schema,
    next_sequence: u64,
    next_batch_no: u64,
    current: Vec<Record>,
    current_bytes: usize,
    /// Ingest time of the first record in `current`
    current_started: Option<i64>,
    pending: VecDeque<DetachedBatch>,
}

impl StreamState {
    fn detach(&mut self, stream: &str) -> Option<DetachedBatch> {
        if self.current.is_empty() {
            return None;
        }
        let batch = DetachedBatch {
            stream: stream.to_string(),
            batch_no: self.next_batch_no,
            schema: self.schema.clone(),
            records: Arc::new(std::mem::take(&mut self.current)),
        };
        self.next_batch_no += 1;
        self.current_bytes = 0;
        self.current_started = None;
        self.pending.push_back(batch.clone());
        Some(batch)
    }
}

/// Staging state for one stream.
#[derive(Debug)]
pub struct StreamContext {
    name: String,
    state: Mutex<StreamState>,
    /// Held for the duration of a commit cycle; one cycle per stream at a time
    pub commit_lock: Mutex<()>,
    evaluator_claimed: AtomicBool,
}

impl StreamContext {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(StreamState::default()),
            commit_lock: Mutex::new(()),
            evaluator_claimed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` for exactly one caller over the context's lifetime.
    pub fn claim_evaluator(&self) -> bool {
        !self.evaluator_claimed.swap(true, Ordering::AcqRel)
    }
}

/// Per-node staging buffer for all streams.
#[derive(Debug)]
pub struct StagingBuffer {
    node_id: String,
    config: StagingConfig,
    streams: RwLock<HashMap<String, Arc<StreamContext>>>,
}

impl StagingBuffer {
    /// `node_id` becomes the origin of every record this buffer accepts.
    pub fn new(node_id: impl Into<String>, config: StagingConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Existing context for `stream`.
    pub async fn context(&self, stream: &str) -> Option<Arc<StreamContext>> {
        self.streams.read().await.get(stream).cloned()
    }

    async fn context_or_create(&self, stream: &str) -> (Arc<StreamContext>, bool) {
        if let Some(ctx) = self.streams.read().await.get(stream) {
            return (Arc::clone(ctx), false);
        }

        let mut streams = self.streams.write().await;
        if let Some(ctx) = streams.get(stream) {
            return (Arc::clone(ctx), false);
        }

        tracing::info!(stream = %stream, "Creating stream");
        let ctx = Arc::new(StreamContext::new(stream));
        streams.insert(stream.to_string(), Arc::clone(&ctx));
        (ctx, true)
    }

    /// Append a single record.
    pub async fn append(&self, stream: &str, record: Record) -> Result<AppendOutcome> {
        self.append_all(stream, vec![record]).await
    }

    /// Append records as one unit: either all are accepted or none are.
    ///
    /// The whole set is validated against the stream schema before any record
    /// is added. Records get consecutive sequence numbers. A batch reaching
    /// `flush_max_records` or `flush_max_bytes` is detached in the same
    /// critical section and returned in the outcome.
    pub async fn append_all(&self, stream: &str, records: Vec<Record>) -> Result<AppendOutcome> {
        validate_stream_name(stream)?;
        if records.is_empty() {
            return Ok(AppendOutcome::default());
        }

        // Validate before creating the stream so a rejected first write leaves nothing behind
        let existing = self.context(stream).await;
        let (ctx, new_stream) = match existing {
            Some(ctx) => (ctx, false),
            None => {
                let mut schema = Schema::default();
                for record in &records {
                    if let Some(extended) = schema.check(record)? {
                        schema = extended;
                    }
                }
                self.context_or_create(stream).await
            }
        };

        let mut state = ctx.state.lock().await;

        let mut schema = state.schema.clone();
        for record in &records {
            if let Some(extended) = schema.check(record)? {
                schema = extended;
            }
        }
        if schema.len() != state.schema.len() {
            tracing::debug!(
                stream = %stream,
                fields = schema.len(),
                "Stream schema extended"
            );
        }
        state.schema = schema;

        let now = loghouse_core::now_ms();
        let mut outcome = AppendOutcome {
            new_stream,
            ..Default::default()
        };

        for mut record in records {
            record.origin = self.node_id.clone();
            record.sequence = state.next_sequence;
            state.next_sequence += 1;

            if outcome.first_id.is_none() {
                outcome.first_id = Some(record.id());
            }

            state.current_bytes += record.estimated_size();
            state.current_started.get_or_insert(now);
            state.current.push(record);
            outcome.accepted += 1;

            if state.current.len() >= self.config.flush_max_records
                || state.current_bytes >= self.config.flush_max_bytes
            {
                if let Some(batch) = state.detach(stream) {
                    tracing::debug!(
                        stream = %stream,
                        batch_no = batch.batch_no,
                        records = batch.len(),
                        "Batch reached size threshold"
                    );
                    outcome.detached.push(batch);
                }
            }
        }

        Ok(outcome)
    }

    /// Detach the in-progress batch, or `None` if it is empty.
    pub async fn flush(&self, stream: &str) -> Option<DetachedBatch> {
        let ctx = self.context(stream).await?;
        let mut state = ctx.state.lock().await;
        state.detach(stream)
    }

    /// Whether the in-progress batch is non-empty and older than `flush_interval_ms`.
    pub async fn due_for_flush(&self, stream: &str, now: i64) -> bool {
        let Some(ctx) = self.context(stream).await else {
            return false;
        };
        let state = ctx.state.lock().await;
        match state.current_started {
            Some(started) => now.saturating_sub(started) >= self.config.flush_interval_ms as i64,
            None => false,
        }
    }

    /// Detached batches not yet committed, in detach order.
    pub async fn pending(&self, stream: &str) -> Vec<DetachedBatch> {
        match self.context(stream).await {
            Some(ctx) => ctx.state.lock().await.pending.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Drop a committed batch from the pending queue.
    pub async fn mark_committed(&self, stream: &str, batch_no: u64) {
        if let Some(ctx) = self.context(stream).await {
            ctx.state
                .lock()
                .await
                .pending
                .retain(|batch| batch.batch_no != batch_no);
        }
    }

    /// Uncommitted records of `stream` within `range`.
    ///
    /// Pending batches come first in detach order, then the in-progress
    /// batch. At most `limit` records are returned.
    pub async fn snapshot(&self, stream: &str, range: TimeRange, limit: Option<usize>) -> Vec<Record> {
        let Some(ctx) = self.context(stream).await else {
            return Vec::new();
        };
        let limit = limit.unwrap_or(usize::MAX);
        let state = ctx.state.lock().await;

        state
            .pending
            .iter()
            .flat_map(|batch| batch.records.iter())
            .chain(state.current.iter())
            .filter(|record| range.contains(record.timestamp))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn schema(&self, stream: &str) -> Option<Schema> {
        let ctx = self.context(stream).await?;
        let state = ctx.state.lock().await;
        Some(state.schema.clone())
    }

    /// All known streams, sorted.
    pub async fn streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn stats(&self, stream: &str) -> Option<StagingStats> {
        let ctx = self.context(stream).await?;
        let state = ctx.state.lock().await;
        Some(StagingStats {
            buffered_records: state.current.len(),
            buffered_bytes: state.current_bytes,
            pending_batches: state.pending.len(),
            pending_records: state.pending.iter().map(|b| b.len()).sum(),
            schema_fields: state.schema.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::{Error, FieldType, FieldValue};
    use std::collections::BTreeMap;

    fn record(ts: i64, status: FieldValue) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("status".to_string(), status);
        Record::new(ts, fields)
    }

    fn buffer(max_records: usize) -> StagingBuffer {
        StagingBuffer::new(
            "ingest-1",
            StagingConfig {
                flush_max_records: max_records,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_append_assigns_identity_and_creates_stream() {
        let staging = buffer(100);
        let first = staging
            .append("events", record(1, FieldValue::Int(200)))
            .await
            .unwrap();
        assert!(first.new_stream);
        assert_eq!(
            first.first_id,
            Some(RecordId {
                origin: "ingest-1".to_string(),
                sequence: 0
            })
        );

        let second = staging
            .append("events", record(2, FieldValue::Int(200)))
            .await
            .unwrap();
        assert!(!second.new_stream);
        assert_eq!(second.first_id.unwrap().sequence, 1);
        assert_eq!(staging.streams().await, vec!["events"]);
    }

    #[tokio::test]
    async fn test_schema_mismatch_leaves_schema_and_batch_unchanged() {
        let staging = buffer(100);
        staging
            .append("events", record(1, FieldValue::Int(200)))
            .await
            .unwrap();

        let err = staging
            .append("events", record(2, FieldValue::Text("ok".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));

        let schema = staging.schema("events").await.unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.field_type("status"), Some(FieldType::Int));
        assert_eq!(staging.stats("events").await.unwrap().buffered_records, 1);
    }

    #[tokio::test]
    async fn test_append_all_is_all_or_nothing() {
        let staging = buffer(100);
        let err = staging
            .append_all(
                "events",
                vec![
                    record(1, FieldValue::Int(200)),
                    record(2, FieldValue::Text("bad".to_string())),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        // The rejected first write did not create the stream
        assert!(staging.streams().await.is_empty());
    }

    #[tokio::test]
    async fn test_size_threshold_detaches_in_append() {
        let staging = buffer(100);
        let records: Vec<Record> = (0..150).map(|i| record(i, FieldValue::Int(i))).collect();
        let outcome = staging.append_all("events", records).await.unwrap();

        assert_eq!(outcome.accepted, 150);
        assert_eq!(outcome.detached.len(), 1);
        assert_eq!(outcome.detached[0].len(), 100);
        assert_eq!(outcome.detached[0].batch_no, 0);

        let stats = staging.stats("events").await.unwrap();
        assert_eq!(stats.buffered_records, 50);
        assert_eq!(stats.pending_batches, 1);
        assert_eq!(stats.pending_records, 100);
    }

    #[tokio::test]
    async fn test_flush_detaches_and_empty_flush_is_none() {
        let staging = buffer(100);
        assert!(staging.flush("events").await.is_none());

        staging
            .append("events", record(1, FieldValue::Int(1)))
            .await
            .unwrap();
        let batch = staging.flush("events").await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(staging.flush("events").await.is_none());

        staging
            .append("events", record(2, FieldValue::Int(2)))
            .await
            .unwrap();
        assert_eq!(staging.flush("events").await.unwrap().batch_no, 1);
    }

    #[tokio::test]
    async fn test_snapshot_covers_pending_and_current() {
        let staging = buffer(100);
        for ts in 0..5 {
            staging
                .append("events", record(ts, FieldValue::Int(ts)))
                .await
                .unwrap();
        }
        staging.flush("events").await.unwrap();
        for ts in 5..10 {
            staging
                .append("events", record(ts, FieldValue::Int(ts)))
                .await
                .unwrap();
        }

        let all = staging.snapshot("events", TimeRange::all(), None).await;
        assert_eq!(all.len(), 10);

        let ranged = staging
            .snapshot("events", TimeRange::new(3, 7), None)
            .await;
        let ts: Vec<i64> = ranged.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![3, 4, 5, 6]);

        let limited = staging.snapshot("events", TimeRange::all(), Some(2)).await;
        assert_eq!(limited.len(), 2);

        staging.mark_committed("events", 0).await;
        let after_commit = staging.snapshot("events", TimeRange::all(), None).await;
        assert_eq!(after_commit.len(), 5);
        assert!(staging.pending("events").await.is_empty());
    }

    #[tokio::test]
    async fn test_due_for_flush() {
        let staging = StagingBuffer::new(
            "ingest-1",
            StagingConfig {
                flush_interval_ms: 1_000,
                ..Default::default()
            },
        );
        let now = loghouse_core::now_ms();
        assert!(!staging.due_for_flush("events", now).await);

        staging
            .append("events", record(1, FieldValue::Int(1)))
            .await
            .unwrap();
        assert!(!staging.due_for_flush("events", now).await);
        assert!(staging.due_for_flush("events", now + 10_000).await);

        staging.flush("events").await.unwrap();
        assert!(!staging.due_for_flush("events", now + 10_000).await);
    }

    #[tokio::test]
    async fn test_invalid_stream_name_rejected() {
        let staging = buffer(100);
        assert!(matches!(
            staging.append("bad/name", record(1, FieldValue::Int(1))).await,
            Err(Error::InvalidStreamName(_))
        ));
    }
}
