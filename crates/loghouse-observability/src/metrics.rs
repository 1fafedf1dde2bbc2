use lazy_static::lazy_static;
use prometheus::{
    core::Collector, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Ingest Metrics
    // ============================================================================

    /// Records accepted into a staging buffer
    pub static ref RECORDS_APPENDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_records_appended_total", "Total records accepted into staging"),
        &["stream"]
    ).expect("metric can be created");

    /// Records rejected at append
    pub static ref RECORDS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_records_rejected_total", "Total records rejected at append"),
        &["stream", "reason"] // schema_mismatch, invalid_record
    ).expect("metric can be created");

    /// Batches detached from staging
    pub static ref BATCHES_FLUSHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_batches_flushed_total", "Total batches detached for compaction"),
        &["stream", "trigger"] // size, interval, manual
    ).expect("metric can be created");

    /// Messages consumed from a message queue
    pub static ref QUEUE_MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_queue_messages_total", "Total queue messages consumed"),
        &["stream", "outcome"] // acked, nacked, dead_lettered
    ).expect("metric can be created");

    // ============================================================================
    // Storage Metrics
    // ============================================================================

    /// Segments committed to the catalog
    pub static ref SEGMENTS_COMMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_segments_committed_total", "Total segments committed"),
        &["stream"]
    ).expect("metric can be created");

    /// Commits that found the checksum already in the catalog
    pub static ref DUPLICATE_COMMITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_duplicate_commits_total", "Total idempotent duplicate commits"),
        &["stream"]
    ).expect("metric can be created");

    /// Segment size in bytes
    pub static ref SEGMENT_SIZE_BYTES: HistogramVec = HistogramVec::new(
        HistogramOpts::new("loghouse_segment_size_bytes", "Encoded segment size in bytes")
            .buckets(vec![1024.0, 16384.0, 131072.0, 1048576.0, 8388608.0, 67108864.0]),
        &["stream"]
    ).expect("metric can be created");

    /// Upload attempts that failed and were retried
    pub static ref UPLOAD_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_upload_retries_total", "Total upload retries"),
        &["stream"]
    ).expect("metric can be created");

    /// Uploads that exhausted their retry budget
    pub static ref UPLOAD_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_upload_failures_total", "Total uploads that exhausted retries"),
        &["stream"]
    ).expect("metric can be created");

    /// Storage backend request latency
    pub static ref STORAGE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("loghouse_storage_latency_seconds", "Storage request latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["operation"] // put, get, list, delete
    ).expect("metric can be created");

    /// Storage backend errors
    pub static ref STORAGE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_storage_errors_total", "Total storage backend errors"),
        &["operation", "error_type"]
    ).expect("metric can be created");

    // ============================================================================
    // Query Metrics
    // ============================================================================

    /// Query latency
    pub static ref QUERY_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("loghouse_query_latency_seconds", "Query latency in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["stream"]
    ).expect("metric can be created");

    /// Queries answered without every live node
    pub static ref PARTIAL_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("loghouse_partial_queries_total", "Total queries with unreachable live nodes"),
        &["stream"]
    ).expect("metric can be created");

    /// Queries failed on a missing or corrupt segment
    pub static ref INTEGRITY_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "loghouse_integrity_failures_total",
        "Total queries failed on missing or corrupt segments"
    ).expect("metric can be created");

    // ============================================================================
    // Cluster Metrics
    // ============================================================================

    /// Heartbeats received by the registry
    pub static ref HEARTBEATS_RECEIVED_TOTAL: IntCounter = IntCounter::new(
        "loghouse_heartbeats_received_total",
        "Total heartbeats received"
    ).expect("metric can be created");

    /// Heartbeats that could not be delivered
    pub static ref HEARTBEAT_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "loghouse_heartbeat_failures_total",
        "Total heartbeats that failed to send"
    ).expect("metric can be created");

    /// Ingest nodes seen active at the last registry read
    pub static ref INGESTORS_ACTIVE: IntGauge = IntGauge::new(
        "loghouse_ingestors_active",
        "Number of active ingest nodes"
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(RECORDS_APPENDED_TOTAL.clone()),
            Box::new(RECORDS_REJECTED_TOTAL.clone()),
            Box::new(BATCHES_FLUSHED_TOTAL.clone()),
            Box::new(QUEUE_MESSAGES_TOTAL.clone()),
            Box::new(SEGMENTS_COMMITTED_TOTAL.clone()),
            Box::new(DUPLICATE_COMMITS_TOTAL.clone()),
            Box::new(SEGMENT_SIZE_BYTES.clone()),
            Box::new(UPLOAD_RETRIES_TOTAL.clone()),
            Box::new(UPLOAD_FAILURES_TOTAL.clone()),
            Box::new(STORAGE_LATENCY.clone()),
            Box::new(STORAGE_ERRORS_TOTAL.clone()),
            Box::new(QUERY_LATENCY.clone()),
            Box::new(PARTIAL_QUERIES_TOTAL.clone()),
            Box::new(INTEGRITY_FAILURES_TOTAL.clone()),
            Box::new(HEARTBEATS_RECEIVED_TOTAL.clone()),
            Box::new(HEARTBEAT_FAILURES_TOTAL.clone()),
            Box::new(INGESTORS_ACTIVE.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric can be registered");
        }
    });
}
