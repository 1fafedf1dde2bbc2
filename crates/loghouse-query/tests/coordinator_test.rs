use async_trait::async_trait;
use bytes::Bytes;
use loghouse_agent::{IngestorRecord, IngestorRegistry, ManualClock, RegistryConfig};
use loghouse_catalog::{Catalog, MemoryCatalog};
use loghouse_core::{FieldType, FieldValue, Record, Schema, TimeRange};
use loghouse_query::{LiveDataSource, QueryConfig, QueryCoordinator, QueryError, Result};
use loghouse_storage::{
    IngestConfig, IngestPipeline, ObjectStoreBackend, StagingConfig, StagingStats, StorageBackend,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Serves snapshots straight from in-process pipelines keyed by node id.
#[derive(Default)]
struct PipelineSource {
    nodes: HashMap<String, IngestPipeline>,
    /// Snapshot returned instead of the live one, to replay a stale read
    stale: Mutex<Option<Vec<Record>>>,
}

#[async_trait]
impl LiveDataSource for PipelineSource {
    async fn buffered(
        &self,
        node: &IngestorRecord,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        if let Some(records) = self.stale.lock().await.take() {
            return Ok(records);
        }
        match self.nodes.get(&node.node_id) {
            Some(pipeline) => Ok(pipeline.snapshot(stream, range, limit).await),
            None => Err(QueryError::NodeUnreachable {
                node_id: node.node_id.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }

    async fn staging_stats(
        &self,
        node: &IngestorRecord,
        stream: &str,
    ) -> Result<Option<StagingStats>> {
        Ok(self.pipeline(node)?.staging().stats(stream).await)
    }

    async fn schema(&self, node: &IngestorRecord, stream: &str) -> Result<Option<Schema>> {
        Ok(self.pipeline(node)?.staging().schema(stream).await)
    }
}

impl PipelineSource {
    fn pipeline(&self, node: &IngestorRecord) -> Result<&IngestPipeline> {
        self.nodes
            .get(&node.node_id)
            .ok_or_else(|| QueryError::NodeUnreachable {
                node_id: node.node_id.clone(),
                reason: "connection refused".to_string(),
            })
    }
}

/// Commits the node's buffered records before answering, so the commit lands
/// between the first catalog listing and the live response.
struct CommitDuringFanout {
    pipeline: IngestPipeline,
}

#[async_trait]
impl LiveDataSource for CommitDuringFanout {
    async fn buffered(
        &self,
        _node: &IngestorRecord,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        self.pipeline
            .flush(stream)
            .await
            .map_err(|e| QueryError::Internal(e.to_string()))?;
        Ok(self.pipeline.snapshot(stream, range, limit).await)
    }
}

/// Never answers.
struct HangingSource;

#[async_trait]
impl LiveDataSource for HangingSource {
    async fn buffered(
        &self,
        _node: &IngestorRecord,
        _stream: &str,
        _range: TimeRange,
        _limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn staging_stats(
        &self,
        _node: &IngestorRecord,
        _stream: &str,
    ) -> Result<Option<StagingStats>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
}

struct Cluster {
    backend: Arc<ObjectStoreBackend>,
    catalog: Arc<MemoryCatalog>,
    registry: Arc<IngestorRegistry>,
    pipeline: IngestPipeline,
}

impl Cluster {
    async fn new(flush_max_records: usize) -> Self {
        let backend = Arc::new(ObjectStoreBackend::in_memory());
        let catalog = Arc::new(MemoryCatalog::new());
        let config = IngestConfig {
            staging: StagingConfig {
                flush_max_records,
                flush_interval_ms: 60_000,
                ..Default::default()
            },
            ..IngestConfig::new("ingest-1")
        };
        let pipeline = IngestPipeline::new(config, backend.clone(), catalog.clone());
        let registry = Arc::new(IngestorRegistry::new(
            &RegistryConfig::default(),
            Arc::new(ManualClock::new(1_000)),
        ));
        registry
            .heartbeat("ingest-1", "http://ingest-1:8001")
            .await
            .unwrap();

        Self {
            backend,
            catalog,
            registry,
            pipeline,
        }
    }

    fn source(&self) -> PipelineSource {
        PipelineSource {
            nodes: HashMap::from([("ingest-1".to_string(), self.pipeline.clone())]),
            ..Default::default()
        }
    }

    fn coordinator(&self, live: Arc<dyn LiveDataSource>, config: QueryConfig) -> QueryCoordinator {
        QueryCoordinator::new(
            self.catalog.clone(),
            self.backend.clone(),
            self.registry.clone(),
            live,
            config,
        )
    }
}

fn record(ts: i64) -> Record {
    Record::new(ts, BTreeMap::from([("n".to_string(), FieldValue::Int(ts))]))
}

fn timestamps(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r.timestamp).collect()
}

#[tokio::test]
async fn test_150_records_split_between_catalog_and_live() {
    let cluster = Cluster::new(100).await;
    cluster
        .pipeline
        .append("events", (0..150).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.commit_pending("events").await.unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 150);
    assert_eq!(result.durable_rows, 100);
    assert_eq!(result.live_rows, 50);
    assert!(!result.is_partial());
    assert_eq!(timestamps(&result.records), (0..150).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_durable_only_query_is_sorted_and_filtered() {
    let cluster = Cluster::new(10_000).await;
    // Out-of-order arrivals across three segments
    for chunk in [vec![5, 1, 3], vec![2, 9, 4], vec![8, 6, 7]] {
        cluster
            .pipeline
            .append("events", chunk.into_iter().map(record).collect())
            .await
            .unwrap();
        cluster.pipeline.flush("events").await.unwrap();
    }

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::new(2, 8), None)
        .await
        .unwrap();

    assert_eq!(timestamps(&result.records), vec![2, 3, 4, 5, 6, 7]);
    assert_eq!(result.live_rows, 0);
}

#[tokio::test]
async fn test_record_moves_from_live_to_catalog() {
    let cluster = Cluster::new(10_000).await;
    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());

    cluster
        .pipeline
        .append("events", vec![record(1)])
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();
    cluster
        .pipeline
        .append("events", vec![record(2)])
        .await
        .unwrap();

    let before = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();
    assert_eq!(before.durable_rows, 1);
    assert_eq!(before.live_rows, 1);
    let catalogued = cluster
        .catalog
        .list_manifests("events", TimeRange::new(2, 3))
        .await
        .unwrap();
    assert!(catalogued.is_empty());

    cluster.pipeline.flush("events").await.unwrap();
    let after = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();
    assert_eq!(after.durable_rows, 2);
    assert_eq!(after.live_rows, 0);
    assert_eq!(timestamps(&after.records), vec![1, 2]);
}

#[tokio::test]
async fn test_stale_live_copy_is_deduplicated() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..10).map(record).collect())
        .await
        .unwrap();

    // Live read taken before the commit lands, segment read after
    let stale = cluster
        .pipeline
        .snapshot("events", TimeRange::all(), None)
        .await;
    cluster.pipeline.flush("events").await.unwrap();

    let source = cluster.source();
    *source.stale.lock().await = Some(stale);
    let coordinator = cluster.coordinator(Arc::new(source), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 10);
    assert_eq!(result.durable_rows, 10);
    assert_eq!(result.live_rows, 0);
    assert_eq!(result.duplicates, 10);
}

#[tokio::test]
async fn test_commit_during_fanout_is_not_lost() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..10).map(record).collect())
        .await
        .unwrap();

    let source = CommitDuringFanout {
        pipeline: cluster.pipeline.clone(),
    };
    let coordinator = cluster.coordinator(Arc::new(source), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();

    assert_eq!(timestamps(&result.records), (0..10).collect::<Vec<_>>());
    assert_eq!(result.durable_rows, 10);
    assert_eq!(result.live_rows, 0);
    assert!(!result.is_partial());
}

#[tokio::test]
async fn test_unreachable_node_gives_partial_result() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .registry
        .heartbeat("ingest-2", "http://ingest-2:8001")
        .await
        .unwrap();
    cluster
        .pipeline
        .append("events", (0..5).map(record).collect())
        .await
        .unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 5);
    assert!(result.is_partial());
    assert_eq!(result.unreachable.len(), 1);
    assert_eq!(result.unreachable[0].node_id, "ingest-2");
    assert_eq!(result.unreachable[0].reason, "connection refused");
}

#[tokio::test]
async fn test_fanout_deadline_keeps_durable_rows() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..5).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();

    let config = QueryConfig {
        fanout_timeout_ms: 50,
        ..Default::default()
    };
    let coordinator = cluster.coordinator(Arc::new(HangingSource), config);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.query("events", TimeRange::all(), None),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(result.durable_rows, 5);
    assert_eq!(result.unreachable.len(), 1);
    assert!(result.unreachable[0].reason.contains("50ms"));
}

#[tokio::test]
async fn test_missing_segment_fails_query() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..5).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();

    let entry = cluster
        .catalog
        .list_manifests("events", TimeRange::all())
        .await
        .unwrap()
        .remove(0);
    cluster.backend.delete(&entry.location).await.unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let err = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap_err();
    assert!(err.is_integrity_failure());
}

#[tokio::test]
async fn test_corrupt_segment_fails_query() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..5).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();

    let entry = cluster
        .catalog
        .list_manifests("events", TimeRange::all())
        .await
        .unwrap()
        .remove(0);
    cluster
        .backend
        .put(&entry.location, Bytes::from_static(b"not a parquet file"))
        .await
        .unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let err = coordinator
        .query("events", TimeRange::all(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::DataIntegrity(ref msg) if msg.contains("Checksum mismatch")));
}

#[tokio::test]
async fn test_limit_and_stats() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..20).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();
    cluster
        .pipeline
        .append("events", (20..30).map(record).collect())
        .await
        .unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let result = coordinator
        .query("events", TimeRange::all(), Some(5))
        .await
        .unwrap();
    assert_eq!(timestamps(&result.records), vec![0, 1, 2, 3, 4]);
    assert!(result.truncated);

    let stats = coordinator.stream_stats("events").await.unwrap().unwrap();
    assert_eq!(stats.segments, 1);
    assert_eq!(stats.rows, 20);
    assert_eq!(coordinator.list_streams().await.unwrap(), vec!["events"]);

    assert!(coordinator.stream_stats("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_stream_name_rejected() {
    let cluster = Cluster::new(10_000).await;
    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let err = coordinator
        .query("bad/name", TimeRange::all(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Core(_)));
}

#[tokio::test]
async fn test_stream_overview_merges_catalog_and_live() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("events", (0..20).map(record).collect())
        .await
        .unwrap();
    cluster.pipeline.flush("events").await.unwrap();
    cluster
        .pipeline
        .append("events", (20..27).map(record).collect())
        .await
        .unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let overview = coordinator.stream_overview("events").await.unwrap().unwrap();
    assert_eq!(overview.durable.as_ref().unwrap().rows, 20);
    assert_eq!(overview.live.len(), 1);
    assert_eq!(overview.live[0].node_id, "ingest-1");
    assert_eq!(overview.live[0].stats.buffered_records, 7);
    assert_eq!(overview.uncommitted_records, 7);
    assert!(overview.unreachable.is_empty());

    assert!(coordinator.stream_overview("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stream_overview_of_buffered_only_stream() {
    let cluster = Cluster::new(10_000).await;
    cluster
        .pipeline
        .append("fresh", (0..3).map(record).collect())
        .await
        .unwrap();

    let coordinator = cluster.coordinator(Arc::new(cluster.source()), QueryConfig::default());
    let overview = coordinator.stream_overview("fresh").await.unwrap().unwrap();
    assert!(overview.durable.is_none());
    assert_eq!(overview.uncommitted_records, 3);
}

#[tokio::test]
async fn test_stream_overview_reports_hanging_node() {
    let cluster = Cluster::new(10_000).await;
    let config = QueryConfig {
        fanout_timeout_ms: 50,
        ..Default::default()
    };
    let coordinator = cluster.coordinator(Arc::new(HangingSource), config);

    let overview = coordinator.stream_overview("events").await.unwrap().unwrap();
    assert!(overview.durable.is_none());
    assert!(overview.live.is_empty());
    assert_eq!(overview.unreachable.len(), 1);
    assert_eq!(overview.unreachable[0].node_id, "ingest-1");
}

#[tokio::test]
async fn test_stream_schema_unions_live_nodes() {
    let cluster = Cluster::new(10_000).await;
    let second = IngestPipeline::new(
        IngestConfig::new("ingest-2"),
        cluster.backend.clone(),
        cluster.catalog.clone(),
    );
    cluster
        .registry
        .heartbeat("ingest-2", "http://ingest-2:8001")
        .await
        .unwrap();

    let mut fields = BTreeMap::from([("n".to_string(), FieldValue::Int(1))]);
    fields.insert("host".to_string(), FieldValue::Text("a".to_string()));
    cluster
        .pipeline
        .append("events", vec![Record::new(1, fields)])
        .await
        .unwrap();
    let mut fields = BTreeMap::from([("n".to_string(), FieldValue::Text("one".to_string()))]);
    fields.insert("latency".to_string(), FieldValue::Float(0.5));
    second
        .append("events", vec![Record::new(2, fields)])
        .await
        .unwrap();

    let source = PipelineSource {
        nodes: HashMap::from([
            ("ingest-1".to_string(), cluster.pipeline.clone()),
            ("ingest-2".to_string(), second.clone()),
        ]),
        ..Default::default()
    };
    let coordinator = cluster.coordinator(Arc::new(source), QueryConfig::default());

    let merged = coordinator.stream_schema("events").await.unwrap().unwrap();
    assert_eq!(merged.schema.field_type("host"), Some(FieldType::Text));
    assert_eq!(merged.schema.field_type("latency"), Some(FieldType::Float));
    assert!(merged.schema.field_type("n").is_some());
    assert_eq!(merged.conflicts, vec!["n".to_string()]);

    assert!(coordinator.stream_schema("missing").await.unwrap().is_none());

    second.shutdown().await;
}
