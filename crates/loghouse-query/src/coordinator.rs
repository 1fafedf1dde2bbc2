//! Query Coordinator
//!
//! Answers `query(stream, range)` on a query node by combining two views
//! that are resolved concurrently:
//!
//! 1. **Durable**: manifest entries from the catalog, whose segments are
//!    fetched from the storage backend, checksum-verified and filtered to the
//!    range. Segments are read with bounded concurrency and kept in commit
//!    order.
//! 2. **Live**: every ingest node the registry reports as active is asked for
//!    its uncommitted records, each under its own deadline.
//!
//! A batch that commits while the fan-out is in flight has already left the
//! live view when its node answers, and may have missed the first catalog
//! listing. The catalog is therefore listed again once every live response is
//! in, and segments not seen in the first listing are read as well. Rows in
//! both views are de-duplicated by record id.
//!
//! [`QueryCoordinator::stream_overview`] and
//! [`QueryCoordinator::stream_schema`] use the same fan-out to combine the
//! catalog's totals with each live node's staging state.
//!
//! A live node that times out or errors is reported in
//! [`QueryResult::unreachable`] and the query still succeeds. A catalogued
//! segment that is missing or corrupt fails the whole query with
//! [`QueryError::DataIntegrity`].

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::live::LiveDataSource;
use crate::merge::merge;
use futures::{StreamExt, TryStreamExt};
use loghouse_agent::{IngestorRecord, IngestorRegistry};
use loghouse_catalog::{Catalog, ManifestEntry, StreamStats};
use loghouse_core::{validate_stream_name, Record, Schema, TimeRange};
use loghouse_observability::metrics::{INTEGRITY_FAILURES_TOTAL, PARTIAL_QUERIES_TOTAL, QUERY_LATENCY};
use loghouse_storage::{SegmentReader, StagingStats, StorageBackend};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// A live node left out of a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreachableNode {
    pub node_id: String,
    pub endpoint: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub durable_rows: usize,
    pub live_rows: usize,
    /// Live copies dropped in favour of their committed segment rows
    pub duplicates: usize,
    pub truncated: bool,
    /// Live nodes whose records are missing from this result
    pub unreachable: Vec<UnreachableNode>,
}

impl QueryResult {
    pub fn is_partial(&self) -> bool {
        !self.unreachable.is_empty()
    }
}

/// Staging counters one live node reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStagingStats {
    pub node_id: String,
    pub stats: StagingStats,
}

/// Committed totals plus what live nodes still hold for a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamOverview {
    pub stream: String,
    pub durable: Option<StreamStats>,
    pub live: Vec<NodeStagingStats>,
    /// Buffered plus detached-but-uncommitted records across `live`
    pub uncommitted_records: usize,
    pub unreachable: Vec<UnreachableNode>,
}

/// Union of the schemas live nodes have inferred for a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSchema {
    pub stream: String,
    pub schema: Schema,
    /// Fields two nodes typed differently; the first node's type is kept
    pub conflicts: Vec<String>,
    pub unreachable: Vec<UnreachableNode>,
}

pub struct QueryCoordinator {
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn StorageBackend>,
    registry: Arc<IngestorRegistry>,
    live: Arc<dyn LiveDataSource>,
    config: QueryConfig,
}

impl QueryCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        backend: Arc<dyn StorageBackend>,
        registry: Arc<IngestorRegistry>,
        live: Arc<dyn LiveDataSource>,
        config: QueryConfig,
    ) -> Self {
        Self {
            catalog,
            backend,
            registry,
            live,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<IngestorRegistry> {
        &self.registry
    }

    /// Records of `stream` within `range`, ordered by timestamp.
    #[tracing::instrument(skip(self))]
    pub async fn query(
        &self,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<QueryResult> {
        validate_stream_name(stream)?;
        let start = Instant::now();

        if range.is_empty() {
            return Ok(QueryResult {
                records: Vec::new(),
                durable_rows: 0,
                live_rows: 0,
                duplicates: 0,
                truncated: false,
                unreachable: Vec::new(),
            });
        }

        let (durable, (live, unreachable)) = tokio::join!(
            self.read_durable(stream, range),
            self.read_live(stream, range, limit)
        );
        let (seen, mut durable) = durable?;

        let late: Vec<ManifestEntry> = self
            .catalog
            .list_manifests(stream, range)
            .await?
            .into_iter()
            .filter(|entry| !seen.contains(&entry.checksum))
            .collect();
        if !late.is_empty() {
            tracing::debug!(segments = late.len(), "Reading segments committed during fan-out");
            durable.extend(self.read_segments(late, range).await?);
        }

        let merged = merge(durable, live, limit);
        if !unreachable.is_empty() {
            PARTIAL_QUERIES_TOTAL.with_label_values(&[stream]).inc();
            tracing::warn!(
                stream = %stream,
                unreachable = unreachable.len(),
                "Returning partial result"
            );
        }
        QUERY_LATENCY
            .with_label_values(&[stream])
            .observe(start.elapsed().as_secs_f64());
        tracing::debug!(
            durable_rows = merged.durable_rows,
            live_rows = merged.live_rows,
            duplicates = merged.duplicates,
            "Query complete"
        );

        Ok(QueryResult {
            records: merged.records,
            durable_rows: merged.durable_rows,
            live_rows: merged.live_rows,
            duplicates: merged.duplicates,
            truncated: merged.truncated,
            unreachable,
        })
    }

    /// Summary of the stream's committed segments.
    pub async fn stream_stats(&self, stream: &str) -> Result<Option<StreamStats>> {
        validate_stream_name(stream)?;
        Ok(self.catalog.stream_stats(stream).await?)
    }

    /// Catalog totals merged with every live node's staging counters.
    /// `None` when nothing is committed, no node stages the stream and every
    /// node answered.
    #[tracing::instrument(skip(self))]
    pub async fn stream_overview(&self, stream: &str) -> Result<Option<StreamOverview>> {
        validate_stream_name(stream)?;
        let (durable, (live, unreachable)) = tokio::join!(
            self.catalog.stream_stats(stream),
            self.fan_out(|node| async move { self.live.staging_stats(&node, stream).await })
        );
        let durable = durable?;

        let live: Vec<NodeStagingStats> = live
            .into_iter()
            .filter_map(|(node, stats)| {
                stats.map(|stats| NodeStagingStats {
                    node_id: node.node_id,
                    stats,
                })
            })
            .collect();
        if durable.is_none() && live.is_empty() && unreachable.is_empty() {
            return Ok(None);
        }

        let uncommitted_records = live
            .iter()
            .map(|node| node.stats.buffered_records + node.stats.pending_records)
            .sum();
        Ok(Some(StreamOverview {
            stream: stream.to_string(),
            durable,
            live,
            uncommitted_records,
            unreachable,
        }))
    }

    /// Schema of `stream` as the live nodes see it. `None` when no node
    /// stages the stream and every node answered.
    #[tracing::instrument(skip(self))]
    pub async fn stream_schema(&self, stream: &str) -> Result<Option<StreamSchema>> {
        validate_stream_name(stream)?;
        let (schemas, unreachable) = self
            .fan_out(|node| async move { self.live.schema(&node, stream).await })
            .await;

        let mut known = false;
        let mut merged = Schema::default();
        let mut conflicts: Vec<String> = Vec::new();
        for (node, schema) in schemas {
            let Some(schema) = schema else { continue };
            known = true;
            for (name, ty) in schema.fields() {
                let single = Schema::new([(name.to_string(), ty)].into_iter().collect());
                match merged.merge(&single) {
                    Ok(next) => merged = next,
                    Err(_) => {
                        tracing::warn!(
                            stream = %stream,
                            node_id = %node.node_id,
                            field = %name,
                            "Live nodes disagree on field type"
                        );
                        if !conflicts.iter().any(|c| c == name) {
                            conflicts.push(name.to_string());
                        }
                    }
                }
            }
        }
        if !known && unreachable.is_empty() {
            return Ok(None);
        }

        Ok(Some(StreamSchema {
            stream: stream.to_string(),
            schema: merged,
            conflicts,
            unreachable,
        }))
    }

    pub async fn list_streams(&self) -> Result<Vec<String>> {
        Ok(self.catalog.list_streams().await?)
    }

    /// Rows of every listed segment, with the checksums that were listed.
    async fn read_durable(
        &self,
        stream: &str,
        range: TimeRange,
    ) -> Result<(HashSet<String>, Vec<Record>)> {
        let entries = self.catalog.list_manifests(stream, range).await?;
        let seen = entries.iter().map(|entry| entry.checksum.clone()).collect();
        Ok((seen, self.read_segments(entries, range).await?))
    }

    async fn read_segments(
        &self,
        entries: Vec<ManifestEntry>,
        range: TimeRange,
    ) -> Result<Vec<Record>> {
        let segments: Vec<Vec<Record>> = futures::stream::iter(entries)
            .map(|entry| self.read_segment(entry, range))
            .buffered(self.config.segment_read_concurrency.max(1))
            .try_collect()
            .await?;
        Ok(segments.into_iter().flatten().collect())
    }

    async fn read_segment(&self, entry: ManifestEntry, range: TimeRange) -> Result<Vec<Record>> {
        let bytes = match self.backend.get(&entry.location).await {
            Ok(bytes) => bytes,
            Err(loghouse_storage::Error::NotFound(_)) => {
                return Err(integrity_failure(
                    &entry,
                    format!("segment {} is missing from storage", entry.location),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let location = entry.location.clone();
        let checksum = entry.checksum.clone();
        let decoded =
            tokio::task::spawn_blocking(move || SegmentReader::read(&location, bytes, &checksum, range))
                .await
                .map_err(|e| QueryError::Internal(format!("segment decode task failed: {}", e)))?;

        match decoded {
            Ok(records) => Ok(records),
            Err(e @ loghouse_storage::Error::ChecksumMismatch { .. }) => {
                Err(integrity_failure(&entry, e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_live(
        &self,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> (Vec<Record>, Vec<UnreachableNode>) {
        let (responses, unreachable) = self
            .fan_out(|node| async move { self.live.buffered(&node, stream, range, limit).await })
            .await;
        let records = responses
            .into_iter()
            .flat_map(|(_, buffered)| buffered)
            .collect();
        (records, unreachable)
    }

    /// Runs `call` against every active node, each under the fan-out
    /// deadline. Nodes that error or time out are returned separately.
    async fn fan_out<T, F, Fut>(&self, call: F) -> (Vec<(IngestorRecord, T)>, Vec<UnreachableNode>)
    where
        F: Fn(IngestorRecord) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let nodes = self.registry.active_nodes().await;
        let deadline = self.config.fanout_timeout();

        let responses = futures::future::join_all(nodes.into_iter().map(|node| {
            let request = call(node.clone());
            async move { (node, tokio::time::timeout(deadline, request).await) }
        }))
        .await;

        let mut answered = Vec::new();
        let mut unreachable = Vec::new();
        for (node, result) in responses {
            match result {
                Ok(Ok(value)) => answered.push((node, value)),
                Ok(Err(e)) => unreachable.push(unreachable_node(&node, reason(e))),
                Err(_) => unreachable.push(unreachable_node(
                    &node,
                    format!("no response within {}ms", deadline.as_millis()),
                )),
            }
        }
        (answered, unreachable)
    }
}

fn integrity_failure(entry: &ManifestEntry, message: String) -> QueryError {
    INTEGRITY_FAILURES_TOTAL.inc();
    tracing::error!(
        stream = %entry.stream,
        segment_id = %entry.segment_id,
        location = %entry.location,
        error = %message,
        "Catalogued segment failed integrity check"
    );
    QueryError::DataIntegrity(message)
}

fn reason(error: QueryError) -> String {
    match error {
        QueryError::NodeUnreachable { reason, .. } => reason,
        other => other.to_string(),
    }
}

fn unreachable_node(node: &IngestorRecord, reason: String) -> UnreachableNode {
    tracing::warn!(node_id = %node.node_id, endpoint = %node.endpoint, reason = %reason, "Live node unreachable");
    UnreachableNode {
        node_id: node.node_id.clone(),
        endpoint: node.endpoint.clone(),
        reason,
    }
}
