//! Live Fan-out
//!
//! Query nodes read records that are accepted but not yet committed by
//! asking every active ingest node for a snapshot of its staging buffer.
//! [`LiveDataSource`] is the seam; [`HttpFanout`] calls the ingest node's
//! `GET /internal/v1/streams/:stream/buffered` route, and its `schema` and
//! `stats` siblings for per-node staging state.

use crate::error::{QueryError, Result};
use async_trait::async_trait;
use loghouse_agent::IngestorRecord;
use loghouse_core::{Record, Schema, TimeRange};
use loghouse_storage::StagingStats;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Route an ingest node serves buffered snapshots on.
pub fn buffered_path(stream: &str) -> String {
    format!("/internal/v1/streams/{}/buffered", stream)
}

/// Route an ingest node serves a stream's staging schema on.
pub fn schema_path(stream: &str) -> String {
    format!("/internal/v1/streams/{}/schema", stream)
}

/// Route an ingest node serves a stream's staging counters on.
pub fn stats_path(stream: &str) -> String {
    format!("/internal/v1/streams/{}/stats", stream)
}

/// `start` / `end` / `limit` query parameters shared by the query and
/// fan-out routes. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RangeParams {
    pub fn new(range: TimeRange, limit: Option<usize>) -> Self {
        let all = TimeRange::all();
        Self {
            start: (range.start != all.start).then_some(range.start),
            end: (range.end != all.end).then_some(range.end),
            limit,
        }
    }

    pub fn range(&self) -> TimeRange {
        let all = TimeRange::all();
        TimeRange::new(self.start.unwrap_or(all.start), self.end.unwrap_or(all.end))
    }
}

/// Body of a buffered snapshot response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedResponse {
    pub node_id: String,
    pub records: Vec<Record>,
}

/// Source of a live node's uncommitted records.
#[async_trait]
pub trait LiveDataSource: Send + Sync {
    /// Uncommitted records of `stream` within `range` held by `node`.
    ///
    /// Any failure is reported as [`QueryError::NodeUnreachable`].
    async fn buffered(
        &self,
        node: &IngestorRecord,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>>;

    /// Staging counters `node` holds for `stream`, `None` when the node has
    /// never seen the stream. Sources that only serve records report `None`.
    async fn staging_stats(
        &self,
        _node: &IngestorRecord,
        _stream: &str,
    ) -> Result<Option<StagingStats>> {
        Ok(None)
    }

    /// Schema `node` has inferred for `stream`, `None` when unknown.
    async fn schema(&self, _node: &IngestorRecord, _stream: &str) -> Result<Option<Schema>> {
        Ok(None)
    }
}

/// [`LiveDataSource`] over the ingest nodes' HTTP API.
#[derive(Debug, Clone)]
pub struct HttpFanout {
    http_client: reqwest::Client,
}

impl HttpFanout {
    /// `timeout` bounds each request; the coordinator applies its own
    /// deadline on top.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

impl HttpFanout {
    /// GETs `path` on `node`. A 404 is `None`; any other failure is
    /// [`QueryError::NodeUnreachable`].
    async fn get_json<T: DeserializeOwned>(
        &self,
        node: &IngestorRecord,
        path: &str,
        params: Option<&RangeParams>,
    ) -> Result<Option<T>> {
        let unreachable = |reason: String| QueryError::NodeUnreachable {
            node_id: node.node_id.clone(),
            reason,
        };
        let url = format!("{}{}", node.endpoint.trim_end_matches('/'), path);

        let mut request = self.http_client.get(&url);
        if let Some(params) = params {
            request = request.query(params);
        }
        let response = request
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| unreachable(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl LiveDataSource for HttpFanout {
    async fn buffered(
        &self,
        node: &IngestorRecord,
        stream: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let params = RangeParams::new(range, limit);
        let body: Option<BufferedResponse> = self
            .get_json(node, &buffered_path(stream), Some(&params))
            .await?;
        // Ingest nodes answer every stream name here, so a 404 means the
        // endpoint is not an ingest node.
        body.map(|body| body.records)
            .ok_or_else(|| QueryError::NodeUnreachable {
                node_id: node.node_id.clone(),
                reason: format!("HTTP {}", StatusCode::NOT_FOUND),
            })
    }

    async fn staging_stats(
        &self,
        node: &IngestorRecord,
        stream: &str,
    ) -> Result<Option<StagingStats>> {
        self.get_json(node, &stats_path(stream), None).await
    }

    async fn schema(&self, node: &IngestorRecord, stream: &str) -> Result<Option<Schema>> {
        self.get_json(node, &schema_path(stream), None).await
    }
}
