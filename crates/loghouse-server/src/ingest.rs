//! Ingest node HTTP routes.
//!
//! - `POST /api/v1/ingest/:stream`: append a JSON object or array; the
//!   optional `x-loghouse-schema` header carries a JSON schema hint
//! - `POST /api/v1/queue/:stream`: enqueue the same payload for the queue
//!   ingest task and return `202` with the message id
//! - `GET /internal/v1/streams/:stream/buffered`: uncommitted records for
//!   query fan-out
//! - `GET /internal/v1/streams/:stream/schema`: schema inferred so far
//! - `GET /internal/v1/streams/:stream/stats`: staging counters
//! - `POST /internal/v1/streams/:stream/flush`: detach and commit now
//!
//! The schema and stats routes answer `404` for a stream this node has
//! never staged.

use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use loghouse_connectors::ChannelQueue;
use loghouse_core::{validate_stream_name, Schema, SchemaHint};
use loghouse_observability::create_metrics_router;
use loghouse_query::{BufferedResponse, RangeParams};
use loghouse_storage::{FlushReport, IngestPipeline, IngestReceipt, RecordSink, StagingStats};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const SCHEMA_HINT_HEADER: &str = "x-loghouse-schema";

#[derive(Clone)]
pub struct IngestState {
    pub pipeline: IngestPipeline,
    pub queue: Arc<ChannelQueue>,
}

pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/api/v1/ingest/:stream", post(ingest))
        .route("/api/v1/queue/:stream", post(enqueue))
        .route("/internal/v1/streams/:stream/buffered", get(buffered))
        .route("/internal/v1/streams/:stream/schema", get(schema))
        .route("/internal/v1/streams/:stream/stats", get(stats))
        .route("/internal/v1/streams/:stream/flush", post(flush))
        .route("/health", get(health))
        .merge(create_metrics_router::<IngestState>())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn schema_hint(headers: &HeaderMap) -> Result<Option<SchemaHint>, ApiError> {
    let Some(raw) = headers.get(SCHEMA_HINT_HEADER) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::bad_request("schema hint header is not valid UTF-8"))?;
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| ApiError::bad_request(format!("invalid schema hint: {}", e)))
}

async fn ingest(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestReceipt>, ApiError> {
    let hint = schema_hint(&headers)?;
    let receipt = state.pipeline.ingest(&stream, &body, hint.as_ref()).await?;
    Ok(Json(receipt))
}

async fn enqueue(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_stream_name(&stream)?;
    let hint = schema_hint(&headers)?;
    let id = state.queue.publish(stream, body, hint).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "message_id": id }))))
}

async fn buffered(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<BufferedResponse>, ApiError> {
    validate_stream_name(&stream)?;
    let records = state
        .pipeline
        .snapshot(&stream, params.range(), params.limit)
        .await;
    Ok(Json(BufferedResponse {
        node_id: state.pipeline.node_id().to_string(),
        records,
    }))
}

fn not_staged(stream: &str) -> ApiError {
    ApiError::not_found(format!("stream '{}' is not staged on this node", stream))
}

async fn schema(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
) -> Result<Json<Schema>, ApiError> {
    validate_stream_name(&stream)?;
    state
        .pipeline
        .staging()
        .schema(&stream)
        .await
        .map(Json)
        .ok_or_else(|| not_staged(&stream))
}

async fn stats(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
) -> Result<Json<StagingStats>, ApiError> {
    validate_stream_name(&stream)?;
    state
        .pipeline
        .staging()
        .stats(&stream)
        .await
        .map(Json)
        .ok_or_else(|| not_staged(&stream))
}

async fn flush(
    State(state): State<IngestState>,
    Path(stream): Path<String>,
) -> Result<Json<FlushReport>, ApiError> {
    validate_stream_name(&stream)?;
    Ok(Json(state.pipeline.flush(&stream).await?))
}

async fn health() -> &'static str {
    "OK"
}
