//! Query node HTTP routes.
//!
//! `GET /api/v1/streams/:stream/stats` and `/schema` merge the catalog with
//! what live ingest nodes report, and answer `404` only when the stream is
//! unknown everywhere.

use crate::error::ApiError;
use crate::heartbeat::{HeartbeatRequest, HEARTBEAT_PATH};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use loghouse_agent::IngestorRecord;
use loghouse_observability::create_metrics_router;
use loghouse_query::{QueryCoordinator, QueryResult, RangeParams, StreamOverview, StreamSchema};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct QueryState {
    pub coordinator: Arc<QueryCoordinator>,
}

pub fn query_router(state: QueryState) -> Router {
    Router::new()
        .route(HEARTBEAT_PATH, post(heartbeat))
        .route("/internal/v1/ingestors", get(list_ingestors))
        .route("/api/v1/query/:stream", get(query))
        .route("/api/v1/streams", get(list_streams))
        .route("/api/v1/streams/:stream/stats", get(stream_stats))
        .route("/api/v1/streams/:stream/schema", get(stream_schema))
        .route("/health", get(health))
        .merge(create_metrics_router::<QueryState>())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn heartbeat(
    State(state): State<QueryState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<IngestorRecord>, ApiError> {
    let record = state
        .coordinator
        .registry()
        .heartbeat(&request.node_id, &request.endpoint)
        .await?;
    Ok(Json(record))
}

async fn list_ingestors(State(state): State<QueryState>) -> Json<Vec<IngestorRecord>> {
    Json(state.coordinator.registry().active_nodes().await)
}

async fn query(
    State(state): State<QueryState>,
    Path(stream): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<QueryResult>, ApiError> {
    let result = state
        .coordinator
        .query(&stream, params.range(), params.limit)
        .await?;
    Ok(Json(result))
}

async fn list_streams(State(state): State<QueryState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.coordinator.list_streams().await?))
}

async fn stream_stats(
    State(state): State<QueryState>,
    Path(stream): Path<String>,
) -> Result<Json<StreamOverview>, ApiError> {
    state
        .coordinator
        .stream_overview(&stream)
        .await?
        .map(Json)
        .ok_or_else(|| unknown_stream(&stream))
}

async fn stream_schema(
    State(state): State<QueryState>,
    Path(stream): Path<String>,
) -> Result<Json<StreamSchema>, ApiError> {
    state
        .coordinator
        .stream_schema(&stream)
        .await?
        .map(Json)
        .ok_or_else(|| unknown_stream(&stream))
}

fn unknown_stream(stream: &str) -> ApiError {
    ApiError::not_found(format!("stream '{}' is unknown", stream))
}

async fn health() -> &'static str {
    "OK"
}
