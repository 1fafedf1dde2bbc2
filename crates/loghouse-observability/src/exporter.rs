//! Text exposition of [`REGISTRY`] for Prometheus scrapes.

use crate::metrics::REGISTRY;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};

/// Encode every registered family in the text format.
pub fn render() -> prometheus::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut body)?;
    Ok(body)
}

async fn scrape() -> Response {
    match render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// `GET /metrics`, generic over the state of the router it is merged into.
pub fn create_metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
