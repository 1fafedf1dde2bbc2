//! LogHouse Observability
//!
//! Prometheus metrics shared by both node roles and the `/metrics` router
//! that exposes them. Call [`init_metrics`] once at startup; families that
//! are never registered still count but are not scraped.
//!
//! ```no_run
//! let router: axum::Router = loghouse_observability::create_metrics_router();
//! loghouse_observability::init_metrics();
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::{create_metrics_router, render};
pub use metrics::{init as init_metrics, REGISTRY};
