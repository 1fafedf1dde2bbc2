//! Role dispatch.
//!
//! A process runs exactly one [`Node`]. Both roles share the storage backend
//! and the durable catalog; everything else is role specific:
//!
//! - [`IngestNode`]: ingest pipeline, queue ingest task, heartbeats to the
//!   query nodes
//! - [`QueryNode`]: ingestor registry and query coordinator

use crate::config::{NodeRole, ServerConfig};
use crate::error::Result;
use crate::heartbeat::HttpHeartbeatSink;
use crate::ingest::{ingest_router, IngestState};
use crate::query::{query_router, QueryState};
use axum::Router;
use loghouse_agent::{HeartbeatTask, IngestorRegistry, SystemClock};
use loghouse_catalog::Catalog;
use loghouse_connectors::{ChannelQueue, QueueIngestTask};
use loghouse_query::{HttpFanout, QueryCoordinator};
use loghouse_storage::{IngestPipeline, ObjectStoreBackend, ObjectStoreCatalog, StorageBackend};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub enum Node {
    Ingest(IngestNode),
    Query(QueryNode),
}

impl Node {
    /// Open the storage backend and catalog, then build the configured role.
    pub async fn build(config: ServerConfig) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(ObjectStoreBackend::from_config(&config.backend)?);
        let catalog: Arc<dyn Catalog> = Arc::new(ObjectStoreCatalog::open(backend.clone()).await?);

        match config.role {
            NodeRole::Ingest => Ok(Node::Ingest(IngestNode::new(config, backend, catalog))),
            NodeRole::Query => Ok(Node::Query(QueryNode::new(config, backend, catalog)?)),
        }
    }

    pub fn role(&self) -> NodeRole {
        match self {
            Node::Ingest(_) => NodeRole::Ingest,
            Node::Query(_) => NodeRole::Query,
        }
    }

    pub fn router(&self) -> Router {
        match self {
            Node::Ingest(node) => node.router(),
            Node::Query(node) => node.router(),
        }
    }

    /// Serve until `shutdown` fires, then stop background work.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        match self {
            Node::Ingest(node) => node.run(listener, shutdown).await,
            Node::Query(node) => node.run(listener, shutdown).await,
        }
    }
}

pub struct IngestNode {
    config: ServerConfig,
    pipeline: IngestPipeline,
    queue: Arc<ChannelQueue>,
}

impl IngestNode {
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let pipeline = IngestPipeline::new(config.ingest.clone(), backend, catalog);
        let queue = Arc::new(ChannelQueue::new(config.queue.clone()));
        Self {
            config,
            pipeline,
            queue,
        }
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn router(&self) -> Router {
        ingest_router(IngestState {
            pipeline: self.pipeline.clone(),
            queue: self.queue.clone(),
        })
    }

    async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        // Stopped by closing the queue so accepted messages drain first
        let queue_task = tokio::spawn(
            QueueIngestTask::new(
                format!("{}-queue", self.config.node_id),
                self.queue.clone(),
                Arc::new(self.pipeline.clone()),
            )
            .run(CancellationToken::new()),
        );

        let heartbeat_cancel = shutdown.child_token();
        let heartbeat_task = if self.config.query_urls.is_empty() {
            warn!("LOGHOUSE_QUERY_URLS is empty, node will not be visible to queries");
            None
        } else {
            let sink = HttpHeartbeatSink::new(
                self.config.query_urls.clone(),
                self.config.registry.heartbeat_interval(),
            )?;
            let task = HeartbeatTask::new(
                self.config.node_id.clone(),
                self.config.advertise_url.clone(),
                self.config.registry.heartbeat_interval(),
                Arc::new(sink),
            );
            Some(tokio::spawn(task.run(heartbeat_cancel.clone())))
        };

        info!(
            node_id = %self.config.node_id,
            addr = %self.config.bind_addr,
            advertise_url = %self.config.advertise_url,
            "Ingest node serving"
        );
        let router = self.router();
        let signal = shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await?;

        info!("Draining queue and flushing streams");
        self.queue.close().await;
        if let Err(e) = queue_task.await {
            warn!(error = %e, "Queue ingest task panicked");
        }
        heartbeat_cancel.cancel();
        if let Some(handle) = heartbeat_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "Heartbeat task panicked");
            }
        }
        self.pipeline.shutdown().await;
        info!(node_id = %self.config.node_id, "Ingest node stopped");
        Ok(())
    }
}

pub struct QueryNode {
    config: ServerConfig,
    coordinator: Arc<QueryCoordinator>,
}

impl QueryNode {
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self> {
        let registry = Arc::new(IngestorRegistry::new(&config.registry, Arc::new(SystemClock)));
        let fanout = HttpFanout::new(config.query.fanout_timeout())?;
        let coordinator = Arc::new(QueryCoordinator::new(
            catalog,
            backend,
            registry,
            Arc::new(fanout),
            config.query.clone(),
        ));
        Ok(Self {
            config,
            coordinator,
        })
    }

    pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
        &self.coordinator
    }

    pub fn router(&self) -> Router {
        query_router(QueryState {
            coordinator: self.coordinator.clone(),
        })
    }

    async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(
            node_id = %self.config.node_id,
            addr = %self.config.bind_addr,
            "Query node serving"
        );
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!(node_id = %self.config.node_id, "Query node stopped");
        Ok(())
    }
}
