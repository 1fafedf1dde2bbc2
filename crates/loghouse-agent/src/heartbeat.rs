//! Heartbeat Task
//!
//! Runs on every ingest node and keeps it in the query nodes' registry. The
//! first heartbeat is sent immediately, then one every `interval` until the
//! cancellation token fires. Failed heartbeats are logged and counted; they
//! never stop the task.

use crate::registry::HeartbeatSink;
use loghouse_observability::metrics::HEARTBEAT_FAILURES_TOTAL;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background task that sends periodic heartbeats
pub struct HeartbeatTask {
    node_id: String,
    endpoint: String,
    interval: Duration,
    sink: Arc<dyn HeartbeatSink>,
}

/// Counters reported when the task stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatSummary {
    pub sent: u64,
    pub failed: u64,
}

impl HeartbeatTask {
    pub fn new(
        node_id: impl Into<String>,
        endpoint: impl Into<String>,
        interval: Duration,
        sink: Arc<dyn HeartbeatSink>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint: endpoint.into(),
            interval,
            sink,
        }
    }

    /// Run the heartbeat loop until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> HeartbeatSummary {
        info!(
            node_id = %self.node_id,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat task started"
        );

        let mut summary = HeartbeatSummary::default();
        let mut consecutive_failures: u64 = 0;
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sink.send(&self.node_id, &self.endpoint).await {
                Ok(()) => {
                    summary.sent += 1;
                    consecutive_failures = 0;
                    debug!(node_id = %self.node_id, count = summary.sent, "Heartbeat sent");
                }
                Err(e) => {
                    summary.failed += 1;
                    consecutive_failures += 1;
                    HEARTBEAT_FAILURES_TOTAL.inc();
                    error!(
                        node_id = %self.node_id,
                        error = %e,
                        consecutive_failures,
                        "Heartbeat failed"
                    );

                    if consecutive_failures >= 3 {
                        warn!(
                            node_id = %self.node_id,
                            consecutive_failures,
                            "Multiple consecutive heartbeat failures - node may be considered dead"
                        );
                    }
                }
            }
        }

        info!(
            node_id = %self.node_id,
            total_heartbeats = summary.sent,
            total_failures = summary.failed,
            "Heartbeat task stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::{AgentError, Result};
    use crate::registry::{IngestorRegistry, RegistryConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl HeartbeatSink for FailingSink {
        async fn send(&self, _node_id: &str, _endpoint: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_heartbeat_task_registers_node() {
        let registry = Arc::new(IngestorRegistry::new(
            &RegistryConfig::default(),
            Arc::new(SystemClock),
        ));
        let cancel = CancellationToken::new();
        let task = HeartbeatTask::new(
            "ingest-1",
            "http://localhost:8001",
            Duration::from_millis(10),
            registry.clone(),
        );
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert!(summary.sent >= 1);
        let active = registry.active_nodes().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].endpoint, "http://localhost:8001");
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_task() {
        let sink = Arc::new(FailingSink {
            calls: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        let task = HeartbeatTask::new("ingest-1", "http://x", Duration::from_millis(5), sink.clone());
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert!(summary.failed >= 2);
        assert_eq!(summary.sent, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst) as u64, summary.failed);
    }
}
