//! Ingestor Registry
//!
//! Tracks live ingest nodes on a query node so queries can fan out to them.
//!
//! A node is created by its first heartbeat and refreshed by every later
//! one. It is active while `now - last_heartbeat < timeout`; at exactly
//! `timeout` without a renewal it is excluded. Expiry is evaluated when the
//! registry is read, and expired entries are dropped by the next heartbeat
//! from any node; there is no background sweep. A node that heartbeats again
//! after expiring is treated as newly started.

use crate::clock::Clock;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use loghouse_observability::metrics::{HEARTBEATS_RECEIVED_TOTAL, INGESTORS_ACTIVE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Liveness record of one ingest node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestorRecord {
    pub node_id: String,
    /// Base URL the node serves fan-out requests on
    pub endpoint: String,
    pub last_heartbeat: i64,
    pub started_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// A node is excluded once this long has passed since its last heartbeat
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How often ingest nodes send heartbeats
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl RegistryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

pub struct IngestorRegistry {
    clock: Arc<dyn Clock>,
    timeout_ms: i64,
    nodes: RwLock<HashMap<String, IngestorRecord>>,
}

impl IngestorRegistry {
    pub fn new(config: &RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timeout_ms: i64::try_from(config.heartbeat_timeout_ms).unwrap_or(i64::MAX),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    fn is_live(&self, record: &IngestorRecord, now: i64) -> bool {
        now.saturating_sub(record.last_heartbeat) < self.timeout_ms
    }

    /// Create or refresh `node_id`'s liveness record.
    pub async fn heartbeat(&self, node_id: &str, endpoint: &str) -> Result<IngestorRecord> {
        if node_id.is_empty() {
            return Err(AgentError::InvalidHeartbeat("empty node id".to_string()));
        }
        if endpoint.is_empty() {
            return Err(AgentError::InvalidHeartbeat(format!(
                "empty endpoint for node '{}'",
                node_id
            )));
        }

        let now = self.clock.now_ms();
        let mut nodes = self.nodes.write().await;
        nodes.retain(|id, record| {
            let live = self.is_live(record, now);
            if !live && id != node_id {
                tracing::info!(node_id = %id, "Ingest node expired");
            }
            live
        });
        let started_at = match nodes.get(node_id) {
            Some(existing) if self.is_live(existing, now) => existing.started_at,
            _ => {
                tracing::info!(node_id = %node_id, endpoint = %endpoint, "Ingest node joined");
                now
            }
        };

        let record = IngestorRecord {
            node_id: node_id.to_string(),
            endpoint: endpoint.to_string(),
            last_heartbeat: now,
            started_at,
        };
        nodes.insert(node_id.to_string(), record.clone());
        HEARTBEATS_RECEIVED_TOTAL.inc();
        Ok(record)
    }

    /// Nodes whose last heartbeat is within the timeout, sorted by node id.
    pub async fn active_nodes(&self) -> Vec<IngestorRecord> {
        let now = self.clock.now_ms();
        let mut active: Vec<IngestorRecord> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|record| self.is_live(record, now))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        INGESTORS_ACTIVE.set(active.len() as i64);
        active
    }

    /// Remove a node that is leaving gracefully.
    pub async fn forget(&self, node_id: &str) -> bool {
        let removed = self.nodes.write().await.remove(node_id).is_some();
        if removed {
            tracing::info!(node_id = %node_id, "Ingest node left");
        }
        removed
    }
}

/// Destination of heartbeats sent by [`HeartbeatTask`](crate::HeartbeatTask).
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send(&self, node_id: &str, endpoint: &str) -> Result<()>;
}

#[async_trait]
impl HeartbeatSink for IngestorRegistry {
    async fn send(&self, node_id: &str, endpoint: &str) -> Result<()> {
        self.heartbeat(node_id, endpoint).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(timeout_ms: u64) -> (IngestorRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = RegistryConfig {
            heartbeat_timeout_ms: timeout_ms,
            ..Default::default()
        };
        (IngestorRegistry::new(&config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_expires_at_exactly_timeout() {
        let (registry, clock) = registry(5_000);
        registry.heartbeat("ingest-1", "http://a:8000").await.unwrap();

        clock.advance(4_999);
        assert_eq!(registry.active_nodes().await.len(), 1);

        clock.advance(1);
        assert!(registry.active_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_and_keeps_started_at() {
        let (registry, clock) = registry(5_000);
        registry.heartbeat("ingest-1", "http://a:8000").await.unwrap();

        clock.advance(3_000);
        let refreshed = registry.heartbeat("ingest-1", "http://a:8001").await.unwrap();
        assert_eq!(refreshed.started_at, 1_000);
        assert_eq!(refreshed.last_heartbeat, 4_000);

        clock.advance(3_000);
        let active = registry.active_nodes().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].endpoint, "http://a:8001");
    }

    #[tokio::test]
    async fn test_rejoin_after_expiry_resets_started_at() {
        let (registry, clock) = registry(1_000);
        registry.heartbeat("ingest-1", "http://a:8000").await.unwrap();
        clock.advance(2_000);
        let rejoined = registry.heartbeat("ingest-1", "http://a:8000").await.unwrap();
        assert_eq!(rejoined.started_at, 3_000);
    }

    #[tokio::test]
    async fn test_active_nodes_sorted_and_forget() {
        let (registry, _clock) = registry(5_000);
        registry.heartbeat("ingest-b", "http://b:8000").await.unwrap();
        registry.heartbeat("ingest-a", "http://a:8000").await.unwrap();

        let ids: Vec<String> = registry
            .active_nodes()
            .await
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec!["ingest-a", "ingest-b"]);

        assert!(registry.forget("ingest-a").await);
        assert!(!registry.forget("ingest-a").await);
        assert_eq!(registry.active_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_prunes_expired_nodes() {
        let (registry, clock) = registry(1_000);
        for i in 0..50 {
            registry
                .heartbeat(&format!("ingest-{}", i), "http://a:8000")
                .await
                .unwrap();
        }
        clock.advance(1_000);
        registry.heartbeat("ingest-new", "http://b:8000").await.unwrap();

        let tracked: Vec<String> = registry.nodes.read().await.keys().cloned().collect();
        assert_eq!(tracked, vec!["ingest-new".to_string()]);
        assert_eq!(registry.active_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_heartbeat() {
        let (registry, _clock) = registry(5_000);
        assert!(registry.heartbeat("", "http://a").await.is_err());
        assert!(registry.heartbeat("ingest-1", "").await.is_err());
    }
}
