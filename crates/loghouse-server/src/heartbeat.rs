//! Heartbeats over HTTP
//!
//! Ingest nodes announce themselves to every configured query node with
//! `POST /internal/v1/heartbeat`.

use async_trait::async_trait;
use loghouse_agent::{AgentError, HeartbeatSink};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HEARTBEAT_PATH: &str = "/internal/v1/heartbeat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub endpoint: String,
}

/// [`HeartbeatSink`] posting to one or more query nodes.
pub struct HttpHeartbeatSink {
    query_urls: Vec<String>,
    http_client: reqwest::Client,
}

impl HttpHeartbeatSink {
    pub fn new(query_urls: Vec<String>, timeout: Duration) -> Result<Self, AgentError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            query_urls,
            http_client,
        })
    }
}

#[async_trait]
impl HeartbeatSink for HttpHeartbeatSink {
    /// Fails if any query node did not accept the heartbeat.
    async fn send(&self, node_id: &str, endpoint: &str) -> loghouse_agent::Result<()> {
        let request = HeartbeatRequest {
            node_id: node_id.to_string(),
            endpoint: endpoint.to_string(),
        };

        let mut failures = Vec::new();
        for url in &self.query_urls {
            let result = self
                .http_client
                .post(format!("{}{}", url, HEARTBEAT_PATH))
                .json(&request)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => failures.push(format!("{}: HTTP {}", url, response.status())),
                Err(e) => failures.push(format!("{}: {}", url, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Transport(failures.join("; ")))
        }
    }
}
