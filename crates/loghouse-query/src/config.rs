use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Deadline for one live node's fan-out response
    #[serde(default = "default_fanout_timeout_ms")]
    pub fanout_timeout_ms: u64,

    /// Segments fetched and decoded concurrently per query
    #[serde(default = "default_segment_read_concurrency")]
    pub segment_read_concurrency: usize,
}

fn default_fanout_timeout_ms() -> u64 {
    2_000
}

fn default_segment_read_concurrency() -> usize {
    8
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: default_fanout_timeout_ms(),
            segment_read_concurrency: default_segment_read_concurrency(),
        }
    }
}

impl QueryConfig {
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }
}
