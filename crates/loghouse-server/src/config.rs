//! Node configuration from `LOGHOUSE_*` environment variables.

use crate::error::{Result, ServerError};
use loghouse_agent::RegistryConfig;
use loghouse_connectors::QueueConfig;
use loghouse_query::QueryConfig;
use loghouse_storage::{BackendConfig, IngestConfig, S3Config};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Role a node is started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns a staging buffer and commits segments
    Ingest,
    /// Owns the ingestor registry and answers queries
    Query,
}

impl FromStr for NodeRole {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ingest" => Ok(NodeRole::Ingest),
            "query" => Ok(NodeRole::Query),
            other => Err(ServerError::Config(format!(
                "unknown role '{}', expected 'ingest' or 'query'",
                other
            ))),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Ingest => write!(f, "ingest"),
            NodeRole::Query => write!(f, "query"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub role: NodeRole,
    /// Configured node name plus a per-start suffix, so record ids from
    /// different runs of one node never collide
    pub node_id: String,
    pub bind_addr: SocketAddr,
    /// Base URL other nodes reach this node on
    pub advertise_url: String,
    /// Query nodes an ingest node sends heartbeats to
    pub query_urls: Vec<String>,
    pub backend: BackendConfig,
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,
    pub query: QueryConfig,
    pub queue: QueueConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let role: NodeRole = var("LOGHOUSE_ROLE")
            .unwrap_or_else(|| "ingest".to_string())
            .parse()?;

        let name = var("LOGHOUSE_NODE_ID").unwrap_or_else(|| role.to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let node_id = format!("{}-{}", name, &suffix[..8]);

        let default_bind = match role {
            NodeRole::Ingest => "0.0.0.0:8001",
            NodeRole::Query => "0.0.0.0:8000",
        };
        let bind_addr: SocketAddr = parse(&var, "LOGHOUSE_BIND_ADDR", default_bind.parse().ok())?;
        let advertise_url = var("LOGHOUSE_ADVERTISE_URL")
            .unwrap_or_else(|| format!("http://{}", bind_addr))
            .trim_end_matches('/')
            .to_string();
        let query_urls = var("LOGHOUSE_QUERY_URLS")
            .map(|urls| {
                urls.split(',')
                    .map(|u| u.trim().trim_end_matches('/').to_string())
                    .filter(|u| !u.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut ingest = IngestConfig::new(node_id.clone());
        ingest.timestamp_field = var("LOGHOUSE_TIMESTAMP_FIELD");
        ingest.staging.flush_max_records = parse(
            &var,
            "LOGHOUSE_FLUSH_MAX_RECORDS",
            Some(ingest.staging.flush_max_records),
        )?;
        ingest.staging.flush_max_bytes = parse(
            &var,
            "LOGHOUSE_FLUSH_MAX_BYTES",
            Some(ingest.staging.flush_max_bytes),
        )?;
        ingest.staging.flush_interval_ms = parse(
            &var,
            "LOGHOUSE_FLUSH_INTERVAL_MS",
            Some(ingest.staging.flush_interval_ms),
        )?;
        if let Some(compression) = var("LOGHOUSE_COMPRESSION") {
            ingest.compaction.compression = compression.parse().map_err(ServerError::Config)?;
        }
        ingest.upload.max_attempts = parse(
            &var,
            "LOGHOUSE_UPLOAD_MAX_ATTEMPTS",
            Some(ingest.upload.max_attempts),
        )?;

        let mut registry = RegistryConfig::default();
        registry.heartbeat_interval_ms = parse(
            &var,
            "LOGHOUSE_HEARTBEAT_INTERVAL_MS",
            Some(registry.heartbeat_interval_ms),
        )?;
        registry.heartbeat_timeout_ms = parse(
            &var,
            "LOGHOUSE_HEARTBEAT_TIMEOUT_MS",
            Some(registry.heartbeat_timeout_ms),
        )?;

        let mut query = QueryConfig::default();
        query.fanout_timeout_ms = parse(
            &var,
            "LOGHOUSE_FANOUT_TIMEOUT_MS",
            Some(query.fanout_timeout_ms),
        )?;

        let mut queue = QueueConfig::default();
        queue.max_deliveries = parse(
            &var,
            "LOGHOUSE_QUEUE_MAX_DELIVERIES",
            Some(queue.max_deliveries),
        )?;

        Ok(Self {
            role,
            node_id,
            bind_addr,
            advertise_url,
            query_urls,
            backend: backend_config(&var)?,
            ingest,
            registry,
            query,
            queue,
        })
    }
}

fn backend_config<F>(var: &F) -> Result<BackendConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = var("LOGHOUSE_STORAGE").unwrap_or_else(|| "local".to_string());
    match kind.to_ascii_lowercase().as_str() {
        "local" => Ok(BackendConfig::Local {
            root: PathBuf::from(
                var("LOGHOUSE_LOCAL_PATH").unwrap_or_else(|| "./data/storage".to_string()),
            ),
        }),
        "memory" => Ok(BackendConfig::Memory),
        "s3" => {
            let bucket = var("LOGHOUSE_S3_BUCKET").ok_or_else(|| {
                ServerError::Config("LOGHOUSE_S3_BUCKET is required for s3 storage".to_string())
            })?;
            let defaults = S3Config::default();
            Ok(BackendConfig::S3(S3Config {
                bucket,
                region: var("AWS_REGION").unwrap_or(defaults.region),
                endpoint: var("LOGHOUSE_S3_ENDPOINT"),
                access_key_id: var("AWS_ACCESS_KEY_ID"),
                secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
                path_style: parse(var, "LOGHOUSE_S3_PATH_STYLE", Some(defaults.path_style))?,
                allow_http: parse(var, "LOGHOUSE_S3_ALLOW_HTTP", Some(defaults.allow_http))?,
                max_requests: parse(var, "LOGHOUSE_S3_MAX_REQUESTS", Some(defaults.max_requests))?,
            }))
        }
        other => Err(ServerError::Config(format!(
            "unknown storage '{}', expected 's3', 'local' or 'memory'",
            other
        ))),
    }
}

fn parse<F, T>(var: &F, key: &str, default: Option<T>) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid {}='{}': {}", key, raw, e))),
        None => default.ok_or_else(|| ServerError::Config(format!("{} is required", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_storage::Compression;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.role, NodeRole::Ingest);
        assert!(config.node_id.starts_with("ingest-"));
        assert_eq!(config.bind_addr.port(), 8001);
        assert_eq!(config.advertise_url, "http://0.0.0.0:8001");
        assert!(config.query_urls.is_empty());
        assert!(matches!(config.backend, BackendConfig::Local { .. }));
        assert_eq!(config.ingest.node_id, config.node_id);
    }

    #[test]
    fn test_node_id_differs_per_start() {
        let first = config(&[("LOGHOUSE_NODE_ID", "edge")]).unwrap();
        let second = config(&[("LOGHOUSE_NODE_ID", "edge")]).unwrap();
        assert!(first.node_id.starts_with("edge-"));
        assert_ne!(first.node_id, second.node_id);
    }

    #[test]
    fn test_query_role() {
        let config = config(&[
            ("LOGHOUSE_ROLE", "Query"),
            ("LOGHOUSE_HEARTBEAT_TIMEOUT_MS", "5000"),
            ("LOGHOUSE_FANOUT_TIMEOUT_MS", "750"),
        ])
        .unwrap();
        assert_eq!(config.role, NodeRole::Query);
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.registry.heartbeat_timeout_ms, 5000);
        assert_eq!(config.query.fanout_timeout_ms, 750);
    }

    #[test]
    fn test_ingest_overrides() {
        let config = config(&[
            ("LOGHOUSE_QUERY_URLS", "http://q1:8000/, http://q2:8000"),
            ("LOGHOUSE_FLUSH_MAX_RECORDS", "100"),
            ("LOGHOUSE_COMPRESSION", "snappy"),
            ("LOGHOUSE_TIMESTAMP_FIELD", "ts"),
        ])
        .unwrap();
        assert_eq!(config.query_urls, vec!["http://q1:8000", "http://q2:8000"]);
        assert_eq!(config.ingest.staging.flush_max_records, 100);
        assert_eq!(config.ingest.compaction.compression, Compression::Snappy);
        assert_eq!(config.ingest.timestamp_field.as_deref(), Some("ts"));
    }

    #[test]
    fn test_s3_backend() {
        let config = config(&[
            ("LOGHOUSE_STORAGE", "s3"),
            ("LOGHOUSE_S3_BUCKET", "logs"),
            ("LOGHOUSE_S3_ENDPOINT", "http://minio:9000"),
            ("LOGHOUSE_S3_PATH_STYLE", "true"),
        ])
        .unwrap();
        match config.backend {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "logs");
                assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
                assert!(s3.path_style);
                assert!(!s3.allow_http);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("LOGHOUSE_ROLE", "leader")]),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            config(&[("LOGHOUSE_FLUSH_MAX_RECORDS", "lots")]),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            config(&[("LOGHOUSE_STORAGE", "s3")]),
            Err(ServerError::Config(_))
        ));
    }
}
