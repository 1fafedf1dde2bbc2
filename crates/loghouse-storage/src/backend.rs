//! Storage Backend Abstraction
//!
//! A uniform put/get/list/delete capability over interchangeable durable
//! stores. Every other component talks to storage through
//! [`StorageBackend`]; the concrete store is chosen once at startup from a
//! [`BackendConfig`].
//!
//! ## Semantics
//!
//! - `put` overwrites; writing identical bytes to a checksum-derived key twice
//!   is harmless
//! - `get` of an absent key is [`Error::NotFound`], distinct from transient
//!   failures
//! - `list` returns every key under a prefix, sorted
//! - `delete` of an absent key succeeds
//!
//! [`ObjectStoreBackend`] implements this over the `object_store` crate for
//! S3-compatible services, the local filesystem and process memory, so all
//! three share one code path.

use crate::config::{BackendConfig, S3Config};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use loghouse_observability::metrics::{STORAGE_ERRORS_TOTAL, STORAGE_LATENCY};
use object_store::aws::AmazonS3Builder;
use object_store::limit::LimitStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// [`StorageBackend`] over any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build the backend selected by `config`.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            BackendConfig::S3(s3) => Arc::new(LimitStore::new(build_s3(s3)?, s3.max_requests)),
            BackendConfig::Local { root } => {
                std::fs::create_dir_all(root).map_err(|e| {
                    Error::Config(format!("cannot create {}: {}", root.display(), e))
                })?;
                Arc::new(LocalFileSystem::new_with_prefix(root)?)
            }
            BackendConfig::Memory => Arc::new(InMemory::new()),
        };
        tracing::info!(backend = %store, "Storage backend ready");
        Ok(Self::new(store))
    }

    fn observe<T>(&self, operation: &'static str, start: Instant, result: &object_store::Result<T>) {
        STORAGE_LATENCY
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());
        if let Err(e) = result {
            let kind = match e {
                object_store::Error::NotFound { .. } => "not_found",
                _ => "backend",
            };
            STORAGE_ERRORS_TOTAL
                .with_label_values(&[operation, kind])
                .inc();
        }
    }
}

fn build_s3(config: &S3Config) -> Result<object_store::aws::AmazonS3> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_virtual_hosted_style_request(!config.path_style)
        .with_allow_http(config.allow_http);

    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
    }

    if let Some((access_key, secret_key)) = config
        .access_key_id
        .as_ref()
        .zip(config.secret_access_key.as_ref())
    {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    Ok(builder.build()?)
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let start = Instant::now();
        let result = self.store.put(&Path::from(key), bytes.into()).await;
        self.observe("put", start, &result);
        result?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let start = Instant::now();
        let result = match self.store.get(&Path::from(key)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        self.observe("get", start, &result);
        Ok(result?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
        let result: object_store::Result<Vec<_>> =
            self.store.list(prefix.as_ref()).try_collect().await;
        self.observe("list", start, &result);

        let mut keys: Vec<String> = result?
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.store.delete(&Path::from(key)).await;
        self.observe("delete", start, &result);
        match result {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
