//! Durable catalog on the shared storage backend.
//!
//! Each manifest entry is one JSON object:
//!
//! ```text
//! {stream}/catalog/{writer}/{writer_sequence:020}.json
//! ```
//!
//! Keys are namespaced by writer, so ingest nodes sharing a stream never
//! write the same key. `open` loads every existing entry; `list_manifests`
//! first picks up entries other nodes have written since, so a query node
//! sees commits from every ingest node. Commit order across writers is
//! `(committed_at, writer, writer_sequence)`.
//!
//! `contains_checksum` answers from memory only. A segment's checksum covers
//! records stamped with its writer's node id, so only that writer can commit
//! it, and the writer's own earlier commits were loaded by `open` or written
//! through this instance.

use crate::backend::StorageBackend;
use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use loghouse_catalog::{
    check_entry, AppendOutcome, Catalog, CatalogError, ManifestEntry, Result, StreamLog,
};
use loghouse_core::{now_ms, validate_stream_name, TimeRange};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const CATALOG_DIR: &str = "catalog";

#[derive(Debug, Default)]
struct DurableStream {
    log: StreamLog,
    loaded: Mutex<HashSet<String>>,
}

pub struct ObjectStoreCatalog {
    backend: Arc<dyn StorageBackend>,
    streams: RwLock<HashMap<String, Arc<DurableStream>>>,
}

/// Storage key of a stamped entry.
pub fn entry_key(entry: &ManifestEntry) -> String {
    format!(
        "{}/{}/{}/{:020}.json",
        entry.stream, CATALOG_DIR, entry.writer, entry.writer_sequence
    )
}

fn backend_error(e: Error) -> CatalogError {
    CatalogError::Backend(e.to_string())
}

impl ObjectStoreCatalog {
    /// Open the catalog, loading every entry already on the backend.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let catalog = Self {
            backend,
            streams: RwLock::new(HashMap::new()),
        };

        let streams = catalog.discover_streams().await?;
        let mut loaded = 0;
        for stream in &streams {
            loaded += catalog.refresh(stream).await?.log.len().await;
        }
        tracing::info!(streams = streams.len(), entries = loaded, "Catalog loaded");
        Ok(catalog)
    }

    async fn stream(&self, stream: &str) -> Arc<DurableStream> {
        if let Some(s) = self.streams.read().await.get(stream) {
            return s.clone();
        }
        self.streams
            .write()
            .await
            .entry(stream.to_string())
            .or_default()
            .clone()
    }

    async fn discover_streams(&self) -> Result<Vec<String>> {
        let keys = self.backend.list("").await.map_err(backend_error)?;
        let mut streams: Vec<String> = keys
            .iter()
            .filter_map(|key| {
                let mut parts = key.splitn(3, '/');
                match (parts.next(), parts.next()) {
                    (Some(stream), Some(CATALOG_DIR)) => Some(stream.to_string()),
                    _ => None,
                }
            })
            .collect();
        streams.sort();
        streams.dedup();
        Ok(streams)
    }

    /// Load entries of `stream` that are on the backend but not yet in memory.
    async fn refresh(&self, stream: &str) -> Result<Arc<DurableStream>> {
        let durable = self.stream(stream).await;
        let prefix = format!("{}/{}", stream, CATALOG_DIR);
        let keys = self.backend.list(&prefix).await.map_err(backend_error)?;

        let mut loaded = durable.loaded.lock().await;
        let mut fresh = Vec::new();
        for key in keys.into_iter().filter(|k| k.ends_with(".json")) {
            if loaded.contains(&key) {
                continue;
            }
            let bytes = self.backend.get(&key).await.map_err(backend_error)?;
            let entry: ManifestEntry = serde_json::from_slice(&bytes)?;
            fresh.push(entry);
            loaded.insert(key);
        }
        drop(loaded);

        if !fresh.is_empty() {
            let added = durable.log.merge(fresh).await;
            tracing::debug!(stream = %stream, added, "Catalog refreshed");
        }
        Ok(durable)
    }
}

#[async_trait]
impl Catalog for ObjectStoreCatalog {
    async fn append_manifest(&self, stream: &str, entry: ManifestEntry) -> Result<AppendOutcome> {
        check_entry(stream, &entry)?;
        let durable = self.stream(stream).await;
        let _guard = durable.log.append_lock().await;

        if durable.log.contains(&entry.checksum).await {
            return Ok(AppendOutcome::Duplicate);
        }

        let stamped = durable.log.stamp(entry, now_ms()).await;
        let key = entry_key(&stamped);
        let body = Bytes::from(serde_json::to_vec(&stamped)?);
        self.backend.put(&key, body).await.map_err(backend_error)?;
        durable.loaded.lock().await.insert(key);

        Ok(durable.log.insert(stamped).await)
    }

    async fn list_manifests(&self, stream: &str, range: TimeRange) -> Result<Vec<ManifestEntry>> {
        validate_stream_name(stream)?;
        let durable = self.refresh(stream).await?;
        let snapshot = durable.log.snapshot().await;
        Ok(snapshot.iter().filter(|e| e.overlaps(&range)).cloned().collect())
    }

    async fn contains_checksum(&self, stream: &str, checksum: &str) -> Result<bool> {
        validate_stream_name(stream)?;
        let durable = self.streams.read().await.get(stream).cloned();
        match durable {
            Some(durable) => Ok(durable.log.contains(checksum).await),
            None => Ok(false),
        }
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        let mut streams = self.discover_streams().await?;
        for (name, durable) in self.streams.read().await.iter() {
            if !durable.log.is_empty().await && !streams.contains(name) {
                streams.push(name.clone());
            }
        }
        streams.sort();
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectStoreBackend;
    use crate::config::BackendConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn entry(writer: &str, checksum: &str, min: i64, max: i64) -> ManifestEntry {
        ManifestEntry {
            segment_id: checksum.to_string(),
            stream: "events".to_string(),
            min_timestamp: min,
            max_timestamp: max,
            row_count: 5,
            checksum: checksum.to_string(),
            location: format!("events/segments/{}.parquet", checksum),
            size_bytes: 64,
            writer: writer.to_string(),
            writer_sequence: 0,
            committed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::Local {
            root: dir.path().to_path_buf(),
        };
        let backend: Arc<dyn StorageBackend> =
            Arc::new(ObjectStoreBackend::from_config(&config).unwrap());

        {
            let catalog = ObjectStoreCatalog::open(backend.clone()).await.unwrap();
            catalog
                .append_manifest("events", entry("ingest-1", "aaa", 0, 10))
                .await
                .unwrap();
            catalog
                .append_manifest("events", entry("ingest-1", "bbb", 11, 20))
                .await
                .unwrap();
        }

        let keys = backend.list("events/catalog").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "events/catalog/ingest-1/00000000000000000000.json",
                "events/catalog/ingest-1/00000000000000000001.json",
            ]
        );

        let reopened = ObjectStoreCatalog::open(backend).await.unwrap();
        let entries = reopened
            .list_manifests("events", TimeRange::all())
            .await
            .unwrap();
        let checksums: Vec<&str> = entries.iter().map(|e| e.checksum.as_str()).collect();
        assert_eq!(checksums, vec!["aaa", "bbb"]);

        // Duplicate after reopen is still a no-op, and the writer sequence continues
        assert_eq!(
            reopened
                .append_manifest("events", entry("ingest-1", "aaa", 0, 10))
                .await
                .unwrap(),
            AppendOutcome::Duplicate
        );
        match reopened
            .append_manifest("events", entry("ingest-1", "ccc", 21, 30))
            .await
            .unwrap()
        {
            AppendOutcome::Appended(stamped) => assert_eq!(stamped.writer_sequence, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    /// Counts `list` calls on the wrapped backend.
    struct CountingBackend {
        inner: ObjectStoreBackend,
        lists: AtomicU32,
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        async fn put(&self, key: &str, bytes: Bytes) -> crate::Result<()> {
            self.inner.put(key, bytes).await
        }

        async fn get(&self, key: &str) -> crate::Result<Bytes> {
            self.inner.get(key).await
        }

        async fn list(&self, prefix: &str) -> crate::Result<Vec<String>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(prefix).await
        }

        async fn delete(&self, key: &str) -> crate::Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_contains_checksum_does_not_list() {
        let backend = Arc::new(CountingBackend {
            inner: ObjectStoreBackend::in_memory(),
            lists: AtomicU32::new(0),
        });
        {
            let writer = ObjectStoreCatalog::open(backend.clone()).await.unwrap();
            writer
                .append_manifest("events", entry("ingest-1", "aaa", 0, 10))
                .await
                .unwrap();
        }

        let catalog = ObjectStoreCatalog::open(backend.clone()).await.unwrap();
        catalog
            .append_manifest("events", entry("ingest-1", "bbb", 11, 20))
            .await
            .unwrap();
        let lists = backend.lists.load(Ordering::SeqCst);

        assert!(catalog.contains_checksum("events", "aaa").await.unwrap());
        assert!(catalog.contains_checksum("events", "bbb").await.unwrap());
        assert!(!catalog.contains_checksum("events", "ccc").await.unwrap());
        assert!(!catalog.contains_checksum("other", "aaa").await.unwrap());
        assert_eq!(backend.lists.load(Ordering::SeqCst), lists);
    }

    #[tokio::test]
    async fn test_reader_sees_entries_from_other_writers() {
        let backend: Arc<dyn StorageBackend> = Arc::new(ObjectStoreBackend::in_memory());
        let ingest_a = ObjectStoreCatalog::open(backend.clone()).await.unwrap();
        let ingest_b = ObjectStoreCatalog::open(backend.clone()).await.unwrap();
        let query = ObjectStoreCatalog::open(backend.clone()).await.unwrap();

        ingest_a
            .append_manifest("events", entry("ingest-a", "a1", 0, 10))
            .await
            .unwrap();
        ingest_b
            .append_manifest("events", entry("ingest-b", "b1", 5, 15))
            .await
            .unwrap();

        let entries = query
            .list_manifests("events", TimeRange::all())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(query.list_streams().await.unwrap(), vec!["events"]);

        let stats = query.stream_stats("events").await.unwrap().unwrap();
        assert_eq!(stats.rows, 10);
        assert_eq!(stats.first_event, Some(0));
        assert_eq!(stats.last_event, Some(15));
    }
}
