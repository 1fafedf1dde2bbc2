use crate::error::Result;
use crate::log::StreamLog;
use crate::types::{AppendOutcome, ManifestEntry};
use crate::{check_entry, Catalog};
use async_trait::async_trait;
use loghouse_core::{now_ms, validate_stream_name, TimeRange};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process catalog.
///
/// Holds every stream's log in memory; nothing survives a restart. Used by
/// tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    streams: RwLock<HashMap<String, Arc<StreamLog>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, stream: &str) -> Arc<StreamLog> {
        if let Some(log) = self.streams.read().await.get(stream) {
            return log.clone();
        }
        self.streams
            .write()
            .await
            .entry(stream.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn append_manifest(&self, stream: &str, entry: ManifestEntry) -> Result<AppendOutcome> {
        check_entry(stream, &entry)?;
        let log = self.log(stream).await;
        let _guard = log.append_lock().await;

        if log.contains(&entry.checksum).await {
            tracing::debug!(stream = %stream, checksum = %entry.checksum, "Duplicate manifest entry");
            return Ok(AppendOutcome::Duplicate);
        }
        let stamped = log.stamp(entry, now_ms()).await;
        Ok(log.insert(stamped).await)
    }

    async fn list_manifests(&self, stream: &str, range: TimeRange) -> Result<Vec<ManifestEntry>> {
        validate_stream_name(stream)?;
        let log = match self.streams.read().await.get(stream) {
            Some(log) => log.clone(),
            None => return Ok(Vec::new()),
        };
        let snapshot = log.snapshot().await;
        Ok(snapshot.iter().filter(|e| e.overlaps(&range)).cloned().collect())
    }

    async fn contains_checksum(&self, stream: &str, checksum: &str) -> Result<bool> {
        validate_stream_name(stream)?;
        let log = self.streams.read().await.get(stream).cloned();
        match log {
            Some(log) => Ok(log.contains(checksum).await),
            None => Ok(false),
        }
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        let mut streams: Vec<String> = self.streams.read().await.keys().cloned().collect();
        streams.sort();
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(checksum: &str, min: i64, max: i64) -> ManifestEntry {
        ManifestEntry {
            segment_id: checksum.to_string(),
            stream: "events".to_string(),
            min_timestamp: min,
            max_timestamp: max,
            row_count: 10,
            checksum: checksum.to_string(),
            location: format!("events/segments/{}.parquet", checksum),
            size_bytes: 512,
            writer: "ingest-1".to_string(),
            writer_sequence: 0,
            committed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_append_is_idempotent_on_checksum() {
        let catalog = MemoryCatalog::new();
        let outcome = catalog
            .append_manifest("events", entry("aaa", 0, 10))
            .await
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Appended(_)));

        let outcome = catalog
            .append_manifest("events", entry("aaa", 0, 10))
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Duplicate);

        let all = catalog
            .list_manifests("events", TimeRange::all())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_contains_checksum() {
        let catalog = MemoryCatalog::new();
        assert!(!catalog.contains_checksum("events", "aaa").await.unwrap());

        catalog
            .append_manifest("events", entry("aaa", 0, 10))
            .await
            .unwrap();
        assert!(catalog.contains_checksum("events", "aaa").await.unwrap());
        assert!(!catalog.contains_checksum("events", "bbb").await.unwrap());
        assert!(!catalog.contains_checksum("other", "aaa").await.unwrap());
        assert!(catalog.contains_checksum("bad/name", "aaa").await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_range_in_commit_order() {
        let catalog = MemoryCatalog::new();
        catalog.append_manifest("events", entry("a", 0, 99)).await.unwrap();
        catalog.append_manifest("events", entry("b", 100, 199)).await.unwrap();
        catalog.append_manifest("events", entry("c", 200, 299)).await.unwrap();

        let hits = catalog
            .list_manifests("events", TimeRange::new(150, 250))
            .await
            .unwrap();
        let checksums: Vec<&str> = hits.iter().map(|e| e.checksum.as_str()).collect();
        assert_eq!(checksums, vec!["b", "c"]);
        assert!(hits[0].writer_sequence < hits[1].writer_sequence);
    }

    #[tokio::test]
    async fn test_entry_for_other_stream_is_rejected() {
        let catalog = MemoryCatalog::new();
        let err = catalog
            .append_manifest("other", entry("a", 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::CatalogError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn test_unknown_stream_lists_nothing() {
        let catalog = MemoryCatalog::new();
        assert!(catalog
            .list_manifests("nothing", TimeRange::all())
            .await
            .unwrap()
            .is_empty());
        assert!(catalog.stream_stats("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_stats() {
        let catalog = MemoryCatalog::new();
        catalog.append_manifest("events", entry("a", 5, 50)).await.unwrap();
        catalog.append_manifest("events", entry("b", 1, 20)).await.unwrap();

        let stats = catalog.stream_stats("events").await.unwrap().unwrap();
        assert_eq!(stats.segments, 2);
        assert_eq!(stats.rows, 20);
        assert_eq!(stats.bytes, 1024);
        assert_eq!(stats.first_event, Some(1));
        assert_eq!(stats.last_event, Some(50));
        assert_eq!(catalog.list_streams().await.unwrap(), vec!["events"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_one_entry_per_checksum() {
        let catalog = Arc::new(MemoryCatalog::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                catalog
                    .append_manifest("events", entry(&format!("c{}", i % 4), 0, 1))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let all = catalog
            .list_manifests("events", TimeRange::all())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }
}
