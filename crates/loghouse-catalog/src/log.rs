//! Per-stream append log shared by catalog implementations.
//!
//! The log keeps its entries in an `Arc<Vec<ManifestEntry>>`. Readers clone
//! the `Arc` under a read lock and iterate without holding it; writers swap in
//! a new vector (`Arc::make_mut` copies only when a reader still holds the
//! previous one). A reader therefore sees either the log before an append or
//! after it, never a half-appended entry.
//!
//! Appends for one stream are serialised by [`StreamLog::append_lock`] so that
//! the durable write and the in-memory insert of an entry happen as one step.

use crate::types::{AppendOutcome, ManifestEntry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

#[derive(Debug, Default)]
struct LogState {
    entries: Arc<Vec<ManifestEntry>>,
    checksums: HashSet<String>,
    writer_sequences: HashMap<String, u64>,
    last_committed_at: i64,
}

/// Commit-ordered log of one stream's manifest entries.
#[derive(Debug, Default)]
pub struct StreamLog {
    state: RwLock<LogState>,
    append_lock: Mutex<()>,
}

impl StreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise appends to this stream.
    pub async fn append_lock(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock().await
    }

    /// Point-in-time view of the log in commit order.
    pub async fn snapshot(&self) -> Arc<Vec<ManifestEntry>> {
        self.state.read().await.entries.clone()
    }

    pub async fn contains(&self, checksum: &str) -> bool {
        self.state.read().await.checksums.contains(checksum)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Assign `writer_sequence` and `committed_at` to a new entry.
    ///
    /// `committed_at` never moves backwards within a stream, so entries from
    /// one writer keep their commit order even if the wall clock does.
    pub async fn stamp(&self, mut entry: ManifestEntry, now: i64) -> ManifestEntry {
        let state = self.state.read().await;
        entry.writer_sequence = state
            .writer_sequences
            .get(&entry.writer)
            .map_or(0, |last| last + 1);
        entry.committed_at = now.max(state.last_committed_at);
        entry
    }

    /// Insert a stamped entry at its commit-order position.
    pub async fn insert(&self, entry: ManifestEntry) -> AppendOutcome {
        let mut state = self.state.write().await;
        if state.checksums.contains(&entry.checksum) {
            return AppendOutcome::Duplicate;
        }
        Self::insert_locked(&mut state, entry.clone());
        AppendOutcome::Appended(entry)
    }

    /// Add entries loaded from durable storage, skipping known checksums.
    ///
    /// Returns the number of entries added.
    pub async fn merge(&self, entries: Vec<ManifestEntry>) -> usize {
        let mut state = self.state.write().await;
        let mut added = 0;
        for entry in entries {
            if state.checksums.contains(&entry.checksum) {
                continue;
            }
            Self::insert_locked(&mut state, entry);
            added += 1;
        }
        added
    }

    fn insert_locked(state: &mut LogState, entry: ManifestEntry) {
        state.checksums.insert(entry.checksum.clone());
        let seq = state
            .writer_sequences
            .entry(entry.writer.clone())
            .or_insert(entry.writer_sequence);
        *seq = (*seq).max(entry.writer_sequence);
        state.last_committed_at = state.last_committed_at.max(entry.committed_at);

        let entries = Arc::make_mut(&mut state.entries);
        let pos = entries.partition_point(|e| e.commit_order() <= entry.commit_order());
        entries.insert(pos, entry);
    }
}
