//! Merging durable and live records.
//!
//! A record can be read twice when a batch commits while a query is in
//! flight: once from its new segment and once from the ingest node's
//! pending batch. Records are identified by [`RecordId`] and the segment
//! copy wins.

use loghouse_core::{Record, RecordId};
use std::collections::HashSet;

/// Merged result of one query.
#[derive(Debug, Default)]
pub struct Merged {
    pub records: Vec<Record>,
    /// Rows taken from committed segments
    pub durable_rows: usize,
    /// Rows taken from live nodes
    pub live_rows: usize,
    /// Live rows dropped because a segment already held them
    pub duplicates: usize,
    /// Whether `limit` dropped rows
    pub truncated: bool,
}

/// Merge segment rows (in commit order) with live rows into one sequence
/// ordered by timestamp.
///
/// Ties keep segment rows ahead of live rows, and otherwise keep input
/// order. At most `limit` records are kept.
pub fn merge(durable: Vec<Record>, live: Vec<Record>, limit: Option<usize>) -> Merged {
    let mut seen: HashSet<RecordId> = HashSet::with_capacity(durable.len() + live.len());
    let mut merged = Merged::default();
    let mut records = Vec::with_capacity(durable.len() + live.len());

    for record in durable {
        if seen.insert(record.id()) {
            merged.durable_rows += 1;
            records.push(record);
        }
    }
    for record in live {
        if seen.insert(record.id()) {
            merged.live_rows += 1;
            records.push(record);
        } else {
            merged.duplicates += 1;
        }
    }

    records.sort_by_key(|record| record.timestamp);

    if let Some(limit) = limit {
        if records.len() > limit {
            records.truncate(limit);
            merged.truncated = true;
        }
    }
    merged.records = records;
    merged
}
