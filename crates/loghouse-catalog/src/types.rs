use loghouse_core::TimeRange;
use serde::{Deserialize, Serialize};

/// Metadata for one committed segment.
///
/// `writer`, `writer_sequence` and `committed_at` are stamped by the catalog
/// when the entry is appended; the compactor leaves them at their defaults
/// apart from `writer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Unique segment identifier (the checksum prefix plus stream)
    pub segment_id: String,

    /// Stream the segment belongs to
    pub stream: String,

    /// Smallest record timestamp in the segment (inclusive)
    pub min_timestamp: i64,

    /// Largest record timestamp in the segment (inclusive)
    pub max_timestamp: i64,

    /// Number of rows in the segment
    pub row_count: u64,

    /// Hex SHA-256 of the encoded segment bytes
    pub checksum: String,

    /// Storage key of the segment bytes
    pub location: String,

    /// Encoded segment size in bytes
    pub size_bytes: u64,

    /// Node that committed the entry
    pub writer: String,

    /// Per-writer, per-stream commit counter
    #[serde(default)]
    pub writer_sequence: u64,

    /// Commit timestamp (milliseconds since Unix epoch)
    #[serde(default)]
    pub committed_at: i64,
}

impl ManifestEntry {
    /// Whether this entry's `[min, max]` intersects `range`.
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        range.overlaps(self.min_timestamp, self.max_timestamp)
    }

    /// Key that defines commit order across writers.
    pub fn commit_order(&self) -> (i64, &str, u64) {
        (self.committed_at, self.writer.as_str(), self.writer_sequence)
    }
}

/// Result of appending a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry was added; carries the entry as stamped by the catalog.
    Appended(ManifestEntry),
    /// An entry with the same checksum already exists for the stream.
    Duplicate,
}

/// Aggregate statistics for one stream's committed data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream: String,
    pub segments: u64,
    pub rows: u64,
    pub bytes: u64,
    pub first_event: Option<i64>,
    pub last_event: Option<i64>,
}

impl StreamStats {
    pub fn from_entries(stream: &str, entries: &[ManifestEntry]) -> Self {
        let mut stats = StreamStats {
            stream: stream.to_string(),
            ..Default::default()
        };
        for entry in entries {
            stats.segments += 1;
            stats.rows += entry.row_count;
            stats.bytes += entry.size_bytes;
            stats.first_event = Some(
                stats
                    .first_event
                    .map_or(entry.min_timestamp, |t| t.min(entry.min_timestamp)),
            );
            stats.last_event = Some(
                stats
                    .last_event
                    .map_or(entry.max_timestamp, |t| t.max(entry.max_timestamp)),
            );
        }
        stats
    }
}
