//! Time ranges used by queries and manifest entries.
//!
//! A query range is half-open: `[start, end)`. A manifest entry covers the
//! closed range `[min, max]` of the timestamps it contains.

use serde::{Deserialize, Serialize};

/// Get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open time range `[start, end)` in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Range covering every representable timestamp.
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Whether the closed range `[min, max]` overlaps this range.
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        min <= max && min < self.end && max >= self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_half_open() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
    }

    #[test]
    fn test_overlaps() {
        let range = TimeRange::new(100, 200);
        assert!(range.overlaps(50, 100));
        assert!(range.overlaps(199, 300));
        assert!(range.overlaps(120, 130));
        assert!(!range.overlaps(200, 300));
        assert!(!range.overlaps(0, 99));
    }

    #[test]
    fn test_all_and_empty() {
        assert!(TimeRange::all().contains(0));
        assert!(TimeRange::new(5, 5).is_empty());
        assert!(!TimeRange::new(5, 6).is_empty());
    }
}
