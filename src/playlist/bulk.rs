use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
pub struct BulkAppendBody {
    pub song_ids: Vec<i64>,
}

/// Counts reported back for a bulk add so clients can reconcile exactly
/// which of their ids went where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAppendReport {
    pub requested_count: usize,
    pub unique_count: usize,
    pub allowed_count: usize,
    pub added_count: usize,
    pub skipped_not_in_library: usize,
    pub skipped_existing: usize,
    /// 0 when nothing was added.
    pub first_position: i64,
    pub last_position: i64,
}

/// Drops non-positive ids and repeats, keeping first-occurrence order.
pub fn normalize_unique_ids(raw: &[i64]) -> Vec<usize> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.iter()
        .filter(|id| **id > 0)
        .map(|id| *id as usize)
        .filter(|id| seen.insert(*id))
        .collect()
}
