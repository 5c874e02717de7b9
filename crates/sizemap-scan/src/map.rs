//! Concurrent path → record store filled during a scan.

use std::path::PathBuf;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sizemap_core::AnalyticsRecord;

/// Concurrent map from absolute path to its analytics record.
///
/// Workers write disjoint keys; a second insert for a key is refused so a
/// record, once published, is never overwritten mid-scan.
#[derive(Debug, Default)]
pub struct AnalyticsMap {
    records: DashMap<PathBuf, AnalyticsRecord>,
}

impl AnalyticsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns `false` if its path was already present.
    pub fn insert(&self, record: AnalyticsRecord) -> bool {
        match self.records.entry(record.path.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Consume the map into records ordered by path.
    pub fn into_records(self) -> Vec<AnalyticsRecord> {
        let mut records: Vec<_> = self.records.into_iter().map(|(_, r)| r).collect();
        records.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        records
    }
}
