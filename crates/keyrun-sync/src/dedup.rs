//! Candidate filtering against stored ids and against the batch itself.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use keyrun_core::RunRecord;

#[derive(Debug, Default)]
pub struct DedupReport {
    /// Novel records ordered by id.
    pub novel: Vec<RunRecord>,
    pub already_stored: usize,
    pub duplicates_in_batch: usize,
}

/// A candidate is novel when its id is not in `existing` and no earlier
/// candidate carried the same id. The first candidate for an id wins.
pub fn dedupe(candidates: Vec<RunRecord>, existing: &BTreeSet<u64>) -> DedupReport {
    let mut report = DedupReport::default();
    let mut novel: BTreeMap<u64, RunRecord> = BTreeMap::new();

    for record in candidates {
        let id = record.id();
        if existing.contains(&id) {
            report.already_stored += 1;
            continue;
        }
        match novel.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(_) => report.duplicates_in_batch += 1,
        }
    }

    report.novel = novel.into_values().collect();
    report
}
