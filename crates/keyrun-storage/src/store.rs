//! Run persistence contract and the in-memory backend.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use keyrun_core::{PartitionKey, RosterEntry, Run, RunRecord};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub runs_inserted: usize,
    pub roster_inserted: usize,
}

/// Runs per (period, spec, level).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SpecLevelCount {
    pub period: u32,
    pub spec_id: u32,
    pub level: u32,
    pub run_count: u64,
}

/// Runs per (period, activity, spec).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SpecActivityCount {
    pub period: u32,
    pub activity_id: u32,
    pub spec_id: u32,
    pub run_count: u64,
}

/// Durable run storage keyed by run id.
///
/// `insert` is upsert-or-ignore: a record whose id already exists is skipped
/// along with its roster, and the whole batch commits atomically.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn existing_ids(&self, partition: PartitionKey) -> Result<BTreeSet<u64>, StoreError>;

    async fn insert(&self, records: &[RunRecord]) -> Result<InsertReport, StoreError>;

    async fn spec_level_counts(&self) -> Result<Vec<SpecLevelCount>, StoreError>;

    async fn spec_activity_counts(&self) -> Result<Vec<SpecActivityCount>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<u64, Run>,
    roster: BTreeMap<(u64, u64), RosterEntry>,
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    state: Mutex<MemoryState>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.len()
    }

    pub async fn roster_count(&self) -> usize {
        self.state.lock().await.roster.len()
    }

    pub async fn run(&self, id: u64) -> Option<Run> {
        self.state.lock().await.runs.get(&id).cloned()
    }

    pub async fn roster_for(&self, run_id: u64) -> Vec<RosterEntry> {
        self.state
            .lock()
            .await
            .roster
            .range((run_id, 0)..=(run_id, u64::MAX))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub async fn runs(&self) -> Vec<Run> {
        self.state.lock().await.runs.values().cloned().collect()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn existing_ids(&self, partition: PartitionKey) -> Result<BTreeSet<u64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|run| run.partition() == partition)
            .map(|run| run.id)
            .collect())
    }

    async fn insert(&self, records: &[RunRecord]) -> Result<InsertReport, StoreError> {
        let mut state = self.state.lock().await;
        let mut report = InsertReport::default();
        for record in records {
            if state.runs.contains_key(&record.run.id) {
                continue;
            }
            state.runs.insert(record.run.id, record.run.clone());
            report.runs_inserted += 1;
            for entry in &record.roster {
                let key = (entry.run_id, entry.participant_id);
                if !state.roster.contains_key(&key) {
                    state.roster.insert(key, entry.clone());
                    report.roster_inserted += 1;
                }
            }
        }
        Ok(report)
    }

    async fn spec_level_counts(&self) -> Result<Vec<SpecLevelCount>, StoreError> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<(u32, u32, u32), u64> = BTreeMap::new();
        for entry in state.roster.values() {
            let run = state.runs.get(&entry.run_id).ok_or_else(|| {
                StoreError::Corrupt(format!("orphan roster row for run {}", entry.run_id))
            })?;
            *counts
                .entry((run.time_period, entry.role_spec_id, run.difficulty_level))
                .or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((period, spec_id, level), run_count)| SpecLevelCount {
                period,
                spec_id,
                level,
                run_count,
            })
            .collect())
    }

    async fn spec_activity_counts(&self) -> Result<Vec<SpecActivityCount>, StoreError> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<(u32, u32, u32), u64> = BTreeMap::new();
        for entry in state.roster.values() {
            let run = state.runs.get(&entry.run_id).ok_or_else(|| {
                StoreError::Corrupt(format!("orphan roster row for run {}", entry.run_id))
            })?;
            *counts
                .entry((run.time_period, run.activity_id, entry.role_spec_id))
                .or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((period, activity_id, spec_id), run_count)| SpecActivityCount {
                period,
                activity_id,
                spec_id,
                run_count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use keyrun_core::{Faction, Region};

    fn record(id: u64, region: Region, period: u32, specs: [u32; 5]) -> RunRecord {
        let run = Run {
            id,
            activity_id: 375,
            difficulty_level: 15,
            time_period: period,
            completed_at: Utc.timestamp_millis_opt(1_603_929_600_000).unwrap(),
            duration_ms: 1_500_000,
            faction: Faction::Horde,
            region,
            score: 163.33,
            is_successful: true,
            composition_signature: "emorv".into(),
        };
        let roster = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| RosterEntry {
                run_id: id,
                participant_id: 100 + i as u64,
                display_name: format!("player{i}"),
                role_spec_id: *spec,
                home_shard_id: 11,
            })
            .collect();
        RunRecord { run, roster }
    }

    #[tokio::test]
    async fn insert_skips_existing_ids_with_their_rosters() {
        let store = MemoryRunStore::new();
        let first = store
            .insert(&[record(1, Region::Us, 777, [66, 105, 258, 251, 254])])
            .await
            .unwrap();
        assert_eq!(first.runs_inserted, 1);
        assert_eq!(first.roster_inserted, 5);

        let mut changed = record(1, Region::Us, 777, [66, 105, 258, 251, 254]);
        changed.run.score = 1.0;
        let second = store
            .insert(&[changed, record(2, Region::Us, 777, [66, 105, 258, 251, 254])])
            .await
            .unwrap();
        assert_eq!(second.runs_inserted, 1);
        assert_eq!(store.run_count().await, 2);
        assert_eq!(store.roster_count().await, 10);
        assert!((store.run(1).await.unwrap().score - 163.33).abs() < 1e-9);
        assert_eq!(store.roster_for(2).await.len(), 5);
    }

    #[tokio::test]
    async fn existing_ids_are_scoped_to_the_partition() {
        let store = MemoryRunStore::new();
        store
            .insert(&[
                record(1, Region::Us, 777, [66, 105, 258, 251, 254]),
                record(2, Region::Eu, 777, [66, 105, 258, 251, 254]),
                record(3, Region::Us, 778, [66, 105, 258, 251, 254]),
            ])
            .await
            .unwrap();

        let ids = store
            .existing_ids(PartitionKey::new(Region::Us, 777))
            .await
            .unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1]);
        assert!(store
            .existing_ids(PartitionKey::new(Region::Kr, 777))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn summary_counts_group_roster_rows() {
        let store = MemoryRunStore::new();
        store
            .insert(&[
                record(1, Region::Us, 777, [66, 105, 258, 251, 254]),
                record(2, Region::Us, 777, [66, 105, 258, 258, 254]),
            ])
            .await
            .unwrap();

        let by_level = store.spec_level_counts().await.unwrap();
        let shadow = by_level.iter().find(|c| c.spec_id == 258).unwrap();
        assert_eq!(shadow.run_count, 3);
        assert_eq!((shadow.period, shadow.level), (777, 15));

        let by_activity = store.spec_activity_counts().await.unwrap();
        let tank = by_activity.iter().find(|c| c.spec_id == 66).unwrap();
        assert_eq!((tank.activity_id, tank.run_count), (375, 2));
        assert_eq!(by_activity.len(), 5);
    }
}
