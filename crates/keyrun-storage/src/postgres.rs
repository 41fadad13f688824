//! Postgres-backed [`RunStore`].
//!
//! Run and participant ids are unsigned 64-bit values; Postgres has no unsigned
//! BIGINT, so they are stored bit-for-bit as `i64` and reinterpreted on read.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use keyrun_core::{PartitionKey, RunRecord};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use crate::store::{InsertReport, RunStore, SpecActivityCount, SpecLevelCount, StoreError};

/// Rows per multi-value INSERT; keeps bind parameters well below the protocol limit.
const INSERT_BATCH: usize = 1000;

pub(crate) fn id_to_db(id: u64) -> i64 {
    id as i64
}

pub(crate) fn id_from_db(raw: i64) -> u64 {
    raw as u64
}

fn u32_from_db(raw: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {raw}")))
}

fn count_from_db(raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative count: {raw}")))
}

#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn existing_ids(&self, partition: PartitionKey) -> Result<BTreeSet<u64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
              FROM runs
             WHERE region = $1
               AND time_period = $2
            "#,
        )
        .bind(i16::from(partition.region.code()))
        .bind(i64::from(partition.period))
        .fetch_all(&self.pool)
        .await?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(id_from_db(row.try_get("id")?));
        }
        debug!(
            region = %partition.region,
            period = partition.period,
            count = ids.len(),
            "loaded existing run ids"
        );
        Ok(ids)
    }

    async fn insert(&self, records: &[RunRecord]) -> Result<InsertReport, StoreError> {
        if records.is_empty() {
            return Ok(InsertReport::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted_ids = BTreeSet::new();

        for chunk in records.chunks(INSERT_BATCH) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO runs (id, activity_id, difficulty_level, time_period, completed_at, \
                 duration_ms, faction, region, score, is_successful, composition_signature) ",
            );
            builder.push_values(chunk, |mut b, record| {
                let run = &record.run;
                b.push_bind(id_to_db(run.id))
                    .push_bind(i64::from(run.activity_id))
                    .push_bind(i64::from(run.difficulty_level))
                    .push_bind(i64::from(run.time_period))
                    .push_bind(run.completed_at)
                    .push_bind(i64::try_from(run.duration_ms).unwrap_or(i64::MAX))
                    .push_bind(i16::from(run.faction.as_bit()))
                    .push_bind(i16::from(run.region.code()))
                    .push_bind(run.score)
                    .push_bind(run.is_successful)
                    .push_bind(run.composition_signature.clone());
            });
            builder.push(" ON CONFLICT (id) DO NOTHING RETURNING id");

            let rows = builder.build().fetch_all(&mut *tx).await?;
            for row in rows {
                inserted_ids.insert(id_from_db(row.try_get("id")?));
            }
        }

        // Only rosters of runs that were actually inserted; existing runs keep theirs.
        let roster: Vec<_> = records
            .iter()
            .filter(|record| inserted_ids.contains(&record.run.id))
            .flat_map(|record| record.roster.iter())
            .collect();

        let mut roster_inserted = 0usize;
        for chunk in roster.chunks(INSERT_BATCH) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO roster (run_id, participant_id, display_name, role_spec_id, home_shard_id) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(id_to_db(entry.run_id))
                    .push_bind(id_to_db(entry.participant_id))
                    .push_bind(entry.display_name.clone())
                    .push_bind(i64::from(entry.role_spec_id))
                    .push_bind(i64::from(entry.home_shard_id));
            });
            builder.push(" ON CONFLICT (run_id, participant_id) DO NOTHING");
            let result = builder.build().execute(&mut *tx).await?;
            roster_inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(InsertReport {
            runs_inserted: inserted_ids.len(),
            roster_inserted,
        })
    }

    async fn spec_level_counts(&self) -> Result<Vec<SpecLevelCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.time_period, ro.role_spec_id, r.difficulty_level, COUNT(*) AS run_count
              FROM roster ro
              JOIN runs r ON r.id = ro.run_id
             GROUP BY r.time_period, ro.role_spec_id, r.difficulty_level
             ORDER BY r.time_period, ro.role_spec_id, r.difficulty_level
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SpecLevelCount {
                period: u32_from_db(row.try_get("time_period")?, "time_period")?,
                spec_id: u32_from_db(row.try_get("role_spec_id")?, "role_spec_id")?,
                level: u32_from_db(row.try_get("difficulty_level")?, "difficulty_level")?,
                run_count: count_from_db(row.try_get("run_count")?)?,
            });
        }
        Ok(out)
    }

    async fn spec_activity_counts(&self) -> Result<Vec<SpecActivityCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.time_period, r.activity_id, ro.role_spec_id, COUNT(*) AS run_count
              FROM roster ro
              JOIN runs r ON r.id = ro.run_id
             GROUP BY r.time_period, r.activity_id, ro.role_spec_id
             ORDER BY r.time_period, r.activity_id, ro.role_spec_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SpecActivityCount {
                period: u32_from_db(row.try_get("time_period")?, "time_period")?,
                activity_id: u32_from_db(row.try_get("activity_id")?, "activity_id")?,
                spec_id: u32_from_db(row.try_get("role_spec_id")?, "role_spec_id")?,
                run_count: count_from_db(row.try_get("run_count")?)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_above_i64_max_survive_the_round_trip() {
        for id in [0, 1, 2_673_216_010_000_123_456, i64::MAX as u64, u64::MAX] {
            assert_eq!(id_from_db(id_to_db(id)), id);
        }
        assert!(id_to_db(u64::MAX) < 0);
    }

    #[test]
    fn out_of_range_columns_are_corrupt() {
        assert!(matches!(
            u32_from_db(-1, "time_period"),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(u32_from_db(812, "time_period").unwrap(), 812);
        assert!(count_from_db(-3).is_err());
    }
}
