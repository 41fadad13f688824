//! Leaderboard payload to typed run records.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use keyrun_core::{
    derive_run_id, CatalogError, Faction, Region, RosterEntry, Run, RunIdOverflow, RunRecord,
    ScoringEngine, SpecCatalog, GROUP_SIZE,
};
use reqwest::Url;
use thiserror::Error;
use tracing::warn;

use crate::payload::{LeaderboardResponse, LeadingGroup};

/// A leaderboard ranks at most this many groups.
pub const MAX_GROUPS_PER_LEADERBOARD: usize = 500;

const NAMESPACE_PARAM: &str = "namespace";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed leaderboard payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no region namespace in self link {href}")]
    MissingRegion { href: String },
    #[error("group has {found} members, expected {}", GROUP_SIZE)]
    RosterSize { found: usize },
    #[error("unknown build (spec) id {0}")]
    UnknownSpec(u32),
    #[error("unknown activity id {0}")]
    UnknownActivity(u32),
    #[error("run id overflow: {0}")]
    IdOverflow(#[from] RunIdOverflow),
    #[error("completion timestamp {0}ms is out of range")]
    InvalidTimestamp(i64),
}

impl From<CatalogError> for NormalizeError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownSpec(id) => NormalizeError::UnknownSpec(id),
            CatalogError::UnknownActivity(id)
            | CatalogError::ZeroTimeLimit(id)
            | CatalogError::DuplicateActivity(id) => NormalizeError::UnknownActivity(id),
        }
    }
}

/// A ranked group that could not be turned into a record.
#[derive(Debug)]
pub struct RejectedGroup {
    pub position: usize,
    pub error: NormalizeError,
}

/// Everything one leaderboard response contributed.
#[derive(Debug)]
pub struct LeaderboardBatch {
    pub region: Region,
    pub activity_id: u32,
    pub period: u32,
    pub cluster_id: Option<u32>,
    pub affixes: Vec<u32>,
    pub records: Vec<RunRecord>,
    pub rejected: Vec<RejectedGroup>,
}

impl LeaderboardBatch {
    pub fn overflow_count(&self) -> usize {
        self.rejected
            .iter()
            .filter(|r| matches!(r.error, NormalizeError::IdOverflow(_)))
            .count()
    }
}

/// Resolves the region from the `namespace=dynamic-<region>` query parameter.
pub fn region_from_self_link(href: &str) -> Result<Region, NormalizeError> {
    let missing = || NormalizeError::MissingRegion {
        href: keyrun_storage::redact_access_token(href),
    };
    let url = Url::parse(href).map_err(|_| missing())?;
    let namespace = url
        .query_pairs()
        .find(|(key, _)| key == NAMESPACE_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(missing)?;
    namespace
        .rsplit('-')
        .next()
        .and_then(|slug| slug.parse().ok())
        .ok_or_else(missing)
}

/// Stateless transform over read-only catalogs; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct LeaderboardNormalizer {
    specs: Arc<SpecCatalog>,
    scoring: ScoringEngine,
}

impl LeaderboardNormalizer {
    pub fn new(specs: Arc<SpecCatalog>, scoring: ScoringEngine) -> Self {
        Self { specs, scoring }
    }

    pub fn normalize_bytes(&self, body: &[u8]) -> Result<LeaderboardBatch, NormalizeError> {
        let payload: LeaderboardResponse = serde_json::from_slice(body)?;
        self.normalize(&payload)
    }

    /// Response-level problems (region, activity) fail the whole response;
    /// group-level problems reject only that group.
    pub fn normalize(
        &self,
        payload: &LeaderboardResponse,
    ) -> Result<LeaderboardBatch, NormalizeError> {
        let region = region_from_self_link(&payload.links.self_link.href)?;
        let activity_id = payload.map_challenge_mode_id;
        self.scoring.activities().get(activity_id)?;

        let mut batch = LeaderboardBatch {
            region,
            activity_id,
            period: payload.period,
            cluster_id: payload.cluster_id(),
            affixes: payload.affix_ids(),
            records: Vec::new(),
            rejected: Vec::new(),
        };

        let Some(groups) = &payload.leading_groups else {
            return Ok(batch);
        };

        for (position, group) in groups.iter().take(MAX_GROUPS_PER_LEADERBOARD).enumerate() {
            match self.normalize_group(group, region, activity_id, payload.period) {
                Ok(record) => batch.records.push(record),
                Err(error) => {
                    warn!(
                        %region,
                        activity_id,
                        period = payload.period,
                        position,
                        error = %error,
                        "rejecting leaderboard group"
                    );
                    batch.rejected.push(RejectedGroup { position, error });
                }
            }
        }
        Ok(batch)
    }

    fn normalize_group(
        &self,
        group: &LeadingGroup,
        region: Region,
        activity_id: u32,
        period: u32,
    ) -> Result<RunRecord, NormalizeError> {
        if group.members.len() != GROUP_SIZE {
            return Err(NormalizeError::RosterSize {
                found: group.members.len(),
            });
        }

        let completed_at = Utc
            .timestamp_millis_opt(group.completed_timestamp)
            .single()
            .ok_or(NormalizeError::InvalidTimestamp(group.completed_timestamp))?;

        let composition_signature = self
            .specs
            .composition_signature(group.members.iter().map(|m| m.specialization.id))?;

        let smallest_participant = group
            .members
            .iter()
            .map(|m| m.profile.id)
            .min()
            .ok_or(NormalizeError::RosterSize { found: 0 })?;
        let id = derive_run_id(group.completed_timestamp, region, smallest_participant)?;

        let faction = Faction::from_api_label(&group.members[0].faction.kind);
        let score = self
            .scoring
            .score(group.duration, activity_id, group.keystone_level)?;
        let is_successful = self.scoring.is_successful(group.duration, activity_id)?;

        let roster = group
            .members
            .iter()
            .map(|m| RosterEntry {
                run_id: id,
                participant_id: m.profile.id,
                display_name: m.profile.name.clone(),
                role_spec_id: m.specialization.id,
                home_shard_id: m.profile.realm.id,
            })
            .collect();

        Ok(RunRecord {
            run: Run {
                id,
                activity_id,
                difficulty_level: group.keystone_level,
                time_period: period,
                completed_at,
                duration_ms: group.duration,
                faction,
                region,
                score,
                is_successful,
                composition_signature,
            },
            roster,
        })
    }
}
