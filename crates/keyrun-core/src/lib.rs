//! Core domain model for key-run ingestion: runs, rosters, regions, catalogs and scoring.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;
pub mod scoring;

pub use catalog::{Activity, ActivityCatalog, CatalogError, Role, SpecCatalog, SpecInfo};
pub use scoring::ScoringEngine;

/// Fixed group size for a timed dungeon run.
pub const GROUP_SIZE: usize = 5;

/// Participant ids are zero-padded to this many decimal digits inside a run id.
pub const PARTICIPANT_ID_DIGITS: u32 = 10;

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Us,
    Kr,
    Eu,
    Tw,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Us, Region::Eu, Region::Kr, Region::Tw];

    /// Small integer code stored with every run and folded into its id.
    pub fn code(self) -> u8 {
        match self {
            Region::Us => 1,
            Region::Kr => 2,
            Region::Eu => 3,
            Region::Tw => 4,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Kr => "kr",
            Region::Eu => "eu",
            Region::Tw => "tw",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Region::Us),
            2 => Some(Region::Kr),
            3 => Some(Region::Eu),
            4 => Some(Region::Tw),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown region slug {0:?}")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "kr" => Ok(Region::Kr),
            "eu" => Ok(Region::Eu),
            "tw" => Ok(Region::Tw),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Alliance,
    Horde,
}

impl Faction {
    /// Anything that does not mention "alliance" counts as the other side.
    pub fn from_api_label(label: &str) -> Self {
        if label.to_ascii_lowercase().contains("alliance") {
            Faction::Alliance
        } else {
            Faction::Horde
        }
    }

    pub fn as_bit(self) -> u8 {
        match self {
            Faction::Alliance => 0,
            Faction::Horde => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            Faction::Alliance
        } else {
            Faction::Horde
        }
    }
}

/// Existence queries and inserts are scoped to one region + time period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub region: Region,
    pub period: u32,
}

impl PartitionKey {
    pub fn new(region: Region, period: u32) -> Self {
        Self { region, period }
    }
}

/// One completed timed activity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: u64,
    pub activity_id: u32,
    pub difficulty_level: u32,
    pub time_period: u32,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub faction: Faction,
    pub region: Region,
    pub score: f64,
    pub is_successful: bool,
    pub composition_signature: String,
}

impl Run {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.region, self.time_period)
    }
}

/// One participant's membership in a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterEntry {
    pub run_id: u64,
    pub participant_id: u64,
    pub display_name: String,
    pub role_spec_id: u32,
    pub home_shard_id: u32,
}

/// A run together with its roster; the unit handed from normalization to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: Run,
    pub roster: Vec<RosterEntry>,
}

impl RunRecord {
    pub fn id(&self) -> u64 {
        self.run.id
    }
}

/// A leaderboard cluster: one or more merged shards sharing a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardCluster {
    pub id: u32,
    pub region: Region,
}

/// Cluster index per region, resolved once per region per cycle.
#[derive(Debug, Clone, Default)]
pub struct ShardTopology {
    clusters: BTreeMap<Region, Vec<ShardCluster>>,
}

impl ShardTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cluster list for `region`; ids are sorted and deduplicated.
    pub fn set_region(&mut self, region: Region, cluster_ids: impl IntoIterator<Item = u32>) {
        let mut ids: Vec<u32> = cluster_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        self.clusters.insert(
            region,
            ids.into_iter().map(|id| ShardCluster { id, region }).collect(),
        );
    }

    pub fn clusters(&self, region: Region) -> Option<&[ShardCluster]> {
        self.clusters.get(&region).map(Vec::as_slice)
    }

    pub fn contains_region(&self, region: Region) -> bool {
        self.clusters.contains_key(&region)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunIdOverflow {
    #[error("completion timestamp {completed_at_ms}ms cannot be encoded into a run id")]
    Timestamp { completed_at_ms: i64 },
    #[error("participant id {participant_id} exceeds {} digits", PARTICIPANT_ID_DIGITS)]
    ParticipantId { participant_id: u64 },
    #[error("run id for minute {minute}, region {region_code}, participant {participant_id} exceeds u64")]
    Range {
        minute: u64,
        region_code: u8,
        participant_id: u64,
    },
}

/// Derives the deterministic run id.
///
/// The id is the decimal concatenation of the completion minute since the epoch,
/// the one-digit region code and the smallest participant id zero-padded to
/// [`PARTICIPANT_ID_DIGITS`] digits. Sub-minute precision is dropped so the same
/// run seen on several cluster leaderboards always maps to the same id.
pub fn derive_run_id(
    completed_at_ms: i64,
    region: Region,
    smallest_participant_id: u64,
) -> Result<u64, RunIdOverflow> {
    let minute = u64::try_from(completed_at_ms.div_euclid(MS_PER_MINUTE))
        .map_err(|_| RunIdOverflow::Timestamp { completed_at_ms })?;
    let participant_span = 10u64.pow(PARTICIPANT_ID_DIGITS);
    if smallest_participant_id >= participant_span {
        return Err(RunIdOverflow::ParticipantId {
            participant_id: smallest_participant_id,
        });
    }
    let overflow = || RunIdOverflow::Range {
        minute,
        region_code: region.code(),
        participant_id: smallest_participant_id,
    };
    minute
        .checked_mul(participant_span * 10)
        .and_then(|v| v.checked_add(u64::from(region.code()) * participant_span))
        .and_then(|v| v.checked_add(smallest_participant_id))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_codes_round_trip_through_slug_and_code() {
        for region in Region::ALL {
            assert_eq!(Region::from_code(region.code()), Some(region));
            assert_eq!(region.slug().parse::<Region>().unwrap(), region);
        }
        assert_eq!("EU".parse::<Region>().unwrap(), Region::Eu);
        assert!("cn".parse::<Region>().is_err());
    }

    #[test]
    fn faction_is_case_insensitive_alliance_match() {
        assert_eq!(Faction::from_api_label("ALLIANCE"), Faction::Alliance);
        assert_eq!(Faction::from_api_label("the Alliance"), Faction::Alliance);
        assert_eq!(Faction::from_api_label("HORDE"), Faction::Horde);
        assert_eq!(Faction::from_api_label(""), Faction::Horde);
        assert_eq!(Faction::Alliance.as_bit(), 0);
        assert_eq!(Faction::Horde.as_bit(), 1);
    }

    #[test]
    fn run_id_concatenates_minute_region_and_padded_participant() {
        // 2020-10-29T00:00:00Z plus 59.999s still lands in the same minute.
        let id = derive_run_id(1_603_929_600_000, Region::Us, 123_456).unwrap();
        assert_eq!(id, 2_673_216_010_000_123_456);
        assert_eq!(
            derive_run_id(1_603_929_659_999, Region::Us, 123_456).unwrap(),
            id
        );
        assert_eq!(id.to_string(), format!("26732160{}{:010}", 1, 123_456));
    }

    #[test]
    fn run_id_differs_by_region_and_minute() {
        let us = derive_run_id(1_603_929_600_000, Region::Us, 42).unwrap();
        let eu = derive_run_id(1_603_929_600_000, Region::Eu, 42).unwrap();
        let next_minute = derive_run_id(1_603_929_660_000, Region::Us, 42).unwrap();
        assert_ne!(us, eu);
        assert_ne!(us, next_minute);
    }

    #[test]
    fn run_id_overflow_is_reported() {
        assert!(matches!(
            derive_run_id(1_603_929_600_000, Region::Us, 10_000_000_000),
            Err(RunIdOverflow::ParticipantId { .. })
        ));
        assert!(matches!(
            derive_run_id(-1, Region::Us, 1),
            Err(RunIdOverflow::Timestamp { .. })
        ));
        assert!(matches!(
            derive_run_id(i64::MAX, Region::Tw, 1),
            Err(RunIdOverflow::Range { .. })
        ));
    }

    #[test]
    fn topology_sorts_and_dedups_cluster_ids() {
        let mut topology = ShardTopology::new();
        topology.set_region(Region::Eu, [509, 11, 509, 3]);
        let ids: Vec<u32> = topology
            .clusters(Region::Eu)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![3, 11, 509]);
        assert!(topology.clusters(Region::Us).is_none());
    }
}
