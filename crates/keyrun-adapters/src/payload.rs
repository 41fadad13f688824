//! Typed shapes of the game-data API responses the pipeline reads.
//!
//! Only fields the pipeline uses are declared; everything else in the payload is
//! ignored. A missing required field fails deserialization, which callers treat
//! as a malformed response.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    pub href: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdRef {
    pub id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: Href,
}

/// One cluster's ranking for one activity in one period.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardResponse {
    #[serde(rename = "_links")]
    pub links: Links,
    pub period: u32,
    pub connected_realm: Href,
    pub map_challenge_mode_id: u32,
    /// Absent when nobody has completed the activity yet this period.
    #[serde(default)]
    pub leading_groups: Option<Vec<LeadingGroup>>,
    #[serde(default)]
    pub keystone_affixes: Vec<AffixEntry>,
}

impl LeaderboardResponse {
    pub fn cluster_id(&self) -> Option<u32> {
        cluster_id_from_href(&self.connected_realm.href)
    }

    pub fn affix_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .keystone_affixes
            .iter()
            .map(|a| a.keystone_affix.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AffixEntry {
    pub keystone_affix: IdRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadingGroup {
    #[serde(default)]
    pub ranking: Option<u32>,
    pub duration: u64,
    pub completed_timestamp: i64,
    pub keystone_level: u32,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMember {
    pub profile: MemberProfile,
    pub faction: FactionLabel,
    pub specialization: IdRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberProfile {
    pub name: String,
    pub id: u64,
    pub realm: IdRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactionLabel {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodIndex {
    pub current_period: IdRef,
    #[serde(default)]
    pub periods: Vec<IdRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterIndex {
    pub connected_realms: Vec<Href>,
}

/// Extracts `{id}` from `.../connected-realm/{id}?...`.
pub fn cluster_id_from_href(href: &str) -> Option<u32> {
    const MARKER: &str = "connected-realm/";
    let start = href.find(MARKER)? + MARKER.len();
    let digits: String = href[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
