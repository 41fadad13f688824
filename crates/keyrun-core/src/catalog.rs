//! Read-only lookup tables: build (spec) classification and activity time limits.
//!
//! Both catalogs are constructed once at startup and shared by `Arc`; nothing
//! mutates them afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown activity id {0}")]
    UnknownActivity(u32),
    #[error("unknown build (spec) id {0}")]
    UnknownSpec(u32),
    #[error("activity {0} has a zero time limit")]
    ZeroTimeLimit(u32),
    #[error("activity id {0} listed twice")]
    DuplicateActivity(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tank,
    Healer,
    MeleeDps,
    RangedDps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecInfo {
    pub spec_id: u32,
    pub class_name: &'static str,
    pub spec_name: &'static str,
    pub role: Role,
    pub shorthand: char,
}

const fn spec(
    spec_id: u32,
    class_name: &'static str,
    spec_name: &'static str,
    role: Role,
    shorthand: char,
) -> SpecInfo {
    SpecInfo {
        spec_id,
        class_name,
        spec_name,
        role,
        shorthand,
    }
}

const STANDARD_SPECS: [SpecInfo; 36] = [
    spec(62, "mage", "arcane", Role::RangedDps, 'a'),
    spec(63, "mage", "fire", Role::RangedDps, 'b'),
    spec(64, "mage", "frost", Role::RangedDps, 'c'),
    spec(65, "paladin", "holy", Role::Healer, 'd'),
    spec(66, "paladin", "protection", Role::Tank, 'e'),
    spec(70, "paladin", "retribution", Role::MeleeDps, 'f'),
    spec(71, "warrior", "arms", Role::MeleeDps, 'g'),
    spec(72, "warrior", "fury", Role::MeleeDps, 'h'),
    spec(73, "warrior", "protection", Role::Tank, 'i'),
    spec(102, "druid", "balance", Role::RangedDps, 'j'),
    spec(103, "druid", "feral", Role::MeleeDps, 'k'),
    spec(104, "druid", "guardian", Role::Tank, 'l'),
    spec(105, "druid", "restoration", Role::Healer, 'm'),
    spec(250, "death knight", "blood", Role::Tank, 'n'),
    spec(251, "death knight", "frost", Role::MeleeDps, 'o'),
    spec(252, "death knight", "unholy", Role::MeleeDps, 'p'),
    spec(253, "hunter", "beast mastery", Role::RangedDps, 'q'),
    spec(254, "hunter", "marksmanship", Role::RangedDps, 'r'),
    spec(255, "hunter", "survival", Role::MeleeDps, 's'),
    spec(256, "priest", "discipline", Role::Healer, 't'),
    spec(257, "priest", "holy", Role::Healer, 'u'),
    spec(258, "priest", "shadow", Role::RangedDps, 'v'),
    spec(259, "rogue", "assassination", Role::MeleeDps, 'w'),
    spec(260, "rogue", "outlaw", Role::MeleeDps, 'x'),
    spec(261, "rogue", "subtlety", Role::MeleeDps, 'y'),
    spec(262, "shaman", "elemental", Role::RangedDps, 'z'),
    spec(263, "shaman", "enhancement", Role::MeleeDps, 'A'),
    spec(264, "shaman", "restoration", Role::Healer, 'B'),
    spec(265, "warlock", "affliction", Role::RangedDps, 'C'),
    spec(266, "warlock", "demonology", Role::RangedDps, 'D'),
    spec(267, "warlock", "destruction", Role::RangedDps, 'E'),
    spec(268, "monk", "brewmaster", Role::Tank, 'F'),
    spec(269, "monk", "windwalker", Role::MeleeDps, 'G'),
    spec(270, "monk", "mistweaver", Role::Healer, 'H'),
    spec(577, "demon hunter", "havoc", Role::MeleeDps, 'I'),
    spec(581, "demon hunter", "vengeance", Role::Tank, 'J'),
];

/// Build classification keyed by spec id.
#[derive(Debug, Clone)]
pub struct SpecCatalog {
    specs: BTreeMap<u32, SpecInfo>,
}

impl SpecCatalog {
    pub fn standard() -> Self {
        Self {
            specs: STANDARD_SPECS.iter().map(|s| (s.spec_id, *s)).collect(),
        }
    }

    pub fn get(&self, spec_id: u32) -> Result<&SpecInfo, CatalogError> {
        self.specs
            .get(&spec_id)
            .ok_or(CatalogError::UnknownSpec(spec_id))
    }

    pub fn shorthand(&self, spec_id: u32) -> Result<char, CatalogError> {
        self.get(spec_id).map(|s| s.shorthand)
    }

    pub fn role(&self, spec_id: u32) -> Result<Role, CatalogError> {
        self.get(spec_id).map(|s| s.role)
    }

    /// Sorted concatenation of the members' shorthand codes.
    pub fn composition_signature(
        &self,
        spec_ids: impl IntoIterator<Item = u32>,
    ) -> Result<String, CatalogError> {
        let mut codes = spec_ids
            .into_iter()
            .map(|id| self.shorthand(id))
            .collect::<Result<Vec<_>, _>>()?;
        codes.sort_unstable();
        Ok(codes.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecInfo> {
        self.specs.values()
    }
}

impl Default for SpecCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// A timed activity (dungeon) with its canonical time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u32,
    pub name: String,
    pub time_limit_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityCatalog {
    activities: BTreeMap<u32, Activity>,
}

impl ActivityCatalog {
    pub fn new(activities: impl IntoIterator<Item = Activity>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for activity in activities {
            if activity.time_limit_ms == 0 {
                return Err(CatalogError::ZeroTimeLimit(activity.id));
            }
            if map.insert(activity.id, activity.clone()).is_some() {
                return Err(CatalogError::DuplicateActivity(activity.id));
            }
        }
        Ok(Self { activities: map })
    }

    /// Season-one dungeon rotation used when no registry overrides it.
    pub fn standard() -> Self {
        let rows = [
            (375, "Mists of Tirna Scithe", 1_800_000),
            (376, "The Necrotic Wake", 2_160_000),
            (377, "De Other Side", 2_580_000),
            (378, "Halls of Atonement", 1_860_000),
            (379, "Plaguefall", 2_280_000),
            (380, "Sanguine Depths", 2_460_000),
            (381, "Spires of Ascension", 2_340_000),
            (382, "Theater of Pain", 2_220_000),
        ];
        Self {
            activities: rows
                .into_iter()
                .map(|(id, name, time_limit_ms)| {
                    (
                        id,
                        Activity {
                            id,
                            name: name.to_string(),
                            time_limit_ms,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, activity_id: u32) -> Result<&Activity, CatalogError> {
        self.activities
            .get(&activity_id)
            .ok_or(CatalogError::UnknownActivity(activity_id))
    }

    pub fn time_limit_ms(&self, activity_id: u32) -> Result<u64, CatalogError> {
        self.get(activity_id).map(|a| a.time_limit_ms)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.activities.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
