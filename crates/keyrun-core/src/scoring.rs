//! Point value of a completed run.

use std::sync::Arc;

use crate::catalog::{ActivityCatalog, CatalogError};

/// Final scores never drop below this.
pub const SCORE_FLOOR: f64 = 10.0;

const SOFT_CAP_LEVEL: u32 = 10;

/// Linear up to the soft cap, then 10% compounding per level.
pub fn base_points(level: u32) -> f64 {
    if level <= SOFT_CAP_LEVEL {
        10.0 * f64::from(level)
    } else {
        100.0 * 1.1_f64.powi((level - SOFT_CAP_LEVEL) as i32)
    }
}

/// Bonus awarded for beating the timer by a wide margin.
fn chest_bonus_pct(ratio: f64) -> f64 {
    if ratio <= 0.6 {
        0.03
    } else if ratio <= 0.8 {
        0.015
    } else {
        0.0
    }
}

/// Score for a run that took `ratio` of the time limit at `level`.
pub fn score_for_ratio(ratio: f64, level: u32) -> f64 {
    let base = base_points(level);
    let score = if ratio <= 1.0 {
        let flat_bonus_pct = (1.0 - ratio) * 0.085;
        base + base * (flat_bonus_pct + chest_bonus_pct(ratio))
    } else {
        let penalty = base * 0.1 + (ratio - 1.0) * 0.24 * base * 0.9;
        base - penalty
    };
    score.max(SCORE_FLOOR)
}

pub fn score_with_limit(duration_ms: u64, time_limit_ms: u64, level: u32) -> f64 {
    score_for_ratio(duration_ms as f64 / time_limit_ms as f64, level)
}

/// Scores runs against the activity catalog's canonical time limits.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    activities: Arc<ActivityCatalog>,
}

impl ScoringEngine {
    pub fn new(activities: Arc<ActivityCatalog>) -> Self {
        Self { activities }
    }

    pub fn activities(&self) -> &ActivityCatalog {
        &self.activities
    }

    pub fn score(
        &self,
        duration_ms: u64,
        activity_id: u32,
        difficulty_level: u32,
    ) -> Result<f64, CatalogError> {
        let limit = self.activities.time_limit_ms(activity_id)?;
        Ok(score_with_limit(duration_ms, limit, difficulty_level))
    }

    /// A run succeeds when it finishes within the time limit, inclusive.
    pub fn is_successful(&self, duration_ms: u64, activity_id: u32) -> Result<bool, CatalogError> {
        Ok(duration_ms <= self.activities.time_limit_ms(activity_id)?)
    }
}
