//! One ingestion cycle: enumerate, fetch, normalize, dedupe, persist.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyrun_adapters::{Authenticator, GameDataApi, LeaderboardNormalizer};
use keyrun_core::{PartitionKey, Region, ShardTopology};
use keyrun_storage::RunStore;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::dedupe;
use crate::report::write_cycle_report;

const UNAUTHORIZED: u16 = 401;

/// Counters for one region/activity step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepSummary {
    pub activity_id: u32,
    pub urls: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub parsed: usize,
    pub rejected: usize,
    pub id_overflows: usize,
    pub malformed: usize,
    pub already_stored: usize,
    pub duplicates_in_batch: usize,
    pub novel: usize,
    pub inserted: usize,
    pub roster_inserted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub region: Region,
    pub period: Option<u32>,
    pub clusters: usize,
    /// Set when the region was skipped before any activity step ran.
    pub skipped: Option<String>,
    pub steps: Vec<StepSummary>,
}

impl RegionSummary {
    fn new(region: Region) -> Self {
        Self {
            region,
            period: None,
            clusters: 0,
            skipped: None,
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regions: Vec<RegionSummary>,
    pub report_dir: Option<String>,
}

impl CycleSummary {
    fn steps(&self) -> impl Iterator<Item = &StepSummary> {
        self.regions.iter().flat_map(|r| r.steps.iter())
    }

    pub fn total_fetched(&self) -> usize {
        self.steps().map(|s| s.fetched).sum()
    }

    pub fn total_parsed(&self) -> usize {
        self.steps().map(|s| s.parsed).sum()
    }

    pub fn total_novel(&self) -> usize {
        self.steps().map(|s| s.novel).sum()
    }

    pub fn total_inserted(&self) -> usize {
        self.steps().map(|s| s.inserted).sum()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps().filter(|s| s.error.is_some()).count()
    }

    pub fn skipped_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.skipped.is_some()).count()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub regions: Vec<Region>,
    pub activity_ids: Vec<u32>,
    pub max_concurrency: usize,
    /// Fixed period for every region instead of the API's current one.
    pub period_override: Option<u32>,
    /// Cycle reports are written here when set.
    pub reports_dir: Option<PathBuf>,
}

pub struct IngestionPipeline {
    api: GameDataApi,
    auth: Arc<dyn Authenticator>,
    store: Arc<dyn RunStore>,
    normalizer: LeaderboardNormalizer,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        api: GameDataApi,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn RunStore>,
        normalizer: LeaderboardNormalizer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            api,
            auth,
            store,
            normalizer,
            settings,
        }
    }

    /// Runs one full cycle across every configured region and activity.
    ///
    /// Only an authentication failure at cycle start aborts the cycle. Index,
    /// store and later credential failures skip the affected region or step
    /// and are recorded in the returned summary.
    ///
    /// The credential is requested again for every region and step, so a
    /// token refreshed after expiry or invalidation reaches the rest of the
    /// cycle.
    pub async fn run_once(&self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("ingest_cycle", %cycle_id);
        self.run_cycle(cycle_id).instrument(span).await
    }

    async fn run_cycle(&self, cycle_id: Uuid) -> Result<CycleSummary> {
        let started_at = Utc::now();
        self.auth
            .get_token()
            .await
            .context("authenticating ingest cycle")?;

        let mut topology = ShardTopology::new();
        let mut regions = Vec::with_capacity(self.settings.regions.len());
        for region in &self.settings.regions {
            regions.push(self.run_region(*region, &mut topology).await);
        }

        let mut summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            regions,
            report_dir: None,
        };

        if let Some(reports_dir) = &self.settings.reports_dir {
            let dir = write_cycle_report(reports_dir, &summary).await?;
            summary.report_dir = Some(dir.display().to_string());
        }

        info!(
            regions = summary.regions.len(),
            skipped_regions = summary.skipped_regions(),
            fetched = summary.total_fetched(),
            parsed = summary.total_parsed(),
            novel = summary.total_novel(),
            inserted = summary.total_inserted(),
            failed_steps = summary.failed_steps(),
            "ingest cycle complete"
        );
        Ok(summary)
    }

    async fn run_region(
        &self,
        region: Region,
        topology: &mut ShardTopology,
    ) -> RegionSummary {
        let mut summary = RegionSummary::new(region);

        let token = match self.auth.get_token().await {
            Ok(token) => token,
            Err(err) => {
                error!(%region, error = %err, "authentication failed; skipping region");
                summary.skipped = Some(format!("authentication failed: {err}"));
                return summary;
            }
        };

        let period = match self.settings.period_override {
            Some(period) => period,
            None => match self.api.current_period(region, &token).await {
                Ok(period) => period,
                Err(err) => {
                    error!(%region, error = %err, "period lookup failed; skipping region");
                    summary.skipped = Some(format!("period lookup failed: {err}"));
                    return summary;
                }
            },
        };
        summary.period = Some(period);

        if let Err(err) = self.api.ensure_clusters(topology, region, &token).await {
            error!(%region, error = %err, "cluster index failed; skipping region");
            summary.skipped = Some(format!("cluster index failed: {err}"));
            return summary;
        }
        summary.clusters = topology.clusters(region).map_or(0, <[_]>::len);

        let partition = PartitionKey::new(region, period);
        let mut existing = match self.store.existing_ids(partition).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(%region, period, error = %err, "existing id query failed; skipping region");
                summary.skipped = Some(format!("existing id query failed: {err}"));
                return summary;
            }
        };

        for activity_id in &self.settings.activity_ids {
            let step = self
                .run_step(region, *activity_id, period, topology, &mut existing)
                .await;
            summary.steps.push(step);
        }
        summary
    }

    async fn run_step(
        &self,
        region: Region,
        activity_id: u32,
        period: u32,
        topology: &ShardTopology,
        existing: &mut BTreeSet<u64>,
    ) -> StepSummary {
        let mut step = StepSummary {
            activity_id,
            ..StepSummary::default()
        };

        let token = match self.auth.get_token().await {
            Ok(token) => token,
            Err(err) => {
                error!(%region, activity_id, period, error = %err, "authentication failed");
                step.error = Some(format!("authentication failed: {err}"));
                return step;
            }
        };

        let urls = self
            .api
            .endpoints()
            .leaderboard_urls(topology, region, activity_id, period, &token);
        step.urls = urls.len();

        let batch = self
            .api
            .fetcher()
            .fetch_all(&urls, self.settings.max_concurrency)
            .await;
        step.fetched = batch.responses.len();
        step.fetch_failures = batch.failures.len() + batch.aborted_workers;

        if batch.failures.iter().any(|f| f.status == Some(UNAUTHORIZED)) {
            warn!(%region, activity_id, "credential rejected mid-cycle; dropping cached token");
            self.auth.invalidate().await;
        }

        let mut candidates = Vec::new();
        for response in &batch.responses {
            match self.normalizer.normalize_bytes(&response.body) {
                Ok(leaderboard) if leaderboard.region != region || leaderboard.period != period => {
                    step.malformed += 1;
                    warn!(
                        url = %response.url,
                        got_region = %leaderboard.region,
                        got_period = leaderboard.period,
                        "leaderboard belongs to another partition; skipping"
                    );
                }
                Ok(leaderboard) => {
                    step.parsed += leaderboard.records.len();
                    step.rejected += leaderboard.rejected.len();
                    step.id_overflows += leaderboard.overflow_count();
                    candidates.extend(leaderboard.records);
                }
                Err(err) => {
                    step.malformed += 1;
                    warn!(
                        url = %response.url,
                        error = %err,
                        "skipping malformed leaderboard response"
                    );
                }
            }
        }

        let report = dedupe(candidates, existing);
        step.already_stored = report.already_stored;
        step.duplicates_in_batch = report.duplicates_in_batch;
        step.novel = report.novel.len();

        if !report.novel.is_empty() {
            match self.store.insert(&report.novel).await {
                Ok(inserted) => {
                    step.inserted = inserted.runs_inserted;
                    step.roster_inserted = inserted.roster_inserted;
                    existing.extend(report.novel.iter().map(|r| r.id()));
                }
                Err(err) => {
                    error!(%region, activity_id, period, error = %err, "insert failed");
                    step.error = Some(format!("insert failed: {err}"));
                }
            }
        }

        info!(
            %region,
            activity = activity_id,
            period,
            urls = step.urls,
            fetched = step.fetched,
            fetch_failures = step.fetch_failures,
            parsed = step.parsed,
            rejected = step.rejected,
            malformed = step.malformed,
            novel = step.novel,
            inserted = step.inserted,
            "ingest step complete"
        );
        step
    }
}
