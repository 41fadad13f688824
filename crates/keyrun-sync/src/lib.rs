//! Ingestion cycle orchestration, deduplication, reporting and summary export.

use std::sync::Arc;

use anyhow::{Context, Result};
use keyrun_adapters::{ApiEndpoints, GameDataApi, LeaderboardNormalizer};
use keyrun_core::{ScoringEngine, SpecCatalog};
use keyrun_storage::{HttpFetcher, RunStore};

pub mod config;
pub mod dedup;
pub mod export;
pub mod pipeline;
pub mod registry;
pub mod report;

pub use config::SyncConfig;
pub use dedup::{dedupe, DedupReport};
pub use export::{export_summary, SummaryManifest, SummaryManifestFile};
pub use pipeline::{CycleSummary, IngestionPipeline, PipelineSettings, RegionSummary, StepSummary};
pub use registry::IngestRegistry;
pub use report::{cycle_brief_markdown, write_cycle_report};

/// Wires a pipeline from configuration: registry, catalogs, HTTP client and credentials.
pub fn pipeline_from_config(
    config: &SyncConfig,
    store: Arc<dyn RunStore>,
) -> Result<IngestionPipeline> {
    let registry = IngestRegistry::load(&config.registry_path)?;
    let activities = Arc::new(registry.activity_catalog()?);
    let normalizer = LeaderboardNormalizer::new(
        Arc::new(SpecCatalog::standard()),
        ScoringEngine::new(activities),
    );

    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let endpoints = ApiEndpoints::new(config.api_base_url.clone(), config.api_locale.clone())
        .context("configuring API endpoints")?;
    let auth = config.authenticator(fetcher.client().clone())?;

    Ok(IngestionPipeline::new(
        GameDataApi::new(fetcher, endpoints),
        auth,
        store,
        normalizer,
        PipelineSettings {
            regions: registry.regions.clone(),
            activity_ids: registry.activity_ids(),
            max_concurrency: config.max_concurrency,
            period_override: config.period_override,
            reports_dir: Some(config.reports_dir.clone()),
        },
    ))
}
