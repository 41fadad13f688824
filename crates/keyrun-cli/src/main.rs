use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyrun_storage::PgRunStore;
use keyrun_sync::{export_summary, pipeline_from_config, SyncConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "keyrun-cli")]
#[command(about = "Key-run leaderboard ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle across every configured region and activity.
    Ingest,
    /// Apply database migrations.
    Migrate,
    /// Rebuild the Parquet summary tables from the run store.
    ExportSummary,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn connect_store(config: &SyncConfig) -> Result<PgRunStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    PgRunStore::connect(database_url)
        .await
        .context("connecting to run store")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let store = connect_store(&config).await?;
            let pipeline = pipeline_from_config(&config, Arc::new(store))?;
            let summary = pipeline.run_once().await?;
            println!(
                "ingest complete: cycle_id={} fetched={} parsed={} novel={} inserted={} \
                 skipped_regions={} failed_steps={}",
                summary.cycle_id,
                summary.total_fetched(),
                summary.total_parsed(),
                summary.total_novel(),
                summary.total_inserted(),
                summary.skipped_regions(),
                summary.failed_steps()
            );
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::ExportSummary => {
            let store = connect_store(&config).await?;
            let manifest = export_summary(&store, &config.summary_dir).await?;
            info!(files = manifest.files.len(), "summary export finished");
            println!(
                "summary exported: dir={} files={}",
                config.summary_dir.join("summary").display(),
                manifest.files.len()
            );
        }
    }

    Ok(())
}
