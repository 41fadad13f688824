//! Summary tables for the reporting store, written as Parquet.
//!
//! Every export replaces the previous one: the `summary/` directory is removed
//! and rebuilt, then `manifest.json` records a digest per file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use keyrun_storage::{RunStore, SpecActivityCount, SpecLevelCount};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<SummaryManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

pub async fn export_summary(store: &dyn RunStore, summary_dir: &Path) -> Result<SummaryManifest> {
    let spec_levels = store
        .spec_level_counts()
        .await
        .context("querying spec/level summary")?;
    let spec_activities = store
        .spec_activity_counts()
        .await
        .context("querying spec/activity summary")?;

    let out_dir = summary_dir.join("summary");
    if fs::try_exists(&out_dir).await.unwrap_or(false) {
        fs::remove_dir_all(&out_dir)
            .await
            .with_context(|| format!("removing {}", out_dir.display()))?;
    }
    fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let spec_level_path = out_dir.join("spec_level_counts.parquet");
    let spec_activity_path = out_dir.join("spec_activity_counts.parquet");
    write_spec_level_parquet(&spec_level_path, &spec_levels)?;
    write_spec_activity_parquet(&spec_activity_path, &spec_activities)?;

    let manifest = SummaryManifest {
        schema_version: SUMMARY_SCHEMA_VERSION,
        generated_at: Utc::now(),
        files: vec![
            manifest_entry("spec_level_counts", &out_dir, &spec_level_path, spec_levels.len())?,
            manifest_entry(
                "spec_activity_counts",
                &out_dir,
                &spec_activity_path,
                spec_activities.len(),
            )?,
        ],
    };

    let manifest_path = out_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing summary manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(
        dir = %out_dir.display(),
        spec_level_rows = spec_levels.len(),
        spec_activity_rows = spec_activities.len(),
        "summary exported"
    );
    Ok(manifest)
}

fn write_parquet(path: &PathBuf, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_spec_level_parquet(path: &PathBuf, rows: &[SpecLevelCount]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("time_period", DataType::UInt32, false),
        ArrowField::new("role_spec_id", DataType::UInt32, false),
        ArrowField::new("difficulty_level", DataType::UInt32, false),
        ArrowField::new("run_count", DataType::UInt64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.period).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.spec_id).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.level).collect::<Vec<_>>())),
            Arc::new(UInt64Array::from(rows.iter().map(|r| r.run_count).collect::<Vec<_>>())),
        ],
    )
    .context("building spec_level_counts record batch")?;
    write_parquet(path, batch)
}

fn write_spec_activity_parquet(path: &PathBuf, rows: &[SpecActivityCount]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("time_period", DataType::UInt32, false),
        ArrowField::new("activity_id", DataType::UInt32, false),
        ArrowField::new("role_spec_id", DataType::UInt32, false),
        ArrowField::new("run_count", DataType::UInt64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.period).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.activity_id).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(rows.iter().map(|r| r.spec_id).collect::<Vec<_>>())),
            Arc::new(UInt64Array::from(rows.iter().map(|r| r.run_count).collect::<Vec<_>>())),
        ],
    )
    .context("building spec_activity_counts record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(
    name: &str,
    out_dir: &Path,
    path: &PathBuf,
    rows: usize,
) -> Result<SummaryManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path
        .strip_prefix(out_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SummaryManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    })
}
