use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::pipeline::CycleSummary;

/// Writes `cycle_summary.json` and `cycle_brief.md` under `<reports_dir>/<cycle_id>/`.
pub async fn write_cycle_report(reports_dir: &Path, summary: &CycleSummary) -> Result<PathBuf> {
    let dir = reports_dir.join(summary.cycle_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing cycle summary")?;
    fs::write(dir.join("cycle_summary.json"), json)
        .await
        .context("writing cycle_summary.json")?;

    fs::write(dir.join("cycle_brief.md"), cycle_brief_markdown(summary))
        .await
        .context("writing cycle_brief.md")?;

    Ok(dir)
}

pub fn cycle_brief_markdown(summary: &CycleSummary) -> String {
    let mut lines = vec![
        "# Key Run Ingest Brief".to_string(),
        String::new(),
        format!("- Cycle ID: `{}`", summary.cycle_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Fetched responses: {}", summary.total_fetched()),
        format!("- Parsed runs: {}", summary.total_parsed()),
        format!("- Novel runs: {}", summary.total_novel()),
        format!("- Inserted runs: {}", summary.total_inserted()),
        String::new(),
    ];

    for region in &summary.regions {
        let period = region
            .period
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        lines.push(format!("## {} (period {period}, {} clusters)", region.region, region.clusters));
        if let Some(reason) = &region.skipped {
            lines.push(format!("- skipped: {reason}"));
            lines.push(String::new());
            continue;
        }
        lines.push(
            "| activity | fetched | failed | parsed | malformed | novel | inserted |".to_string(),
        );
        lines.push("|---|---|---|---|---|---|---|".to_string());
        for step in &region.steps {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {}{} |",
                step.activity_id,
                step.fetched,
                step.fetch_failures,
                step.parsed,
                step.malformed,
                step.novel,
                step.inserted,
                if step.error.is_some() { " (error)" } else { "" }
            ));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}
