//! `keyrun.yaml`: which regions and activities a cycle covers.

use std::path::Path;

use anyhow::{bail, Context, Result};
use keyrun_core::{Activity, ActivityCatalog, Region};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRegistry {
    pub regions: Vec<Region>,
    pub activities: Vec<Activity>,
}

impl IngestRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading registry {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("loading registry {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut registry: IngestRegistry =
            serde_yaml::from_str(yaml).context("parsing registry yaml")?;
        let mut seen = Vec::with_capacity(registry.regions.len());
        registry.regions.retain(|r| {
            let fresh = !seen.contains(r);
            seen.push(*r);
            fresh
        });
        if registry.regions.is_empty() {
            bail!("registry lists no regions");
        }
        if registry.activities.is_empty() {
            bail!("registry lists no activities");
        }
        Ok(registry)
    }

    pub fn activity_catalog(&self) -> Result<ActivityCatalog> {
        ActivityCatalog::new(self.activities.iter().cloned()).context("building activity catalog")
    }

    pub fn activity_ids(&self) -> Vec<u32> {
        self.activities.iter().map(|a| a.id).collect()
    }
}
