//! Export, consolidation, statistics and reset

use anyhow::{Context, Result, bail};
use clap::Args;
use mnemo_core::{LearningCore, ResetConfirmation};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

use super::print_json;

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Directory the snapshot is written to
    pub target: PathBuf,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Confirm that all learned state and history should be erased
    #[arg(long)]
    pub yes: bool,
}

pub fn export(core: &LearningCore, args: ExportArgs) -> Result<()> {
    let manifest = core
        .export_snapshot(&args.target)
        .with_context(|| format!("Failed to export to {}", args.target.display()))?;
    print_json(&manifest)
}

pub fn consolidate(core: &LearningCore) -> Result<()> {
    let removed = core.consolidate().context("Failed to consolidate memory")?;
    print_json(&json!({ "removed": removed }))
}

pub fn stats(core: &LearningCore) -> Result<()> {
    print_json(&core.stats())
}

pub fn reset(core: &LearningCore, args: ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("reset erases all learned state; pass --yes to confirm");
    }
    warn!("Erasing learned state in {}", core.data_dir().display());
    core.reset_to_default(ResetConfirmation::confirmed()).context("Failed to reset")?;
    print_json(&json!({ "reset": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::CoreConfig;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open_core(dir: &TempDir) -> LearningCore {
        LearningCore::open(dir.path().join("data"), CoreConfig::default()).unwrap()
    }

    #[test]
    fn test_reset_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir);
        core.record_interaction("q", "a", BTreeMap::new()).unwrap();

        let err = reset(&core, ResetArgs { yes: false }).unwrap_err();
        assert!(err.to_string().contains("--yes"));
        assert_eq!(core.memory().unwrap().len(), 1);

        reset(&core, ResetArgs { yes: true }).unwrap();
        assert!(core.memory().unwrap().is_empty());
    }

    #[test]
    fn test_export_writes_into_target() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir);
        core.record_interaction("q", "a", BTreeMap::new()).unwrap();

        let target = dir.path().join("snapshot");
        export(&core, ExportArgs { target: target.clone() }).unwrap();
        assert!(target.join("manifest.json").exists());
        assert!(target.join("memories.json").exists());
    }
}
