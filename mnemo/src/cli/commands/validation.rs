//! Human review of validation requests

use anyhow::{Context, Result};
use clap::Args;
use mnemo_core::LearningCore;
use mnemo_core::validation::Decision;
use tracing::info;
use uuid::Uuid;

use super::print_json;

#[derive(Debug, Args)]
pub struct ResolveArgs {
    pub id: Uuid,

    /// approve or reject
    pub decision: Decision,

    #[arg(long, default_value = "")]
    pub rationale: String,
}

pub fn pending(core: &LearningCore) -> Result<()> {
    let requests = core.list_pending_validations().context("Failed to list pending validations")?;
    info!("{} requests pending", requests.len());
    print_json(&requests)
}

pub fn resolve(core: &LearningCore, args: ResolveArgs) -> Result<()> {
    let request = core
        .resolve_validation(args.id, args.decision, &args.rationale)
        .with_context(|| format!("Failed to resolve validation request {}", args.id))?;
    print_json(&request)
}

/// Sweep expired requests until Ctrl-C
pub async fn watch(core: &LearningCore) -> Result<()> {
    let (handle, token) = core.spawn_expiry_sweeper().context("Failed to start expiry sweeper")?;
    info!("Watching validation requests; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    token.cancel();
    handle.await.context("Expiry sweeper panicked")?;
    Ok(())
}
