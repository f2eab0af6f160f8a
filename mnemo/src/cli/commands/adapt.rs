//! Behavior adaptation commands

use anyhow::{Context, Result, bail};
use clap::Args;
use mnemo_core::LearningCore;
use serde_json::json;
use std::collections::BTreeMap;

use super::{parse_pair, print_json};

#[derive(Debug, Args)]
pub struct AdaptArgs {
    /// Behavior change as key=value (repeatable), e.g. detail_level=detailed
    #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
    pub changes: Vec<String>,

    /// Why the change is proposed
    #[arg(long, default_value = "manual adjustment")]
    pub reason: String,

    /// Always wait for a human decision, even for low-risk changes
    #[arg(long)]
    pub require_validation: bool,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    #[arg(long, default_value = "experiment promoted")]
    pub reason: String,

    /// Drop the experiment instead of promoting it
    #[arg(long)]
    pub discard: bool,
}

pub fn adapt(core: &LearningCore, args: AdaptArgs) -> Result<()> {
    let changes = args.changes.iter().map(String::as_str).map(parse_pair).collect::<Result<BTreeMap<_, _>>>()?;
    let outcome = core
        .propose_adaptation(&changes, &args.reason, args.require_validation)
        .context("Failed to propose adaptation")?;
    print_json(&outcome)
}

pub fn promote(core: &LearningCore, args: PromoteArgs) -> Result<()> {
    if args.discard {
        let discarded = core.discard_experiment().context("Failed to discard experiment")?;
        return print_json(&json!({ "discarded": discarded }));
    }
    if core.adaptation()?.shadow().is_none() {
        bail!("no experimental behavior to promote");
    }
    let outcome = core.promote_experiment(&args.reason).context("Failed to promote experiment")?;
    print_json(&outcome)
}
