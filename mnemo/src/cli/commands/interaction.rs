//! Recording interactions, feedback and explicit preferences

use anyhow::{Context, Result};
use clap::Args;
use mnemo_core::LearningCore;
use mnemo_core::feedback::FeedbackKind;
use mnemo_core::preferences::PreferenceCategory;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::{parse_pair, parse_signal, print_json};

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// What the user asked
    #[arg(long)]
    pub prompt: String,

    /// What the assistant answered
    #[arg(long)]
    pub response: String,

    /// Context signal as key=value (repeatable), e.g. user_expertise=beginner
    #[arg(long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,
}

#[derive(Debug, Args)]
pub struct FeedbackArgs {
    /// Interaction the feedback refers to
    pub interaction_id: Uuid,

    /// positive, negative, correction, suggestion, error or safety
    pub kind: FeedbackKind,

    /// Free-text comment; for corrections, the corrected statement
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Debug, Args)]
pub struct PreferArgs {
    /// Preference category, e.g. tone or detail_level
    pub category: PreferenceCategory,

    pub value: String,
}

pub fn record(core: &LearningCore, args: RecordArgs) -> Result<()> {
    let context = args
        .context
        .iter()
        .map(|pair| parse_pair(pair).map(|(k, v)| (k, parse_signal(&v))))
        .collect::<Result<BTreeMap<_, _>>>()?;

    let id = core
        .record_interaction(&args.prompt, &args.response, context)
        .context("Failed to record interaction")?;
    info!("Recorded interaction {}", id);
    print_json(&json!({ "interaction_id": id }))
}

pub fn feedback(core: &LearningCore, args: FeedbackArgs) -> Result<()> {
    let outcome = core
        .submit_feedback(args.interaction_id, args.kind, args.comment)
        .with_context(|| format!("Failed to record feedback for {}", args.interaction_id))?;
    print_json(&outcome)
}

pub fn prefer(core: &LearningCore, args: PreferArgs) -> Result<()> {
    let preference = core.set_preference(args.category, &args.value).context("Failed to set preference")?;
    print_json(&preference)
}
