use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{adapt, interaction, knowledge, maintenance, validation};

#[derive(Parser, Debug)]
#[command(
    name = "mnemo",
    version,
    about = "Mnemo - an adaptive learning core for assistants",
    long_about = "Mnemo remembers interactions, learns preferences and knowledge, mines feedback for recurring problems, and adapts assistant behavior behind a human validation gate."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the learning stores
    #[arg(long, global = true, default_value = ".mnemo")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a prompt/response exchange
    #[command(about = "Record an interaction and learn from it")]
    Record(interaction::RecordArgs),

    /// Give feedback on a recorded interaction
    #[command(about = "Submit feedback on an earlier interaction")]
    Feedback(interaction::FeedbackArgs),

    /// State a preference outright
    #[command(about = "Set an explicit user preference")]
    Prefer(interaction::PreferArgs),

    /// Propose behavior changes
    #[command(about = "Propose behavior adaptations through the validation gate")]
    Adapt(adapt::AdaptArgs),

    /// Promote or discard the experimental behavior
    #[command(about = "Promote (or discard) the experimental shadow behavior")]
    Promote(adapt::PromoteArgs),

    /// Ingest a document into the knowledge graph
    #[command(about = "Extract knowledge from a document")]
    Ingest(knowledge::IngestArgs),

    /// Query fused context
    #[command(about = "Retrieve memories, knowledge, preferences and behavior for a query")]
    Query(knowledge::QueryArgs),

    /// List pending validation requests
    #[command(about = "List validation requests awaiting a decision")]
    Pending,

    /// Approve or reject a validation request
    #[command(about = "Resolve a pending validation request")]
    Resolve(validation::ResolveArgs),

    /// Run the expiry sweeper in the foreground
    #[command(about = "Expire overdue validation requests until interrupted")]
    Watch,

    /// Export every store to a directory
    #[command(about = "Export a snapshot of all learned state")]
    Export(maintenance::ExportArgs),

    /// Prune low-value memories
    #[command(about = "Consolidate memory")]
    Consolidate,

    /// Show store statistics
    #[command(about = "Show statistics for every store")]
    Stats,

    /// Erase all learned state
    #[command(about = "Reset the learning core to its defaults")]
    Reset(maintenance::ResetArgs),
}
