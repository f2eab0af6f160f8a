//! Document ingestion and context queries

use anyhow::{Context, Result, bail};
use clap::Args;
use mnemo_core::LearningCore;
use std::path::PathBuf;

use super::print_json;

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Document to read
    #[arg(conflicts_with = "text")]
    pub path: Option<PathBuf>,

    /// Inline document text
    #[arg(long)]
    pub text: Option<String>,

    /// Reference recorded as the source of every extracted item
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, default_value = "general")]
    pub domain: String,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    pub query: String,

    /// Maximum memories to return
    #[arg(long, default_value = "5")]
    pub memories: usize,

    /// Maximum knowledge items to return
    #[arg(long, default_value = "5")]
    pub knowledge: usize,
}

pub fn ingest(core: &LearningCore, args: IngestArgs) -> Result<()> {
    let (content, default_source) = match (&args.path, args.text) {
        (Some(path), _) => (
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
            path.display().to_string(),
        ),
        (None, Some(text)) => (text, "inline".to_string()),
        (None, None) => bail!("give a document path or --text"),
    };
    let source = args.source.unwrap_or(default_source);

    let outcome = core.ingest_document(&content, &source, &args.domain).context("Failed to ingest document")?;
    print_json(&outcome)
}

pub fn query(core: &LearningCore, args: QueryArgs) -> Result<()> {
    print_json(&core.query_context(&args.query, args.memories, args.knowledge))
}
