use anyhow::{Context, Result};
use clap::Parser;
use mnemo_core::{CoreConfig, LearningCore};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::commands::{adapt, interaction, knowledge, maintenance, validation};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = match &cli.config {
        Some(path) => CoreConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => CoreConfig::default(),
    };
    let core = LearningCore::open(&cli.data_dir, config)
        .with_context(|| format!("Failed to open learning core at {}", cli.data_dir.display()))?;
    for store in core.unavailable_stores() {
        warn!("Store '{}' is unavailable; commands that need it will fail", store);
    }

    debug!("Command: {:?}", cli.command);
    match cli.command {
        Commands::Record(args) => interaction::record(&core, args)?,
        Commands::Feedback(args) => interaction::feedback(&core, args)?,
        Commands::Prefer(args) => interaction::prefer(&core, args)?,
        Commands::Adapt(args) => adapt::adapt(&core, args)?,
        Commands::Promote(args) => adapt::promote(&core, args)?,
        Commands::Ingest(args) => knowledge::ingest(&core, args)?,
        Commands::Query(args) => knowledge::query(&core, args)?,
        Commands::Pending => validation::pending(&core)?,
        Commands::Resolve(args) => validation::resolve(&core, args)?,
        Commands::Watch => {
            // Create async runtime for the sweeper
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(validation::watch(&core))?;
        }
        Commands::Export(args) => maintenance::export(&core, args)?,
        Commands::Consolidate => maintenance::consolidate(&core)?,
        Commands::Stats => maintenance::stats(&core)?,
        Commands::Reset(args) => maintenance::reset(&core, args)?,
    }

    Ok(())
}
