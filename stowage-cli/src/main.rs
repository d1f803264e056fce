//! Stowage CLI
//!
//! Command-line interface for probing the container engine, resolving
//! images and planning job invocations.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Singularity job preparation", long_about = None)]
struct Cli {
    /// Engine executable
    #[arg(long, env = "STOWAGE_ENGINE")]
    engine: Option<String>,

    /// Image cache directory
    #[arg(long, env = "CWL_SINGULARITY_CACHE")]
    cache_dir: Option<PathBuf>,

    /// Image used by the user namespace probe
    #[arg(long, env = "STOWAGE_PROBE_IMAGE")]
    probe_image: Option<PathBuf>,

    /// Bind and mutate original files instead of copies
    #[arg(long)]
    in_place_update: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stowage=info,stowage_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = config::load_config(Overrides {
        engine: cli.engine,
        cache_dir: cli.cache_dir,
        probe_image: cli.probe_image,
        in_place_update: cli.in_place_update,
    })?;

    handle_command(cli.command, &config)
}
