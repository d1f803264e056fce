//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod plan;
mod probe;
mod resolve;

pub use plan::PlanArgs;
pub use resolve::ResolveArgs;

use anyhow::Result;
use clap::Subcommand;
use stowage_runner::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the engine version and detected capabilities
    Probe {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Find, pull or build an image
    Resolve(ResolveArgs),
    /// Prepare a job and print the engine invocation
    Plan(PlanArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The runner configuration
pub fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Probe { json } => probe::handle_probe_command(config, json),
        Commands::Resolve(args) => resolve::handle_resolve_command(args, config),
        Commands::Plan(args) => plan::handle_plan_command(args, config),
    }
}

/// Reads a file, or standard input when `path` is `-`
fn read_input(path: &std::path::Path) -> Result<String> {
    use anyhow::Context;
    use std::io::Read;

    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read standard input")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
