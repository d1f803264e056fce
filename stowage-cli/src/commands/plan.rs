//! Plan command handler
//!
//! Prepares a job described by a JSON job spec and prints the resulting
//! engine invocation without launching it.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::path::PathBuf;
use stowage_core::dto::job::JobSpec;
use stowage_runner::{Config, ContainerJob};

/// Arguments of the plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// JSON job spec file ("-" for stdin)
    spec: PathBuf,

    /// Print a shell command line instead of JSON
    #[arg(long)]
    shell: bool,
}

/// Handle the plan command
///
/// # Arguments
/// * `args` - Parsed command arguments
/// * `config` - The runner configuration
pub fn handle_plan_command(args: PlanArgs, config: &Config) -> Result<()> {
    let mut spec = parse_spec(&super::read_input(&args.spec)?)
        .with_context(|| format!("Invalid job spec in {}", args.spec.display()))?;

    let job = ContainerJob::from_config(config.clone());
    let prepared = job
        .prepare(&mut spec)
        .with_context(|| format!("Failed to prepare job {}", spec.id))?;

    if args.shell {
        eprintln!(
            "{}",
            format!("# job {} using {}", prepared.job_id, prepared.image.path().display()).dimmed()
        );
        println!("{}", prepared.invocation.shell_line());
    } else {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
    }

    Ok(())
}

fn parse_spec(text: &str) -> Result<JobSpec> {
    Ok(serde_json::from_str(text)?)
}
