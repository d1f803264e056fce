//! Resolve command handler
//!
//! Resolves a single image requirement, given either as flags or as a JSON
//! document.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;
use std::path::PathBuf;
use stowage_core::domain::image::ImageRequirement;
use stowage_runner::{Config, ContainerJob};

/// Arguments of the resolve command
#[derive(Args, Debug, Default)]
pub struct ResolveArgs {
    /// Registry reference to pull, e.g. debian:stable
    #[arg(long)]
    pull: Option<String>,

    /// Local image filename or path
    #[arg(long)]
    image_id: Option<String>,

    /// Saved image archive to build from
    #[arg(long)]
    load: Option<String>,

    /// JSON requirement file ("-" for stdin)
    #[arg(long, conflicts_with_all = ["pull", "image_id", "load"])]
    requirement: Option<PathBuf>,

    /// Never pull or build
    #[arg(long)]
    no_pull: bool,

    /// Pull even when a cached image exists
    #[arg(long, conflicts_with = "no_pull")]
    force_pull: bool,

    /// Print the updated requirement as JSON
    #[arg(long)]
    json: bool,
}

/// Handle the resolve command
///
/// # Arguments
/// * `args` - Parsed command arguments
/// * `config` - The runner configuration
pub fn handle_resolve_command(args: ResolveArgs, config: &Config) -> Result<()> {
    let mut requirement = requirement_from_args(&args)?;
    let requested = requirement.display_name();

    let job = ContainerJob::from_config(config.clone());
    job.ensure_available()?;
    let found = job
        .resolver()
        .resolve(&mut requirement, !args.no_pull, args.force_pull)
        .with_context(|| format!("Failed to resolve image {}", requested))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&requirement)?);
    } else if found {
        println!(
            "{} {}",
            "✓".green(),
            requirement.image_id.as_deref().unwrap_or_default()
        );
    }

    if !found {
        bail!("Image {} not found", requested);
    }
    Ok(())
}

fn requirement_from_args(args: &ResolveArgs) -> Result<ImageRequirement> {
    if let Some(path) = &args.requirement {
        let text = super::read_input(path)?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Invalid requirement in {}", path.display()));
    }

    let requirement = ImageRequirement {
        pull_reference: args.pull.clone(),
        image_id: args.image_id.clone(),
        load_archive: args.load.clone(),
        ..Default::default()
    };
    if requirement == ImageRequirement::default() {
        bail!("One of --pull, --image-id, --load or --requirement is required");
    }
    Ok(requirement)
}
