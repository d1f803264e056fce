//! Probe command handler
//!
//! Reports what the installed engine can do.

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use stowage_core::domain::capability::CapabilitySet;
use stowage_runner::{Config, ContainerJob};

#[derive(Serialize)]
struct ProbeReport<'a> {
    engine: &'a str,
    #[serde(flatten)]
    capabilities: &'a CapabilitySet,
    legacy_26: bool,
    named_home: bool,
}

/// Handle the probe command
///
/// # Arguments
/// * `config` - The runner configuration
/// * `json` - Print JSON instead of text
pub fn handle_probe_command(config: &Config, json: bool) -> Result<()> {
    let job = ContainerJob::from_config(config.clone());
    job.ensure_available()?;
    let capabilities = job
        .probe()
        .capabilities()
        .with_context(|| format!("Failed to probe {}", config.engine))?;

    if json {
        let report = ProbeReport {
            engine: &config.engine,
            capabilities: &capabilities,
            legacy_26: capabilities.version.is_legacy_26(),
            named_home: capabilities.supports_named_home(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", format!("Engine: {}", config.engine).bold());
    println!("  {} {}", "Version:".bold(), capabilities.version);
    println!(
        "  {} {}",
        "User namespaces:".bold(),
        colorize(capabilities.supports_user_namespace(), &capabilities.user_namespace.to_string())
    );
    let home = if capabilities.supports_named_home() {
        "--home"
    } else {
        "output directory bind"
    };
    println!(
        "  {} {}",
        "Home:".bold(),
        colorize(capabilities.supports_named_home(), home)
    );
    if config.probe_image.is_none() {
        println!(
            "{}",
            "  No probe image installed or configured (STOWAGE_PROBE_IMAGE); namespace support not tested"
                .dimmed()
        );
    }

    Ok(())
}

fn colorize(ok: bool, text: &str) -> ColoredString {
    if ok { text.green() } else { text.yellow() }
}
