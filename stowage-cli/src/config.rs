//! Configuration module
//!
//! Layers command-line flags over the environment-derived runner
//! configuration.

use anyhow::{Context, Result};
use std::path::PathBuf;
use stowage_runner::Config;
use tracing::debug;

/// Values given on the command line; `None` keeps the environment's value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub engine: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub probe_image: Option<PathBuf>,
    pub in_place_update: bool,
}

/// Loads the runner configuration from the environment, then applies overrides
pub fn load_config(overrides: Overrides) -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;
    let config = apply(config, overrides);
    config.validate().context("Invalid configuration")?;

    debug!(
        "engine={}, cache_dir={:?}, search_root={}",
        config.engine,
        config.cache_dir,
        config.search_root.display()
    );
    Ok(config)
}

fn apply(mut config: Config, overrides: Overrides) -> Config {
    if let Some(engine) = overrides.engine {
        config.engine = engine;
    }
    if let Some(dir) = overrides.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(image) = overrides.probe_image {
        config.probe_image = Some(image);
    }
    if overrides.in_place_update {
        config = config.with_in_place_update(true);
    }
    config
}
