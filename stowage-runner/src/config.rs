//! Driver configuration
//!
//! Defines every tunable of the driver: which engine binary to call, where
//! images are cached, where scratch copies go and how the capability probe
//! behaves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stowage_core::domain::mount::StagingPolicy;

/// Primary image cache directory
pub const CACHE_DIR_ENV: &str = "CWL_SINGULARITY_CACHE";

/// Pull folder honoured by the 2.6 engine series only
pub const PULL_FOLDER_ENV: &str = "SINGULARITY_PULLFOLDER";

/// File name of the probe image shipped with the driver
pub const PROBE_IMAGE_NAME: &str = "hello.simg";

/// Default hard limit for the user namespace probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Driver configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine executable, bare name or path
    pub engine: String,

    /// Directory images are cached in and pulled to
    pub cache_dir: Option<PathBuf>,

    /// Legacy pull folder, searched only by the 2.6 engine
    pub pull_folder: Option<PathBuf>,

    /// First directory searched for images; pulls land here without a cache
    pub search_root: PathBuf,

    /// Prefix for scratch directories holding staged copies
    pub scratch_prefix: PathBuf,

    /// Tiny known-good image used by the user namespace probe
    pub probe_image: Option<PathBuf>,

    /// Hard limit for the user namespace probe
    pub probe_timeout: Duration,

    /// Bind and mutate original host files instead of copies
    pub in_place_update: bool,
}

impl Config {
    /// Creates a new configuration with defaults
    ///
    /// # Arguments
    /// * `search_root` - Directory searched first for cached images
    pub fn new(search_root: impl Into<PathBuf>) -> Self {
        Self {
            engine: "singularity".to_string(),
            cache_dir: None,
            pull_folder: None,
            search_root: search_root.into(),
            scratch_prefix: std::env::temp_dir().join("stowage-"),
            probe_image: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            in_place_update: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised environment variables:
    /// - STOWAGE_ENGINE (optional, default: singularity)
    /// - CWL_SINGULARITY_CACHE (optional)
    /// - SINGULARITY_PULLFOLDER (optional, 2.6 engines only)
    /// - STOWAGE_SEARCH_ROOT (optional, default: current directory)
    /// - STOWAGE_TMPDIR_PREFIX (optional)
    /// - STOWAGE_PROBE_IMAGE (optional, default: the installed probe image)
    /// - STOWAGE_PROBE_TIMEOUT (optional, seconds, default: 60)
    /// - STOWAGE_INPLACE_UPDATE (optional, default: false)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let search_root = match get("STOWAGE_SEARCH_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir()
                .map_err(|e| anyhow::anyhow!("Failed to read current directory: {}", e))?,
        };

        let mut config = Self::new(search_root);

        if let Some(engine) = get("STOWAGE_ENGINE") {
            config.engine = engine;
        }
        config.cache_dir = get(CACHE_DIR_ENV).map(PathBuf::from);
        config.pull_folder = get(PULL_FOLDER_ENV).map(PathBuf::from);
        if let Some(prefix) = get("STOWAGE_TMPDIR_PREFIX") {
            config.scratch_prefix = PathBuf::from(prefix);
        }
        config.probe_image = get("STOWAGE_PROBE_IMAGE").map(PathBuf::from).or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| installed_probe_image(&exe))
        });

        if let Some(secs) = get("STOWAGE_PROBE_TIMEOUT") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("STOWAGE_PROBE_TIMEOUT must be a number of seconds"))?;
            config.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(flag) = get("STOWAGE_INPLACE_UPDATE") {
            config.in_place_update = parse_flag(&flag).ok_or_else(|| {
                anyhow::anyhow!("STOWAGE_INPLACE_UPDATE must be true or false, got '{}'", flag)
            })?;
        }

        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_scratch_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.scratch_prefix = prefix.into();
        self
    }

    pub fn with_in_place_update(mut self, enabled: bool) -> Self {
        self.in_place_update = enabled;
        self
    }

    /// Staging settings handed to the volume binder
    pub fn staging_policy(&self) -> StagingPolicy {
        StagingPolicy::new(&self.scratch_prefix).with_in_place_update(self.in_place_update)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.trim().is_empty() {
            anyhow::bail!("engine cannot be empty");
        }

        if self.scratch_prefix.file_name().is_none() {
            anyhow::bail!(
                "scratch prefix '{}' must end in a name component",
                self.scratch_prefix.display()
            );
        }

        if self.probe_timeout.is_zero() {
            anyhow::bail!("probe_timeout must be greater than 0");
        }

        if let Some(image) = &self.probe_image {
            if !image.is_file() {
                anyhow::bail!("probe image '{}' does not exist", image.display());
            }
        }

        Ok(())
    }

    /// Cache directory, falling back to the pull folder on 2.6 engines
    pub fn effective_cache_dir(&self, legacy_26: bool) -> Option<&Path> {
        match (&self.cache_dir, &self.pull_folder) {
            (Some(dir), _) => Some(dir),
            (None, Some(folder)) if legacy_26 => Some(folder),
            _ => None,
        }
    }
}

/// Probe image installed alongside `exe`
///
/// Looks next to the executable, then under `<prefix>/share/stowage` for an
/// executable in `<prefix>/bin`. Returns `None` when neither file exists.
pub fn installed_probe_image(exe: &Path) -> Option<PathBuf> {
    let bin_dir = exe.parent()?;
    let mut candidates = vec![bin_dir.join(PROBE_IMAGE_NAME)];
    if let Some(prefix) = bin_dir.parent() {
        candidates.push(prefix.join("share").join("stowage").join(PROBE_IMAGE_NAME));
    }
    candidates.into_iter().find(|path| path.is_file())
}

impl Default for Config {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
