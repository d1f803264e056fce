//! Image resolution
//!
//! Locates the image a job asks for, pulling or building it when allowed,
//! and rewrites the requirement's `image_id` to the path of the artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_core::domain::capability::EngineVersion;
use stowage_core::domain::image::{
    ARCHIVE_TRANSPORT, DEFAULT_TRANSPORT, ImageRequirement, SELF_CONTAINED_SUFFIX,
    legacy_image_name, self_contained_image_name,
};
use stowage_core::{Result, StowageError};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{Config, PULL_FOLDER_ENV};
use crate::engine::{Engine, EngineCommand};
use crate::probe::CapabilityProbe;

/// Finds, pulls or builds job images
pub struct ImageResolver {
    engine: Arc<dyn Engine>,
    probe: Arc<CapabilityProbe>,
    config: Config,
}

impl ImageResolver {
    pub fn new(engine: Arc<dyn Engine>, probe: Arc<CapabilityProbe>, config: Config) -> Self {
        Self {
            engine,
            probe,
            config,
        }
    }

    /// Resolves `requirement` to a local image file
    ///
    /// Returns whether an image is available. On success `image_id` holds
    /// the path of an existing file; a bare pull reference is rewritten to
    /// carry the `docker://` transport.
    ///
    /// # Arguments
    /// * `requirement` - Image requirement, updated in place
    /// * `allow_pull` - Whether pulling or building is permitted
    /// * `force_pull` - Pull even when a cached copy was found
    pub fn resolve(
        &self,
        requirement: &mut ImageRequirement,
        allow_pull: bool,
        force_pull: bool,
    ) -> Result<bool> {
        let version = self.probe.version()?;
        let requested_id = requirement.image_id.clone();
        let mut found = false;
        let mut candidates = Vec::new();

        match (&requested_id, requirement.pull_reference.clone()) {
            (None, Some(reference)) => {
                let legacy = legacy_image_name(&reference);
                candidates.push(legacy.clone());
                let name = if version.is_v3_or_newer() {
                    let sif = self_contained_image_name(&reference);
                    candidates.push(sif.clone());
                    sif
                } else {
                    legacy
                };
                requirement.image_id = Some(name);
            }
            (Some(id), reference) => {
                if Path::new(id).is_file() {
                    found = true;
                }
                candidates.push(id.clone());
                candidates.push(legacy_image_name(id));
                if version.is_v3_or_newer() {
                    candidates.push(self_contained_image_name(id));
                    if let Some(reference) = reference {
                        candidates.push(self_contained_image_name(&reference));
                    }
                }
            }
            (None, None) => {}
        }

        if let Some(reference) = &requirement.pull_reference {
            if !ImageRequirement::has_transport(reference) {
                requirement.pull_reference = Some(format!("{DEFAULT_TRANSPORT}{reference}"));
            }
        }

        // Name a pull writes to, fixed before the search may replace image_id
        let pull_name = requirement.image_id.clone();

        if let Some(path) = self.search(&candidates, &version) {
            info!(
                "Using local copy of image found in {}",
                path.parent().unwrap_or(path.as_path()).display()
            );
            requirement.image_id = Some(path.display().to_string());
            found = true;
        }

        if (force_pull || !found) && allow_pull {
            self.acquire(requirement, pull_name, requested_id.as_deref(), &version)?;
            found = true;
        }

        let exists = requirement
            .image_id
            .as_deref()
            .is_some_and(|path| Path::new(path).is_file());
        Ok(found && exists)
    }

    /// Directories searched for cached images, in order
    fn search_roots(&self, version: &EngineVersion) -> Vec<&Path> {
        let mut roots = vec![self.config.search_root.as_path()];
        if let Some(cache) = &self.config.cache_dir {
            roots.push(cache);
        }
        if version.is_legacy_26() {
            if let Some(folder) = &self.config.pull_folder {
                roots.push(folder);
            }
        }
        roots
    }

    fn search(&self, candidates: &[String], version: &EngineVersion) -> Option<PathBuf> {
        if candidates.is_empty() {
            return None;
        }

        for root in self.search_roots(version) {
            debug!("searching {} for {:?}", root.display(), candidates);
            let hit = WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .find(|entry| {
                    let name = entry.file_name().to_string_lossy();
                    candidates.iter().any(|c| *c == name) && entry.path().is_file()
                });
            if let Some(entry) = hit {
                return Some(absolute(entry.path()));
            }
        }
        None
    }

    /// Pulls or builds the image, dispatching on the first acquisition
    /// method the requirement declares
    fn acquire(
        &self,
        requirement: &mut ImageRequirement,
        pull_name: Option<String>,
        requested_id: Option<&str>,
        version: &EngineVersion,
    ) -> Result<()> {
        if let Some(reference) = requirement.pull_reference.clone() {
            let name = pull_name.unwrap_or_else(|| self_contained_image_name(&reference));
            let output = self.pull(&name, &reference, version)?;
            requirement.image_id = Some(output.display().to_string());
            return Ok(());
        }

        if requirement.dockerfile.is_some() {
            return Err(StowageError::unsupported(format!(
                "dockerFile is not supported when using the {} runtime",
                self.engine.program()
            )));
        }

        if let Some(archive) = requirement.load_archive.clone() {
            if !version.is_v31_or_newer() {
                return Err(StowageError::unsupported(format!(
                    "dockerLoad is not supported when using the {} runtime below version 3.1 (found {})",
                    self.engine.program(),
                    version
                )));
            }
            let output = self.build_from_archive(&archive, requested_id)?;
            requirement.image_id = Some(output.display().to_string());
            return Ok(());
        }

        if requirement.import_spec.is_some() {
            return Err(StowageError::unsupported(format!(
                "dockerImport is not supported when using the {} runtime",
                self.engine.program()
            )));
        }

        Ok(())
    }

    fn pull(&self, name: &str, reference: &str, version: &EngineVersion) -> Result<PathBuf> {
        let legacy_26 = version.is_legacy_26();

        let (command, output) = match self.config.effective_cache_dir(legacy_26) {
            Some(cache) if legacy_26 => (
                EngineCommand::new(["pull", "--force", "--name", name, reference])
                    .env(PULL_FOLDER_ENV, cache.display().to_string()),
                cache.join(name),
            ),
            Some(cache) => {
                let output = cache.join(name);
                let target = output.display().to_string();
                (
                    EngineCommand::new(["pull", "--force", "--name", target.as_str(), reference]),
                    output,
                )
            }
            None => (
                EngineCommand::new(["pull", "--force", "--name", name, reference])
                    .current_dir(&self.config.search_root),
                self.config.search_root.join(name),
            ),
        };

        info!("{}", command.render(self.engine.program()));
        self.engine.run(&command)?;
        Ok(absolute(&output))
    }

    fn build_from_archive(&self, archive: &str, image_id: Option<&str>) -> Result<PathBuf> {
        let name = format!("{}{}", image_id.unwrap_or(archive), SELF_CONTAINED_SUFFIX);
        let source = format!("{ARCHIVE_TRANSPORT}{archive}");
        let command = EngineCommand::new(["build", name.as_str(), source.as_str()])
            .current_dir(&self.config.search_root);

        info!("{}", command.render(self.engine.program()));
        self.engine.run(&command)?;
        Ok(absolute(&self.config.search_root.join(name)))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
