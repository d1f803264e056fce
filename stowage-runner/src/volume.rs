//! Volume binding
//!
//! Turns each path-mapping entry into at most one bind directive and at
//! most one filesystem action.
//!
//! The engine cannot bind a path onto a target that sits inside an
//! already-bound directory. Anything whose container target lies inside
//! the job output directory is therefore materialized by copying (or
//! linking) it into the host output directory instead of being bound.
//!
//! | source   | writable | staged into outdir            | not staged                              |
//! |----------|----------|-------------------------------|-----------------------------------------|
//! | concrete | no       | copy, mark read-only          | bind `ro`                               |
//! | file     | yes      | link (in-place) or copy, rw   | in-place: bind original `rw`; else copy to scratch, bind `rw` |
//! | dir      | yes      | copy tree, mark writable      | in-place: bind original `rw`; else copy to scratch, bind `rw` |
//! | literal  | any      | create empty dir              | writable: create in scratch, bind `rw`  |
//! | contents | any      | write file                    | write in scratch, bind                  |

use std::path::{Path, PathBuf};

use stowage_core::domain::mount::{
    BindDirective, MountEntry, MountKind, MountSet, MountSource, StagingPolicy,
};
use stowage_core::dto::job::JobLayout;
use stowage_core::{Result, StowageError};
use tracing::debug;

use crate::staging;

/// Applies one [`StagingPolicy`] to every mount of a job
#[derive(Debug, Clone)]
pub struct VolumeBinder {
    policy: StagingPolicy,
}

impl VolumeBinder {
    pub fn new(policy: StagingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StagingPolicy {
        &self.policy
    }

    /// Binds every staged entry of `set`, in order
    ///
    /// Fills in each entry's `staged_host_target` when its target falls
    /// inside the container output directory.
    pub fn bind_set(&self, set: &mut MountSet, layout: &JobLayout) -> Result<Vec<BindDirective>> {
        let mut directives = Vec::new();

        for entry in set.entries.iter_mut().filter(|entry| entry.staged) {
            let host_target =
                entry.host_outdir_target(&layout.container_outdir, &layout.host_outdir);

            if host_target.is_none() && !set.any_path_okay {
                return Err(StowageError::InvalidMount(format!(
                    "no mandatory container requirement, yet {} is outside the designated output directory {}",
                    entry.target, layout.container_outdir
                )));
            }

            entry.staged_host_target = host_target;
            if let Some(directive) = self.bind(entry)? {
                directives.push(directive);
            }
        }

        Ok(directives)
    }

    /// Chooses and executes the staging action for one entry
    pub fn bind(&self, entry: &MountEntry) -> Result<Option<BindDirective>> {
        let staged = entry.staged_host_target.as_deref();

        match &entry.source {
            MountSource::Contents(text) => self.bind_contents(entry, text, staged),
            MountSource::Literal => self.bind_literal(entry, staged),
            MountSource::Concrete(source) if !entry.writable => {
                self.bind_read_only(entry, source, staged)
            }
            MountSource::Concrete(source) => match entry.kind {
                MountKind::File => self.bind_writable_file(entry, source, staged),
                MountKind::Directory => self.bind_writable_directory(entry, source, staged),
            },
        }
    }

    fn bind_read_only(
        &self,
        entry: &MountEntry,
        source: &Path,
        staged: Option<&Path>,
    ) -> Result<Option<BindDirective>> {
        let Some(host_target) = staged else {
            return Ok(Some(BindDirective::read_only(source, &entry.target)));
        };

        debug!(
            "staging {} {} into output directory at {}",
            entry.kind,
            source.display(),
            host_target.display()
        );
        match entry.kind {
            MountKind::File => {
                staging::copy_file(source, host_target)?;
            }
            MountKind::Directory => staging::copy_tree(source, host_target)?,
        }
        staging::ensure_non_writable(host_target)?;
        Ok(None)
    }

    fn bind_writable_file(
        &self,
        entry: &MountEntry,
        source: &Path,
        staged: Option<&Path>,
    ) -> Result<Option<BindDirective>> {
        if let Some(host_target) = staged {
            if self.policy.in_place_update {
                staging::hard_link_or_copy(source, host_target)?;
            } else {
                staging::copy_file(source, host_target)?;
            }
            staging::ensure_writable(host_target)?;
            return Ok(None);
        }

        if self.policy.in_place_update {
            staging::ensure_writable(source)?;
            return Ok(Some(BindDirective::read_write(source, &entry.target)));
        }

        let copy = staging::create_scratch_dir(&self.policy.scratch_prefix)?
            .join(staging::file_name_of(source));
        staging::copy_file(source, &copy)?;
        staging::ensure_writable(&copy)?;
        debug!("bound writable copy {} of {}", copy.display(), source.display());
        Ok(Some(BindDirective::read_write(copy, &entry.target)))
    }

    fn bind_writable_directory(
        &self,
        entry: &MountEntry,
        source: &Path,
        staged: Option<&Path>,
    ) -> Result<Option<BindDirective>> {
        if let Some(host_target) = staged {
            staging::copy_tree(source, host_target)?;
            staging::ensure_writable(host_target)?;
            return Ok(None);
        }

        let bound = if self.policy.in_place_update {
            source.to_path_buf()
        } else {
            let copy = staging::create_scratch_dir(&self.policy.scratch_prefix)?
                .join(staging::file_name_of(source));
            staging::copy_tree(source, &copy)?;
            copy
        };
        staging::ensure_writable(&bound)?;
        Ok(Some(BindDirective::read_write(bound, &entry.target)))
    }

    fn bind_literal(
        &self,
        entry: &MountEntry,
        staged: Option<&Path>,
    ) -> Result<Option<BindDirective>> {
        if let Some(host_target) = staged {
            staging::create_empty_dir(host_target)?;
            if !entry.writable {
                staging::ensure_non_writable(host_target)?;
            }
            return Ok(None);
        }

        if !entry.writable {
            debug!("read-only literal {} has nothing to bind", entry.target);
            return Ok(None);
        }

        let dir = self.scratch_path_for(&entry.target)?;
        staging::create_empty_dir(&dir)?;
        Ok(Some(BindDirective::read_write(dir, &entry.target)))
    }

    fn bind_contents(
        &self,
        entry: &MountEntry,
        text: &str,
        staged: Option<&Path>,
    ) -> Result<Option<BindDirective>> {
        let path = match staged {
            Some(host_target) => host_target.to_path_buf(),
            None => self.scratch_path_for(&entry.target)?,
        };

        staging::write_file(&path, text)?;
        if entry.writable {
            staging::ensure_writable(&path)?;
        } else {
            staging::ensure_non_writable(&path)?;
        }

        if staged.is_some() {
            return Ok(None);
        }
        Ok(Some(BindDirective {
            source: path,
            target: entry.target.clone(),
            writable: entry.writable,
        }))
    }

    /// A not-yet-existing path in a fresh scratch directory, named after `target`
    fn scratch_path_for(&self, target: &str) -> Result<PathBuf> {
        let dir = staging::create_scratch_dir(&self.policy.scratch_prefix)?;
        Ok(dir.join(staging::file_name_of(Path::new(target))))
    }
}
