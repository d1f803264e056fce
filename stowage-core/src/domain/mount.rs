//! Mount domain types
//!
//! A [`MountEntry`] is one (source, target, kind) record produced by the
//! path-mapping collaborator. The volume binder turns each entry into at
//! most one [`BindDirective`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the content of a mount comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSource {
    /// An existing host file or directory
    Concrete(PathBuf),

    /// A directory that does not exist yet and must be created empty
    Literal,

    /// A file whose contents are supplied inline
    Contents(String),
}

impl MountSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            MountSource::Concrete(path) => Some(path),
            _ => None,
        }
    }
}

/// Kind of filesystem object being mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountKind {
    File,
    Directory,
}

impl std::fmt::Display for MountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountKind::File => write!(f, "File"),
            MountKind::Directory => write!(f, "Directory"),
        }
    }
}

fn default_staged() -> bool {
    true
}

/// One host-to-container path mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub source: MountSource,

    /// Absolute path inside the container
    pub target: String,

    pub kind: MountKind,

    #[serde(default)]
    pub writable: bool,

    /// Entries that are not staged are skipped entirely
    #[serde(default = "default_staged")]
    pub staged: bool,

    /// Host path inside the job output directory the entry must be
    /// materialized at, because the engine cannot bind over it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_host_target: Option<PathBuf>,
}

impl MountEntry {
    pub fn new(source: MountSource, target: impl Into<String>, kind: MountKind) -> Self {
        Self {
            source,
            target: target.into(),
            kind,
            writable: false,
            staged: true,
            staged_host_target: None,
        }
    }

    pub fn file(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self::new(MountSource::Concrete(source.into()), target, MountKind::File)
    }

    pub fn directory(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self::new(
            MountSource::Concrete(source.into()),
            target,
            MountKind::Directory,
        )
    }

    /// A fresh empty directory; always writable
    pub fn literal_directory(target: impl Into<String>) -> Self {
        Self::new(MountSource::Literal, target, MountKind::Directory).writable()
    }

    /// A file created from inline contents
    pub fn contents(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(MountSource::Contents(text.into()), target, MountKind::File)
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn staged_at(mut self, host_target: impl Into<PathBuf>) -> Self {
        self.staged_host_target = Some(host_target.into());
        self
    }

    /// Host path this entry must be copied to instead of being bound
    ///
    /// An explicit `staged_host_target` always wins. Otherwise, an entry whose
    /// target lies strictly below the container output directory maps to the
    /// same relative path below the host output directory.
    pub fn host_outdir_target(&self, container_outdir: &str, host_outdir: &Path) -> Option<PathBuf> {
        if let Some(explicit) = &self.staged_host_target {
            return Some(explicit.clone());
        }

        let relative = Path::new(&self.target)
            .strip_prefix(container_outdir)
            .ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(host_outdir.join(relative))
    }
}

/// Ordered entries from one path mapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSet {
    pub entries: Vec<MountEntry>,

    /// Whether entries may target paths outside the container output directory
    #[serde(default = "default_staged")]
    pub any_path_okay: bool,
}

impl MountSet {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self {
            entries,
            any_path_okay: true,
        }
    }

    /// Generated-file mappings may only stray outside the output directory
    /// when the job declares a mandatory container requirement
    pub fn generated(entries: Vec<MountEntry>, container_required: bool) -> Self {
        Self {
            entries,
            any_path_okay: container_required,
        }
    }
}

/// Caller-level staging settings, handed once to the volume binder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingPolicy {
    /// Allow binding and mutating original host files instead of copies
    pub in_place_update: bool,

    /// Prefix for scratch directories holding copies
    pub scratch_prefix: PathBuf,
}

impl StagingPolicy {
    pub fn new(scratch_prefix: impl Into<PathBuf>) -> Self {
        Self {
            in_place_update: false,
            scratch_prefix: scratch_prefix.into(),
        }
    }

    pub fn with_in_place_update(mut self, enabled: bool) -> Self {
        self.in_place_update = enabled;
        self
    }
}

/// A single `--bind` argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindDirective {
    pub source: PathBuf,
    pub target: String,
    pub writable: bool,
}

impl BindDirective {
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: false,
        }
    }

    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: true,
        }
    }
}

impl std::fmt::Display for BindDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source.display(),
            self.target,
            if self.writable { "rw" } else { "ro" }
        )
    }
}
