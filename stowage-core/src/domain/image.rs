//! Image requirement domain types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Suffix of the legacy single-file image format
pub const LEGACY_SUFFIX: &str = ".img";

/// Suffix of the self-contained image format (engine 3.x and later)
pub const SELF_CONTAINED_SUFFIX: &str = ".sif";

/// Transport prepended to pull references that carry none
pub const DEFAULT_TRANSPORT: &str = "docker://";

/// Transport used when building from a saved image archive
pub const ARCHIVE_TRANSPORT: &str = "docker-archive://";

/// A container image requirement as declared by a job
///
/// Several fields may be set at once (a pull reference is usually
/// accompanied by the derived image id after resolution). The resolver
/// picks exactly one acquisition path and rewrites `image_id` in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequirement {
    /// Registry coordinate, e.g. `debian:stable` or `docker://debian:stable`
    #[serde(rename = "dockerPull", default, skip_serializing_if = "Option::is_none")]
    pub pull_reference: Option<String>,

    /// Local image filename or path
    #[serde(rename = "dockerImageId", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// Saved image archive to build from
    #[serde(rename = "dockerLoad", default, skip_serializing_if = "Option::is_none")]
    pub load_archive: Option<String>,

    /// Build recipe; never supported by this engine
    #[serde(rename = "dockerFile", default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    /// Import location; never supported by this engine
    #[serde(rename = "dockerImport", default, skip_serializing_if = "Option::is_none")]
    pub import_spec: Option<String>,
}

impl ImageRequirement {
    /// Requirement for a registry image
    pub fn pull(reference: impl Into<String>) -> Self {
        Self {
            pull_reference: Some(reference.into()),
            ..Default::default()
        }
    }

    /// Requirement for an image already present on disk
    pub fn local(image_id: impl Into<String>) -> Self {
        Self {
            image_id: Some(image_id.into()),
            ..Default::default()
        }
    }

    /// Requirement for an image built from a saved archive
    pub fn load(archive: impl Into<String>) -> Self {
        Self {
            load_archive: Some(archive.into()),
            ..Default::default()
        }
    }

    /// The identifier a user would recognise, used in error messages
    pub fn display_name(&self) -> String {
        self.image_id
            .as_deref()
            .or(self.pull_reference.as_deref())
            .or(self.load_archive.as_deref())
            .or(self.dockerfile.as_deref())
            .or(self.import_spec.as_deref())
            .unwrap_or("<unspecified>")
            .to_string()
    }

    /// Whether the pull reference already names a transport (`scheme://`)
    pub fn has_transport(reference: &str) -> bool {
        reference.contains("://")
    }
}

/// Image filename in the legacy format: path separators become underscores
pub fn legacy_image_name(reference: &str) -> String {
    format!("{}{}", reference.replace('/', "_"), LEGACY_SUFFIX)
}

/// Image filename in the self-contained format
pub fn self_contained_image_name(reference: &str) -> String {
    format!("{}{}", reference.replace('/', "_"), SELF_CONTAINED_SUFFIX)
}

/// On-disk image format, inferred from the filename suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Legacy,
    SelfContained,
    Unknown,
}

/// Absolute path to an image artifact the engine can execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    pub path: PathBuf,
}

impl ResolvedImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("img") => ImageFormat::Legacy,
            Some("sif") => ImageFormat::SelfContained,
            _ => ImageFormat::Unknown,
        }
    }
}
