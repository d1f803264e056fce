//! Job DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::capability::CapabilitySet;
use crate::domain::image::{ImageRequirement, ResolvedImage};
use crate::domain::invocation::{NetworkPolicy, RuntimeInvocation};
use crate::domain::mount::MountEntry;

/// Default temp directory inside the container
pub const CONTAINER_TMPDIR: &str = "/tmp";

fn default_container_tmpdir() -> String {
    CONTAINER_TMPDIR.to_string()
}

fn default_allow_pull() -> bool {
    true
}

/// Host and container directories owned by one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLayout {
    /// Host directory collecting the job's outputs
    pub host_outdir: PathBuf,

    /// Host scratch directory exposed as the container temp dir
    pub host_tmpdir: PathBuf,

    /// Output directory as seen inside the container
    pub container_outdir: String,

    #[serde(default = "default_container_tmpdir")]
    pub container_tmpdir: String,
}

impl JobLayout {
    pub fn new(
        host_outdir: impl Into<PathBuf>,
        host_tmpdir: impl Into<PathBuf>,
        container_outdir: impl Into<String>,
    ) -> Self {
        Self {
            host_outdir: host_outdir.into(),
            host_tmpdir: host_tmpdir.into(),
            container_outdir: container_outdir.into(),
            container_tmpdir: default_container_tmpdir(),
        }
    }

    /// Variables every container job must see
    pub fn required_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("TMPDIR".to_string(), self.container_tmpdir.clone()),
            ("HOME".to_string(), self.container_outdir.clone()),
        ])
    }
}

/// Everything the driver needs to prepare one container job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub requirement: ImageRequirement,

    /// The job declares the container requirement as mandatory
    #[serde(default)]
    pub container_required: bool,

    pub layout: JobLayout,

    /// Primary path mappings, in mapper order
    #[serde(default)]
    pub mounts: Vec<MountEntry>,

    /// Generated-file mappings, bound after the primary ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Vec<MountEntry>>,

    /// Job environment, propagated into the container
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Tool command line executed inside the container
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub network: NetworkPolicy,

    #[serde(default = "default_allow_pull")]
    pub allow_pull: bool,

    #[serde(default)]
    pub force_pull: bool,
}

impl JobSpec {
    pub fn new(requirement: ImageRequirement, layout: JobLayout) -> Self {
        Self {
            id: Uuid::new_v4(),
            requirement,
            container_required: false,
            layout,
            mounts: Vec::new(),
            generated: None,
            environment: BTreeMap::new(),
            command: Vec::new(),
            network: NetworkPolicy::Default,
            allow_pull: true,
            force_pull: false,
        }
    }
}

/// Result of preparing a job, handed to the process launcher unchanged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedJob {
    pub job_id: Uuid,
    pub image: ResolvedImage,
    pub capabilities: CapabilitySet,
    pub invocation: RuntimeInvocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_defaults() {
        let spec: JobSpec = serde_json::from_str(
            r#"{
                "requirement": {"dockerPull": "debian:stable"},
                "layout": {
                    "host_outdir": "/scratch/out",
                    "host_tmpdir": "/scratch/tmp",
                    "container_outdir": "/var/spool/out"
                }
            }"#,
        )
        .unwrap();

        assert!(spec.allow_pull);
        assert!(!spec.force_pull);
        assert!(spec.mounts.is_empty());
        assert_eq!(spec.network, NetworkPolicy::Default);
        assert_eq!(spec.layout.container_tmpdir, "/tmp");
    }

    #[test]
    fn test_required_env() {
        let layout = JobLayout::new("/scratch/out", "/scratch/tmp", "/var/spool/out");
        let env = layout.required_env();
        assert_eq!(env.get("HOME").map(String::as_str), Some("/var/spool/out"));
        assert_eq!(env.get("TMPDIR").map(String::as_str), Some("/tmp"));
    }
}
