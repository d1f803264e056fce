//! Runtime command assembly
//!
//! Produces the engine argument vector for one job: isolation flags, home
//! and scratch binds, the staged mounts, working directory and network
//! flags. Job environment variables travel through the launcher's
//! environment under [`ENV_PREFIX`] since the container starts with a
//! clean environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use stowage_core::domain::capability::CapabilitySet;
use stowage_core::domain::invocation::NetworkPolicy;
use stowage_core::domain::mount::MountSet;
use stowage_core::dto::job::JobLayout;
use stowage_core::{Result, StowageError};
use tracing::debug;

use crate::volume::VolumeBinder;

/// Prefix the engine strips when forwarding variables into the container
pub const ENV_PREFIX: &str = "SINGULARITYENV_";

/// Builds engine command lines
#[derive(Debug, Clone)]
pub struct RuntimeCommandBuilder {
    program: String,
    binder: VolumeBinder,
}

impl RuntimeCommandBuilder {
    pub fn new(program: impl Into<String>, binder: VolumeBinder) -> Self {
        Self {
            program: program.into(),
            binder,
        }
    }

    /// Builds the argument vector, staging mounts as a side effect
    ///
    /// `environment` loses its `HOME` entry while the command is assembled
    /// on engines that take the home directory as a flag; the entry is back
    /// in place when this returns, whether or not building succeeded. The
    /// second element of the result is reserved and always `None`.
    ///
    /// # Arguments
    /// * `environment` - Job environment forwarded into the container
    /// * `capabilities` - Detected engine capabilities
    /// * `mounts` - Primary mappings followed by generated mappings
    /// * `layout` - Host and container directories of the job
    /// * `network` - Requested network policy
    /// * `launch_env` - Receives the prefixed variables for the launcher
    pub fn build(
        &self,
        environment: &mut BTreeMap<String, String>,
        capabilities: &CapabilitySet,
        mounts: &mut [MountSet],
        layout: &JobLayout,
        network: &NetworkPolicy,
        launch_env: &mut BTreeMap<String, String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        if let NetworkPolicy::Custom(name) = network {
            return Err(StowageError::unsupported(format!(
                "the {} runtime does not support custom networking (requested '{}')",
                self.program, name
            )));
        }

        let named_home = capabilities.supports_named_home();
        let home = if named_home {
            Some(
                environment
                    .remove("HOME")
                    .unwrap_or_else(|| layout.container_outdir.clone()),
            )
        } else {
            None
        };

        let result = self.assemble(environment, capabilities, mounts, layout, network, home.as_deref());

        if let Some(home) = home {
            environment.insert("HOME".to_string(), home);
        }

        let argv = result?;
        for (name, value) in environment.iter() {
            if named_home && name == "HOME" {
                continue;
            }
            launch_env.insert(format!("{ENV_PREFIX}{name}"), value.clone());
        }
        Ok((argv, None))
    }

    fn assemble(
        &self,
        environment: &BTreeMap<String, String>,
        capabilities: &CapabilitySet,
        mounts: &mut [MountSet],
        layout: &JobLayout,
        network: &NetworkPolicy,
        home: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut argv: Vec<String> = [
            self.program.as_str(),
            "--quiet",
            "exec",
            "--contain",
            "--ipc",
            "--cleanenv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if capabilities.supports_user_namespace() {
            argv.push("--userns".to_string());
        } else {
            argv.push("--pid".to_string());
        }

        let outdir = realpath(&layout.host_outdir);
        match home {
            Some(home) => {
                argv.push("--home".to_string());
                argv.push(format!("{}:{}", outdir.display(), home));
            }
            None => {
                argv.push("--bind".to_string());
                argv.push(format!("{}:{}:rw", outdir.display(), layout.container_outdir));
            }
        }

        argv.push("--bind".to_string());
        argv.push(format!(
            "{}:{}:rw",
            realpath(&layout.host_tmpdir).display(),
            layout.container_tmpdir
        ));

        for set in mounts.iter_mut() {
            for directive in self.binder.bind_set(set, layout)? {
                argv.push("--bind".to_string());
                argv.push(directive.to_string());
            }
        }

        argv.push("--pwd".to_string());
        argv.push(layout.container_outdir.clone());

        if *network == NetworkPolicy::Disabled {
            argv.push("--net".to_string());
        }

        debug!(
            "assembled {} arguments, {} environment variables",
            argv.len(),
            environment.len()
        );
        Ok(argv)
    }
}

/// Canonical form of `path`, or `path` itself when it cannot be resolved
fn realpath(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::domain::capability::{EngineVersion, NamespaceSupport};
    use stowage_core::domain::mount::{MountEntry, StagingPolicy};
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        layout: JobLayout,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let root_path = fs::canonicalize(root.path()).unwrap();
            let layout = JobLayout::new(root_path.join("out"), root_path.join("tmp"), "/var/spool/out");
            fs::create_dir_all(&layout.host_outdir).unwrap();
            fs::create_dir_all(&layout.host_tmpdir).unwrap();
            Self { root, layout }
        }

        fn builder(&self) -> RuntimeCommandBuilder {
            RuntimeCommandBuilder::new(
                "singularity",
                VolumeBinder::new(StagingPolicy::new(self.root.path().join("scratch-"))),
            )
        }

        fn environment(&self) -> BTreeMap<String, String> {
            let mut env = self.layout.required_env();
            env.insert("LANG".to_string(), "C".to_string());
            env
        }
    }

    fn caps(version: &str, userns: NamespaceSupport) -> CapabilitySet {
        let version = EngineVersion::parse(&format!("singularity version {version}")).unwrap();
        CapabilitySet::new(version, userns)
    }

    #[test]
    fn test_modern_engine_arguments() {
        let fx = Fixture::new();
        let mut environment = fx.environment();
        let mut launch_env = BTreeMap::new();

        let (argv, reserved) = fx
            .builder()
            .build(
                &mut environment,
                &caps("3.8.0", NamespaceSupport::Supported),
                &mut [],
                &fx.layout,
                &NetworkPolicy::Disabled,
                &mut launch_env,
            )
            .unwrap();

        let outdir = fx.layout.host_outdir.display();
        let tmpdir = fx.layout.host_tmpdir.display();
        assert_eq!(
            argv,
            vec![
                "singularity".to_string(),
                "--quiet".to_string(),
                "exec".to_string(),
                "--contain".to_string(),
                "--ipc".to_string(),
                "--cleanenv".to_string(),
                "--userns".to_string(),
                "--home".to_string(),
                format!("{outdir}:/var/spool/out"),
                "--bind".to_string(),
                format!("{tmpdir}:/tmp:rw"),
                "--pwd".to_string(),
                "/var/spool/out".to_string(),
                "--net".to_string(),
            ]
        );
        assert!(reserved.is_none());

        // HOME travels through --home, and is restored for the caller
        assert_eq!(environment.get("HOME").map(String::as_str), Some("/var/spool/out"));
        assert!(!launch_env.contains_key("SINGULARITYENV_HOME"));
        assert_eq!(launch_env.get("SINGULARITYENV_TMPDIR").map(String::as_str), Some("/tmp"));
        assert_eq!(launch_env.get("SINGULARITYENV_LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_pre_31_engine_binds_outdir() {
        let fx = Fixture::new();
        let mut environment = fx.environment();
        let mut launch_env = BTreeMap::new();

        let (argv, _) = fx
            .builder()
            .build(
                &mut environment,
                &caps("3.0.3", NamespaceSupport::Unknown),
                &mut [],
                &fx.layout,
                &NetworkPolicy::Default,
                &mut launch_env,
            )
            .unwrap();

        assert!(argv.contains(&"--pid".to_string()));
        assert!(!argv.contains(&"--home".to_string()));
        assert!(!argv.contains(&"--net".to_string()));
        assert!(argv.contains(&format!("{}:/var/spool/out:rw", fx.layout.host_outdir.display())));
        assert_eq!(
            launch_env.get("SINGULARITYENV_HOME").map(String::as_str),
            Some("/var/spool/out")
        );
    }

    #[test]
    fn test_mounts_follow_scratch_bind_in_order() {
        let fx = Fixture::new();
        let data = fx.root.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("a.txt"), "a").unwrap();
        fs::write(data.join("b.txt"), "b").unwrap();

        let mut mounts = vec![
            MountSet::new(vec![MountEntry::file(data.join("a.txt"), "/inputs/a.txt")]),
            MountSet::generated(vec![MountEntry::file(data.join("b.txt"), "/inputs/b.txt")], true),
        ];
        let (argv, _) = fx
            .builder()
            .build(
                &mut fx.environment(),
                &caps("3.8.0", NamespaceSupport::Unsupported),
                &mut mounts,
                &fx.layout,
                &NetworkPolicy::Default,
                &mut BTreeMap::new(),
            )
            .unwrap();

        let a = format!("{}:/inputs/a.txt:ro", data.join("a.txt").display());
        let b = format!("{}:/inputs/b.txt:ro", data.join("b.txt").display());
        let pos = |arg: &str| argv.iter().position(|x| x == arg).unwrap();

        assert!(pos(&format!("{}:/tmp:rw", fx.layout.host_tmpdir.display())) < pos(&a));
        assert!(pos(&a) < pos(&b));
        assert!(pos(&b) < pos("--pwd"));
    }

    #[test]
    fn test_custom_network_rejected_before_staging() {
        let fx = Fixture::new();
        let data = fx.root.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("a.txt"), "a").unwrap();
        let staged = fx.layout.host_outdir.join("a.txt");

        let mut mounts = vec![MountSet::new(vec![MountEntry::file(
            data.join("a.txt"),
            "/var/spool/out/a.txt",
        )])];
        let mut launch_env = BTreeMap::new();
        let err = fx
            .builder()
            .build(
                &mut fx.environment(),
                &caps("3.8.0", NamespaceSupport::Supported),
                &mut mounts,
                &fx.layout,
                &NetworkPolicy::Custom("backend".to_string()),
                &mut launch_env,
            )
            .unwrap_err();

        assert!(err.is_unsupported());
        assert!(!staged.exists());
        assert!(launch_env.is_empty());
    }

    #[test]
    fn test_home_restored_after_staging_failure() {
        let fx = Fixture::new();
        let mut environment = fx.environment();
        let mut mounts = vec![MountSet::new(vec![
            MountEntry::file(fx.root.path().join("missing.txt"), "/work/missing.txt").writable(),
        ])];

        let err = fx
            .builder()
            .build(
                &mut environment,
                &caps("3.8.0", NamespaceSupport::Supported),
                &mut mounts,
                &fx.layout,
                &NetworkPolicy::Default,
                &mut BTreeMap::new(),
            )
            .unwrap_err();

        assert!(matches!(err, StowageError::FilesystemStaging { .. }));
        assert_eq!(environment.get("HOME").map(String::as_str), Some("/var/spool/out"));
    }
}
