//! Job preparation
//!
//! Ties the pieces together: checks the engine, detects capabilities,
//! resolves the image, stages mounts and assembles the final invocation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use stowage_core::domain::image::ResolvedImage;
use stowage_core::domain::invocation::RuntimeInvocation;
use stowage_core::domain::mount::MountSet;
use stowage_core::dto::job::{JobSpec, PreparedJob};
use stowage_core::{Result, StowageError};
use tracing::{info, instrument};

use crate::command::RuntimeCommandBuilder;
use crate::config::Config;
use crate::engine::{Engine, SystemEngine};
use crate::image::ImageResolver;
use crate::probe::CapabilityProbe;
use crate::volume::VolumeBinder;

/// Prepares container jobs against one engine
///
/// Cloning is cheap; clones share the engine and the memoized capability
/// probe.
#[derive(Clone)]
pub struct ContainerJob {
    config: Config,
    engine: Arc<dyn Engine>,
    probe: Arc<CapabilityProbe>,
}

impl ContainerJob {
    pub fn new(config: Config, engine: Arc<dyn Engine>) -> Self {
        let probe = Arc::new(CapabilityProbe::from_config(engine.clone(), &config));
        Self::with_probe(config, engine, probe)
    }

    /// Shares an existing probe, so its answers are reused
    pub fn with_probe(config: Config, engine: Arc<dyn Engine>, probe: Arc<CapabilityProbe>) -> Self {
        Self {
            config,
            engine,
            probe,
        }
    }

    /// Drives the installed engine binary named by the configuration
    pub fn from_config(config: Config) -> Self {
        let engine: Arc<dyn Engine> = Arc::new(SystemEngine::new(&config.engine));
        Self::new(config, engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }

    /// Image resolver sharing this job's engine and probe
    pub fn resolver(&self) -> ImageResolver {
        ImageResolver::new(self.engine.clone(), self.probe.clone(), self.config.clone())
    }

    /// Fails with [`StowageError::EngineNotAvailable`] when the engine
    /// binary cannot be launched
    pub fn ensure_available(&self) -> Result<()> {
        if self.engine.is_available() {
            Ok(())
        } else {
            Err(StowageError::EngineNotAvailable {
                program: self.engine.program().to_string(),
            })
        }
    }

    /// Prepares `spec` for launch
    ///
    /// On return `spec.requirement` carries the resolved image path,
    /// its mounts carry their staged host targets and its environment
    /// includes `TMPDIR` and `HOME`.
    #[instrument(skip(self, spec), fields(job_id = %spec.id))]
    pub fn prepare(&self, spec: &mut JobSpec) -> Result<PreparedJob> {
        self.ensure_available()?;

        let capabilities = self.probe.capabilities()?;
        info!(
            "engine {} version {}, user namespaces {}",
            self.engine.program(),
            capabilities.version,
            capabilities.user_namespace
        );

        let requested = spec.requirement.display_name();
        let found = self
            .resolver()
            .resolve(&mut spec.requirement, spec.allow_pull, spec.force_pull)?;
        let image = match spec.requirement.image_id.as_deref() {
            Some(path) if found => {
                let path = Path::new(path);
                ResolvedImage::new(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
            }
            _ => return Err(StowageError::ImageNotFound { image: requested }),
        };
        info!("using image {}", image.path().display());

        spec.environment.extend(spec.layout.required_env());

        let mut mounts = vec![MountSet::new(std::mem::take(&mut spec.mounts))];
        if let Some(generated) = spec.generated.take() {
            mounts.push(MountSet::generated(generated, spec.container_required));
        }

        let builder = RuntimeCommandBuilder::new(
            self.engine.program(),
            VolumeBinder::new(self.config.staging_policy()),
        );
        let mut launch_env = BTreeMap::new();
        let built = builder.build(
            &mut spec.environment,
            &capabilities,
            &mut mounts,
            &spec.layout,
            &spec.network,
            &mut launch_env,
        );

        let mut sets = mounts.into_iter();
        spec.mounts = sets.next().map(|set| set.entries).unwrap_or_default();
        spec.generated = sets.next().map(|set| set.entries);

        let (mut argv, _) = built?;
        argv.push(image.path().display().to_string());
        argv.extend(spec.command.iter().cloned());

        Ok(PreparedJob {
            job_id: spec.id,
            image,
            capabilities,
            invocation: RuntimeInvocation::new(argv, launch_env),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use std::fs;
    use stowage_core::domain::image::ImageRequirement;
    use stowage_core::domain::invocation::NetworkPolicy;
    use stowage_core::domain::mount::MountEntry;
    use stowage_core::dto::job::JobLayout;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        engine: Arc<FakeEngine>,
        job: ContainerJob,
    }

    fn fixture(engine: FakeEngine) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(root.path()).unwrap();
        fs::create_dir_all(base.join("work")).unwrap();

        let mut config =
            Config::new(base.join("work")).with_scratch_prefix(base.join("scratch/stowage-"));
        config.probe_image = Some(base.join("hello.simg"));
        let engine = Arc::new(engine);
        let job = ContainerJob::new(config, engine.clone());
        Fixture { root, engine, job }
    }

    fn spec(fx: &Fixture, requirement: ImageRequirement) -> JobSpec {
        let base = fs::canonicalize(fx.root.path()).unwrap();
        let layout = JobLayout::new(base.join("out"), base.join("tmp"), "/var/spool/out");
        fs::create_dir_all(&layout.host_outdir).unwrap();
        fs::create_dir_all(&layout.host_tmpdir).unwrap();

        let mut spec = JobSpec::new(requirement, layout);
        spec.command = vec!["echo".to_string(), "hello".to_string()];
        spec
    }

    #[test]
    fn test_prepare_pulls_and_appends_command() {
        let fx = fixture(FakeEngine::new("3.8.0").with_probe_stderr("No valid /bin/sh"));
        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));

        let prepared = fx.job.prepare(&mut spec).unwrap();
        let argv = &prepared.invocation.argv;

        assert_eq!(prepared.job_id, spec.id);
        assert_eq!(argv[0], "singularity");
        assert!(argv.contains(&"--userns".to_string()));
        assert!(prepared.image.path().ends_with("debian:stable.sif"));
        assert!(prepared.image.path().is_absolute());

        let n = argv.len();
        assert_eq!(argv[n - 3], prepared.image.path().display().to_string());
        assert_eq!(&argv[n - 2..], ["echo", "hello"]);

        assert_eq!(
            prepared.invocation.env.get("SINGULARITYENV_TMPDIR").map(String::as_str),
            Some("/tmp")
        );
        assert_eq!(spec.environment.get("HOME").map(String::as_str), Some("/var/spool/out"));
        assert_eq!(fx.engine.pulls(), 1);
    }

    #[test]
    fn test_required_env_overrides_caller() {
        let fx = fixture(FakeEngine::new("3.0.0"));
        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));
        spec.environment.insert("TMPDIR".to_string(), "/host/tmp".to_string());
        spec.environment.insert("HOME".to_string(), "/root".to_string());

        let prepared = fx.job.prepare(&mut spec).unwrap();
        let env = &prepared.invocation.env;

        assert_eq!(env.get("SINGULARITYENV_TMPDIR").map(String::as_str), Some("/tmp"));
        assert_eq!(env.get("SINGULARITYENV_HOME").map(String::as_str), Some("/var/spool/out"));
        assert!(prepared.invocation.argv.contains(&"--pid".to_string()));
    }

    #[test]
    fn test_engine_missing_fails_before_resolution() {
        let mut engine = FakeEngine::new("3.8.0");
        engine.available = false;
        let fx = fixture(engine);
        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));

        let err = fx.job.prepare(&mut spec).unwrap_err();
        assert!(matches!(err, StowageError::EngineNotAvailable { .. }));
        assert!(fx.engine.recorded().is_empty());
        assert_eq!(*fx.engine.version_queries.lock().unwrap(), 0);
    }

    #[test]
    fn test_ensure_available_leaves_engine_untouched() {
        let mut engine = FakeEngine::new("3.8.0");
        engine.available = false;
        let fx = fixture(engine);

        let err = fx.job.ensure_available().unwrap_err();
        assert!(err.to_string().contains("singularity"));
        assert_eq!(*fx.engine.version_queries.lock().unwrap(), 0);
        assert_eq!(*fx.engine.probes.lock().unwrap(), 0);

        let fx = fixture(FakeEngine::new("3.8.0"));
        assert!(fx.job.ensure_available().is_ok());
    }

    #[test]
    fn test_image_not_found_names_request() {
        let fx = fixture(FakeEngine::new("3.8.0"));
        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));
        spec.allow_pull = false;

        let err = fx.job.prepare(&mut spec).unwrap_err();
        assert!(err.is_image_not_found());
        assert!(err.to_string().contains("debian:stable"));
        assert!(!err.to_string().contains(".sif"));
    }

    #[test]
    fn test_custom_network_unsupported() {
        let fx = fixture(FakeEngine::new("3.8.0"));
        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));
        spec.network = NetworkPolicy::Custom("backend".to_string());

        let err = fx.job.prepare(&mut spec).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_mounts_staged_and_returned() {
        let fx = fixture(FakeEngine::new("3.8.0"));
        let data = fx.root.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("in.txt"), "input").unwrap();

        let mut spec = spec(&fx, ImageRequirement::pull("debian:stable"));
        spec.mounts = vec![
            MountEntry::file(data.join("in.txt"), "/inputs/in.txt"),
            MountEntry::file(data.join("in.txt"), "/var/spool/out/copy.txt"),
        ];
        spec.generated = Some(vec![MountEntry::literal_directory("/var/spool/out/results")]);

        let prepared = fx.job.prepare(&mut spec).unwrap();

        let bind = format!("{}:/inputs/in.txt:ro", data.join("in.txt").display());
        assert!(prepared.invocation.argv.contains(&bind));
        assert_eq!(
            spec.mounts[1].staged_host_target,
            Some(spec.layout.host_outdir.join("copy.txt"))
        );
        assert!(spec.layout.host_outdir.join("copy.txt").is_file());
        assert!(spec.layout.host_outdir.join("results").is_dir());
        assert_eq!(spec.generated.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_shared_probe_runs_once() {
        let fx = fixture(FakeEngine::new("3.8.0").with_probe_stderr("No valid /bin/sh"));
        let second = ContainerJob::with_probe(
            fx.job.config().clone(),
            fx.engine.clone(),
            fx.job.probe().clone(),
        );

        let mut a = spec(&fx, ImageRequirement::pull("debian:stable"));
        let mut b = spec(&fx, ImageRequirement::pull("debian:stable"));
        fx.job.prepare(&mut a).unwrap();
        second.prepare(&mut b).unwrap();

        assert_eq!(*fx.engine.version_queries.lock().unwrap(), 1);
        assert_eq!(*fx.engine.probes.lock().unwrap(), 1);
    }
}
