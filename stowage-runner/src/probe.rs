//! Engine capability probe
//!
//! Detects the installed engine's version and whether it can create user
//! namespaces. Both answers come from throwaway engine invocations and are
//! memoized for the lifetime of the probe, so a single [`CapabilityProbe`]
//! shared behind an `Arc` runs each query at most once no matter how many
//! jobs ask concurrently.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;
use stowage_core::Result;
use stowage_core::domain::capability::{CapabilitySet, EngineVersion, NamespaceSupport};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{Engine, EngineCommand, ProbeOutput};

/// A stderr phrase proving the probe container started under `--userns`
///
/// The probe image ships without a shell, so the run always fails; failing
/// *inside* the container means the namespace was created.
#[derive(Debug, Clone, Copy)]
pub struct UsernsMarker {
    pub phrase: &'static str,
    /// Engine series that introduced the wording
    pub since: &'static str,
}

/// Known wordings, oldest first. Extend here when an engine release
/// rephrases its "no shell" error.
pub const USERNS_MARKERS: &[UsernsMarker] = &[
    UsernsMarker {
        phrase: "No valid /bin/sh",
        since: "2.x",
    },
    UsernsMarker {
        phrase: "/bin/sh doesn't exist in container",
        since: "3.0",
    },
    UsernsMarker {
        phrase: "executable file not found in",
        since: "3.1",
    },
];

/// Classifies the output of the user namespace probe
pub fn classify_userns_probe(output: &ProbeOutput) -> NamespaceSupport {
    if output.timed_out {
        return NamespaceSupport::Unknown;
    }
    match USERNS_MARKERS
        .iter()
        .find(|marker| output.stderr.contains(marker.phrase))
    {
        Some(marker) => {
            debug!(
                "user namespace probe matched '{}' (engine {})",
                marker.phrase, marker.since
            );
            NamespaceSupport::Supported
        }
        None => NamespaceSupport::Unsupported,
    }
}

/// Memoized engine version and isolation capabilities
pub struct CapabilityProbe {
    engine: Arc<dyn Engine>,
    probe_image: Option<PathBuf>,
    timeout: Duration,
    version: RwLock<Arc<OnceCell<EngineVersion>>>,
    user_namespace: RwLock<Arc<OnceCell<NamespaceSupport>>>,
}

impl CapabilityProbe {
    pub fn new(engine: Arc<dyn Engine>, probe_image: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            engine,
            probe_image,
            timeout,
            version: RwLock::default(),
            user_namespace: RwLock::default(),
        }
    }

    pub fn from_config(engine: Arc<dyn Engine>, config: &Config) -> Self {
        Self::new(engine, config.probe_image.clone(), config.probe_timeout)
    }

    /// Engine version, queried on first use
    pub fn version(&self) -> Result<EngineVersion> {
        current(&self.version)
            .get_or_try_init(|| {
                let output = self.engine.version_output()?;
                let version = EngineVersion::parse(&output)?;
                info!("{} version {}", self.engine.program(), version);
                Ok(version)
            })
            .cloned()
    }

    pub fn is_legacy_26(&self) -> Result<bool> {
        Ok(self.version()?.is_legacy_26())
    }

    pub fn is_v3_or_newer(&self) -> Result<bool> {
        Ok(self.version()?.is_v3_or_newer())
    }

    pub fn is_v31_or_newer(&self) -> Result<bool> {
        Ok(self.version()?.is_v31_or_newer())
    }

    /// User namespace support, probed on first use
    ///
    /// Never fails: a timeout, a missing probe image or a probe that cannot
    /// be spawned all yield [`NamespaceSupport::Unknown`].
    pub fn user_namespace(&self) -> NamespaceSupport {
        *current(&self.user_namespace).get_or_init(|| self.probe_user_namespace())
    }

    /// Version and namespace support together
    pub fn capabilities(&self) -> Result<CapabilitySet> {
        let version = self.version()?;
        Ok(CapabilitySet::new(version, self.user_namespace()))
    }

    /// Forgets memoized answers so the next call probes again
    ///
    /// Callers already inside a query finish against the old answers.
    pub fn reset(&self) {
        *self.version.write().unwrap_or_else(PoisonError::into_inner) = Arc::default();
        *self.user_namespace.write().unwrap_or_else(PoisonError::into_inner) = Arc::default();
    }

    fn probe_user_namespace(&self) -> NamespaceSupport {
        let Some(image) = &self.probe_image else {
            debug!("no probe image configured, user namespace support unknown");
            return NamespaceSupport::Unknown;
        };

        let command = EngineCommand::new([
            "exec".to_string(),
            "--userns".to_string(),
            image.display().to_string(),
            "true".to_string(),
        ]);

        let support = match self.engine.probe(&command, self.timeout) {
            Ok(output) => classify_userns_probe(&output),
            Err(e) => {
                warn!("user namespace probe failed to run: {}", e);
                NamespaceSupport::Unknown
            }
        };
        info!("user namespace support: {}", support);
        support
    }
}

/// The cell answers are currently memoized in
fn current<T>(slot: &RwLock<Arc<OnceCell<T>>>) -> Arc<OnceCell<T>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn probe_with(engine: Arc<FakeEngine>) -> CapabilityProbe {
        CapabilityProbe::new(
            engine,
            Some(PathBuf::from("/opt/stowage/hello.simg")),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_version_is_memoized() {
        let engine = Arc::new(FakeEngine::new("3.8.7-1.el8"));
        let probe = probe_with(engine.clone());

        assert_eq!(probe.version().unwrap(), EngineVersion::new(3, 8, 7));
        assert!(probe.is_v31_or_newer().unwrap());
        assert!(probe.is_v3_or_newer().unwrap());
        assert!(!probe.is_legacy_26().unwrap());
        assert_eq!(*engine.version_queries.lock().unwrap(), 1);
    }

    #[test]
    fn test_version_parse_failure_raises() {
        let mut engine = FakeEngine::new("");
        engine.version = "singularity version unknown".to_string();
        let probe = probe_with(Arc::new(engine));
        assert!(probe.version().is_err());
    }

    #[test]
    fn test_userns_probe_command_and_memo() {
        let engine = Arc::new(FakeEngine::new("3.5.0").with_probe_stderr(
            "FATAL: \"true\": executable file not found in $PATH",
        ));
        let probe = probe_with(engine.clone());

        assert_eq!(probe.user_namespace(), NamespaceSupport::Supported);
        assert_eq!(probe.user_namespace(), NamespaceSupport::Supported);
        assert_eq!(*engine.probes.lock().unwrap(), 1);
        assert_eq!(
            engine.recorded()[0].args,
            vec!["exec", "--userns", "/opt/stowage/hello.simg", "true"]
        );
    }

    #[test]
    fn test_userns_unsupported_and_timeout() {
        let engine = Arc::new(
            FakeEngine::new("3.5.0").with_probe_stderr("FATAL: user namespace not supported"),
        );
        assert_eq!(
            probe_with(engine).user_namespace(),
            NamespaceSupport::Unsupported
        );

        let mut engine = FakeEngine::new("3.5.0").with_probe_stderr("No valid /bin/sh");
        engine.probe_times_out = true;
        let probe = probe_with(Arc::new(engine));
        assert_eq!(probe.user_namespace(), NamespaceSupport::Unknown);
        assert!(!probe.capabilities().unwrap().supports_user_namespace());
    }

    #[test]
    fn test_missing_probe_image_skips_probe() {
        let engine = Arc::new(FakeEngine::new("3.5.0").with_probe_stderr("No valid /bin/sh"));
        let probe = CapabilityProbe::new(engine.clone(), None, Duration::from_secs(60));
        assert_eq!(probe.user_namespace(), NamespaceSupport::Unknown);
        assert_eq!(*engine.probes.lock().unwrap(), 0);
    }

    #[test]
    fn test_reset_forces_new_probe() {
        let engine = Arc::new(FakeEngine::new("2.6.1").with_probe_stderr("No valid /bin/sh"));
        let probe = Arc::new(probe_with(engine.clone()));
        let shared = probe.clone();

        probe.capabilities().unwrap();
        shared.reset();
        let caps = probe.capabilities().unwrap();

        assert!(caps.version.is_legacy_26());
        assert_eq!(*engine.version_queries.lock().unwrap(), 2);
        assert_eq!(*engine.probes.lock().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_callers_probe_once() {
        let engine = Arc::new(FakeEngine::new("3.5.0").with_probe_stderr("No valid /bin/sh"));
        let probe = Arc::new(probe_with(engine.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let probe = probe.clone();
                std::thread::spawn(move || probe.capabilities().unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().supports_user_namespace());
        }

        assert_eq!(*engine.version_queries.lock().unwrap(), 1);
        assert_eq!(*engine.probes.lock().unwrap(), 1);
    }
}
