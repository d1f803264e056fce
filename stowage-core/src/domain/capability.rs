//! Engine capability domain types
//!
//! The engine's CLI changes shape between releases, so every flag decision
//! is made against an [`EngineVersion`] and the probed [`NamespaceSupport`].

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StowageError};

/// Version of the installed container engine
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineVersion(pub Version);

impl EngineVersion {
    /// Creates a version from its numeric components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parses the output of the engine's version query
    ///
    /// Accepts `singularity version 3.8.7-1.el8`, `singularity-ce version 3.11.4`
    /// or a bare `3.5.3`. Only the leading `major.minor[.patch]` is kept;
    /// anything that does not start with at least `major.minor` is rejected.
    pub fn parse(output: &str) -> Result<Self> {
        let trimmed = output.trim();
        let text = match trimmed.rfind(" version ") {
            Some(idx) => &trimmed[idx + " version ".len()..],
            None => trimmed,
        };

        let numeric: String = text
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let invalid = || StowageError::InvalidVersion {
            output: output.to_string(),
        };

        let mut parts = numeric.split('.');
        let mut next_number = || -> Option<Option<u64>> {
            parts
                .next()
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<u64>().ok())
        };

        let major = next_number().flatten().ok_or_else(invalid)?;
        let minor = next_number().flatten().ok_or_else(invalid)?;
        let patch = match next_number() {
            Some(Some(patch)) => patch,
            Some(None) => return Err(invalid()),
            None => 0,
        };

        Ok(Self::new(major, minor, patch))
    }

    /// The 2.6 series, which redirects pulls through `SINGULARITY_PULLFOLDER`
    pub fn is_legacy_26(&self) -> bool {
        self.0.major == 2 && self.0.minor == 6
    }

    /// Major version 3 and later understand the self-contained image format
    pub fn is_v3_or_newer(&self) -> bool {
        self.0.major >= 3
    }

    /// 3.1 added `--home` binding and building from docker archives
    pub fn is_v31_or_newer(&self) -> bool {
        self.0.major >= 4 || (self.0.major == 3 && self.0.minor >= 1)
    }
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of the user namespace probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceSupport {
    /// The probe container started inside a user namespace
    Supported,

    /// The engine rejected the namespace request
    Unsupported,

    /// The probe timed out or could not run
    Unknown,
}

impl NamespaceSupport {
    /// Only a positive probe counts; `Unknown` is treated as unsupported
    pub fn is_supported(self) -> bool {
        matches!(self, NamespaceSupport::Supported)
    }
}

impl std::fmt::Display for NamespaceSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceSupport::Supported => write!(f, "supported"),
            NamespaceSupport::Unsupported => write!(f, "unsupported"),
            NamespaceSupport::Unknown => write!(f, "unknown"),
        }
    }
}

/// Everything the command builder needs to know about the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub version: EngineVersion,
    pub user_namespace: NamespaceSupport,
}

impl CapabilitySet {
    pub fn new(version: EngineVersion, user_namespace: NamespaceSupport) -> Self {
        Self {
            version,
            user_namespace,
        }
    }

    pub fn supports_user_namespace(&self) -> bool {
        self.user_namespace.is_supported()
    }

    /// Whether the engine accepts a dedicated `--home` binding
    pub fn supports_named_home(&self) -> bool {
        self.version.is_v31_or_newer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> EngineVersion {
        EngineVersion::parse(text).unwrap()
    }

    #[test]
    fn test_parse_product_prefixes() {
        assert_eq!(v("singularity version 3.8.7-1.el8\n"), EngineVersion::new(3, 8, 7));
        assert_eq!(v("singularity-ce version 3.11.4"), EngineVersion::new(3, 11, 4));
        assert_eq!(v("2.6.1-dist"), EngineVersion::new(2, 6, 1));
        assert_eq!(v("3.1"), EngineVersion::new(3, 1, 0));
    }

    #[test]
    fn test_parse_failures_raise() {
        for bad in ["", "singularity version ", "version unknown", "3", "3.x.1"] {
            let err = EngineVersion::parse(bad).unwrap_err();
            assert!(
                matches!(err, StowageError::InvalidVersion { .. }),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_version_gates() {
        assert!(v("4.0.0").is_v31_or_newer());
        assert!(v("3.1.2").is_v31_or_newer());
        assert!(!v("3.0.9").is_v31_or_newer());
        assert!(!v("2.6.1").is_v31_or_newer());

        assert!(v("3.0.9").is_v3_or_newer());
        assert!(!v("2.6.1").is_v3_or_newer());

        assert!(v("2.6.1").is_legacy_26());
        assert!(!v("2.5.2").is_legacy_26());
        assert!(!v("3.6.0").is_legacy_26());
    }

    #[test]
    fn test_unknown_namespace_is_unsupported() {
        let caps = CapabilitySet::new(v("3.5.0"), NamespaceSupport::Unknown);
        assert!(!caps.supports_user_namespace());
        assert!(caps.supports_named_home());

        let caps = CapabilitySet::new(v("3.0.0"), NamespaceSupport::Supported);
        assert!(caps.supports_user_namespace());
        assert!(!caps.supports_named_home());
    }
}
