//! Error types for the stowage driver

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, StowageError>;

/// Errors that abort the setup of a container job
///
/// None of these are retried by the driver. Re-invoking the job is the
/// caller's only retry mechanism.
#[derive(Debug, Error)]
pub enum StowageError {
    /// The requested feature has no equivalent in the engine or its version
    #[error("Unsupported requirement: {0}")]
    UnsupportedRequirement(String),

    /// The engine executable is not on the search path
    #[error("{program} executable is not available")]
    EngineNotAvailable {
        /// Program name that was searched for
        program: String,
    },

    /// Resolution finished without locating or producing an image
    #[error("Container image {image} not found")]
    ImageNotFound {
        /// Identifier originally requested by the caller
        image: String,
    },

    /// An engine child process failed to spawn or exited non-zero
    #[error("Engine command `{command}` failed: {message}")]
    EngineInvocation {
        /// Rendered command line
        command: String,
        /// Exit status or spawn failure description
        message: String,
    },

    /// The engine version output could not be parsed
    #[error("Unable to parse engine version from {output:?}")]
    InvalidVersion {
        /// Raw output of the version query
        output: String,
    },

    /// Copy, link, mkdir, chmod or write failed while staging a mount
    #[error("Failed to {action} {}: {source}", path.display())]
    FilesystemStaging {
        /// What was being attempted (e.g. "copy", "hard link")
        action: &'static str,
        /// Path the action was applied to
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A mount entry cannot be honoured for this job
    #[error("Invalid mount: {0}")]
    InvalidMount(String),
}

impl StowageError {
    /// Create an unsupported requirement error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedRequirement(message.into())
    }

    /// Create a staging error for an I/O failure on `path`
    pub fn staging(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemStaging {
            action,
            path: path.into(),
            source,
        }
    }

    /// Check if this error reports an unsupported requirement
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedRequirement(_))
    }

    /// Check if this error reports a missing image
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }

    /// Check if this error came from the engine itself
    pub fn is_engine_error(&self) -> bool {
        matches!(
            self,
            Self::EngineNotAvailable { .. }
                | Self::EngineInvocation { .. }
                | Self::InvalidVersion { .. }
        )
    }
}
