//! Stowage Runner
//!
//! Prepares container jobs for a Singularity-compatible engine.
//!
//! This crate contains:
//! - Engine: process seam around the engine binary
//! - Probe: memoized version and user namespace detection
//! - Image: cache search, pulls and archive builds
//! - Volume: per-mount staging and bind directives
//! - Command: the final engine argument vector
//! - Job: the entry point tying everything together
//!
//! # Example
//!
//! ```no_run
//! use stowage_core::domain::image::ImageRequirement;
//! use stowage_core::dto::job::{JobLayout, JobSpec};
//! use stowage_runner::{Config, ContainerJob};
//!
//! fn main() -> anyhow::Result<()> {
//!     let job = ContainerJob::from_config(Config::from_env()?);
//!
//!     let layout = JobLayout::new("/scratch/out", "/scratch/tmp", "/var/spool/out");
//!     let mut spec = JobSpec::new(ImageRequirement::pull("debian:stable"), layout);
//!     spec.command = vec!["echo".to_string(), "hello".to_string()];
//!
//!     let prepared = job.prepare(&mut spec)?;
//!     println!("{}", prepared.invocation.shell_line());
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod image;
pub mod job;
pub mod probe;
pub mod staging;
pub mod volume;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use command::RuntimeCommandBuilder;
pub use config::Config;
pub use engine::{Engine, SystemEngine};
pub use image::ImageResolver;
pub use job::ContainerJob;
pub use probe::CapabilityProbe;
pub use volume::VolumeBinder;
