//! Recording engine used by the unit tests

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use stowage_core::{Result, StowageError};

use crate::engine::{Engine, EngineCommand, ProbeOutput};

/// Fake engine that records every command and materializes the image
/// files a real pull or build would have written
pub struct FakeEngine {
    pub version: String,
    pub available: bool,
    pub probe_stderr: String,
    pub probe_times_out: bool,
    pub fail_runs: bool,
    pub commands: Mutex<Vec<EngineCommand>>,
    pub version_queries: Mutex<usize>,
    pub probes: Mutex<usize>,
}

impl FakeEngine {
    pub fn new(version: &str) -> Self {
        Self {
            version: format!("singularity version {version}\n"),
            available: true,
            probe_stderr: String::new(),
            probe_times_out: false,
            fail_runs: false,
            commands: Mutex::new(Vec::new()),
            version_queries: Mutex::new(0),
            probes: Mutex::new(0),
        }
    }

    pub fn with_probe_stderr(mut self, stderr: &str) -> Self {
        self.probe_stderr = stderr.to_string();
        self
    }

    pub fn recorded(&self) -> Vec<EngineCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("pull"))
            .count()
    }

    fn output_path(command: &EngineCommand) -> Option<PathBuf> {
        let name = match command.args.first().map(String::as_str) {
            Some("pull") => {
                let idx = command.args.iter().position(|a| a == "--name")?;
                command.args.get(idx + 1)?.clone()
            }
            Some("build") => command.args.get(1)?.clone(),
            _ => return None,
        };

        let mut path = PathBuf::from(&name);
        if path.is_relative() {
            let base = command
                .env
                .get("SINGULARITY_PULLFOLDER")
                .map(PathBuf::from)
                .or_else(|| command.current_dir.clone())?;
            path = base.join(path);
        }
        Some(path)
    }
}

impl Engine for FakeEngine {
    fn program(&self) -> &str {
        "singularity"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn version_output(&self) -> Result<String> {
        *self.version_queries.lock().unwrap() += 1;
        Ok(self.version.clone())
    }

    fn run(&self, command: &EngineCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command.clone());
        if self.fail_runs {
            return Err(StowageError::EngineInvocation {
                command: command.render("singularity"),
                message: "exit status: 255".to_string(),
            });
        }
        if let Some(path) = Self::output_path(command) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, b"image").unwrap();
        }
        Ok(())
    }

    fn probe(&self, command: &EngineCommand, _timeout: Duration) -> Result<ProbeOutput> {
        *self.probes.lock().unwrap() += 1;
        self.commands.lock().unwrap().push(command.clone());
        Ok(ProbeOutput {
            stderr: self.probe_stderr.clone(),
            timed_out: self.probe_times_out,
        })
    }
}
