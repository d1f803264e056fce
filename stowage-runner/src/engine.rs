//! Container engine process seam
//!
//! Every interaction with the engine binary goes through the [`Engine`]
//! trait: availability checks, the version query, the capability probe and
//! the pull/build commands. [`SystemEngine`] runs the real binary; tests
//! substitute a recording fake.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use stowage_core::{Result, StowageError};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Arguments, environment overrides and working directory for one engine call
///
/// The program itself is supplied by the [`Engine`] implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCommand {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Renders `program args...` for logs and error messages
    pub fn render(&self, program: &str) -> String {
        std::iter::once(program)
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a bounded probe invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub stderr: String,
    pub timed_out: bool,
}

/// Blocking access to the container engine binary
pub trait Engine: Send + Sync {
    /// Program name or path of the engine executable
    fn program(&self) -> &str;

    /// Whether the executable can be found on the search path
    fn is_available(&self) -> bool;

    /// Raw output of the version query
    fn version_output(&self) -> Result<String>;

    /// Runs a pull/build style command to completion
    ///
    /// Non-zero exit is an [`StowageError::EngineInvocation`]; nothing is retried.
    fn run(&self, command: &EngineCommand) -> Result<()>;

    /// Runs a throwaway command with a hard timeout, capturing stderr
    ///
    /// The exit status is irrelevant to probes, only stderr is inspected.
    fn probe(&self, command: &EngineCommand, timeout: Duration) -> Result<ProbeOutput>;
}

/// Engine backed by the installed executable
#[derive(Debug, Clone)]
pub struct SystemEngine {
    program: String,
}

impl SystemEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, command: &EngineCommand) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&command.args).envs(&command.env);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn invocation_error(&self, command: &EngineCommand, message: impl Into<String>) -> StowageError {
        StowageError::EngineInvocation {
            command: command.render(&self.program),
            message: message.into(),
        }
    }
}

impl Engine for SystemEngine {
    fn program(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        find_executable(&self.program).is_some()
    }

    fn version_output(&self) -> Result<String> {
        let query = EngineCommand::new(["--version"]);
        let output = self
            .command(&query)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.invocation_error(&query, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.invocation_error(
                &query,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("{} --version: {}", self.program, stdout.trim());
        Ok(stdout)
    }

    fn run(&self, command: &EngineCommand) -> Result<()> {
        info!("{}", command.render(&self.program));

        // The engine's progress output goes to our stderr so stdout stays clean
        let status = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(io::stderr())
            .status()
            .map_err(|e| self.invocation_error(command, e.to_string()))?;

        if !status.success() {
            return Err(self.invocation_error(command, status.to_string()));
        }
        Ok(())
    }

    fn probe(&self, command: &EngineCommand, timeout: Duration) -> Result<ProbeOutput> {
        debug!(
            timeout_secs = timeout.as_secs(),
            "probing: {}",
            command.render(&self.program)
        );

        let started = Instant::now();
        let mut cmd = self.command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group, so a timeout takes the container processes down too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| self.invocation_error(command, e.to_string()))?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.invocation_error(command, "stderr was not piped"))?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = tx.send(stderr.read_to_end(&mut buf).map(|_| buf));
        });

        let mut timed_out = false;
        let waited = child
            .wait_timeout(timeout)
            .map_err(|e| self.invocation_error(command, e.to_string()))?;
        if waited.is_none() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "probe timed out, killing: {}",
                command.render(&self.program)
            );
            timed_out = true;
            kill_process_group(&mut child);
            child
                .wait()
                .map_err(|e| self.invocation_error(command, e.to_string()))?;
        }

        // Stragglers may still hold the pipe open; never wait past the limit for them
        let remaining = timeout.saturating_sub(started.elapsed()) + READER_GRACE;
        let stderr = match rx.recv_timeout(remaining) {
            Ok(Ok(buf)) => String::from_utf8_lossy(&buf).to_string(),
            Ok(Err(e)) => return Err(self.invocation_error(command, e.to_string())),
            Err(_) => {
                warn!("probe stderr still open after the child exited, ignoring it");
                String::new()
            }
        };

        Ok(ProbeOutput { stderr, timed_out })
    }
}

/// How long to keep reading probe stderr once the limit has passed
const READER_GRACE: Duration = Duration::from_millis(500);

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    // The child leads its own group, so its pid is the group id
    let pgid = child.id() as libc::pid_t;
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Locates `program` the way a shell would: paths containing a separator
/// are taken as-is, bare names are searched in `PATH`
pub fn find_executable(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
