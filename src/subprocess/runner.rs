use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::error::ProcessError;
use super::groups::GroupGuard;

/// One invocation of an external program: a scheduler CLI or a collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Added to the inherited environment
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    /// Render the command line for log and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Last non-blank stderr line, usually the program's own error message
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    fn from_std(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }
        if let Some(code) = status.code() {
            return ExitStatus::Error(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(1)
    }
}

/// Runs external programs on behalf of collaborators and scheduler backends
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns real processes with tokio
///
/// Children run in their own process group and are killed when their
/// handle is dropped, which covers both a timeout and a cancelled dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let started = Instant::now();
        debug!("Executing: {}", command.display());
        if !command.env.is_empty() {
            trace!("Environment additions: {:?}", command.env);
        }
        if let Some(dir) = &command.working_dir {
            trace!("Working directory: {}", dir.display());
        }

        let child = Self::command(&command).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound(command.program.clone())
            } else {
                ProcessError::Io(e)
            }
        })?;

        // Dropped on timeout or cancellation, which kills the whole group
        let group = child.id().and_then(GroupGuard::track);

        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };
        if let Some(group) = group {
            group.release();
        }

        let result = ProcessOutput {
            status: ExitStatus::from_std(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };

        match result.status {
            ExitStatus::Success => debug!(
                "Finished in {:.2}s: {}",
                result.duration.as_secs_f64(),
                command.display()
            ),
            ExitStatus::Error(code) => debug!(
                "Exit code {} after {:.2}s: {} ({})",
                code,
                result.duration.as_secs_f64(),
                command.display(),
                result.stderr_tail().unwrap_or("no stderr")
            ),
            ExitStatus::Signal(signal) => warn!(
                "Killed by signal {} after {:.2}s: {}",
                signal,
                result.duration.as_secs_f64(),
                command.display()
            ),
        }

        Ok(result)
    }
}
