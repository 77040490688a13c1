//! Task dispatch backends.
//!
//! Every backend implements [`System`]: given a [`TaskSubmission`] it runs
//! the target once per task index and returns only after all instances
//! succeed or the first one fails. Backends differ only in where instances
//! run: in this process one after another ([`SerialSystem`]), as bounded
//! concurrent tokio tasks ([`LocalSystem`]), or as a batch-scheduler job
//! array ([`RemoteBatchSystem`]).

pub mod local;
pub mod remote;
pub mod serial;
pub mod task;
pub mod taskid;

#[cfg(test)]
mod tests;

pub use local::LocalSystem;
pub use remote::{RemoteBatchConfig, RemoteBatchSystem, SchedulerKind};
pub use serial::SerialSystem;
pub use task::{Kwargs, Task, TaskContext, TaskRegistry};
pub use taskid::{discover_task_index, task_index_from, TASKID_ENV};

use crate::config::Parameters;
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::subprocess::ProcessRunner;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which backend a [`System`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Serial,
    LocalParallel,
    RemoteBatch(SchedulerKind),
}

impl FromStr for SystemKind {
    type Err = TomoflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(SystemKind::Serial),
            "local" => Ok(SystemKind::LocalParallel),
            "slurm" => Ok(SystemKind::RemoteBatch(SchedulerKind::Slurm)),
            "pbs" => Ok(SystemKind::RemoteBatch(SchedulerKind::Pbs)),
            "lsf" => Ok(SystemKind::RemoteBatch(SchedulerKind::Lsf)),
            other => Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("unknown SYSTEM '{}'", other),
                Some("SYSTEM".to_string()),
            )),
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemKind::Serial => f.write_str("serial"),
            SystemKind::LocalParallel => f.write_str("local"),
            SystemKind::RemoteBatch(kind) => write!(f, "{}", kind),
        }
    }
}

/// One request to run a target across task indices
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    pub target: String,
    pub kwargs: Kwargs,
    pub fan_out: usize,
    pub single: bool,
    pub timeout: Option<Duration>,
}

impl TaskSubmission {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kwargs: Kwargs::new(),
            fan_out: 1,
            single: false,
            timeout: None,
        }
    }

    pub fn fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Run exactly one instance (index 0) whatever the fan-out
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    /// Number of instances that will actually run
    pub fn instances(&self) -> usize {
        if self.single {
            1
        } else {
            self.fan_out
        }
    }

    pub fn validate(&self, registry: &TaskRegistry) -> Result<Arc<dyn Task>> {
        if self.fan_out == 0 {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("task '{}' submitted with a fan-out of zero", self.target),
                Some("NTASK".to_string()),
            ));
        }
        registry.require(&self.target)
    }

    pub(crate) fn context(&self, index: usize) -> TaskContext {
        TaskContext {
            index,
            fan_out: self.instances(),
            kwargs: Arc::new(self.kwargs.clone()),
        }
    }
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub target: String,
    pub instances: usize,
    pub elapsed: Duration,
}

/// A task dispatch backend
#[async_trait]
pub trait System: Send + Sync {
    fn kind(&self) -> SystemKind;

    /// Run the submission; all instances succeed or the call fails
    async fn run(&self, submission: TaskSubmission) -> Result<DispatchReport>;
}

/// Everything needed to re-invoke this binary as a batch worker
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    pub workflow: String,
    pub program: PathBuf,
    pub parameter_file: PathBuf,
    pub workdir: PathBuf,
}

/// Build the backend selected by the SYSTEM parameter
pub fn build_system(
    params: &Parameters,
    registry: Arc<TaskRegistry>,
    runner: Arc<dyn ProcessRunner>,
    worker: WorkerInvocation,
) -> Result<Arc<dyn System>> {
    let kind: SystemKind = params.get_str("SYSTEM").unwrap_or("serial").parse()?;

    let system: Arc<dyn System> = match kind {
        SystemKind::Serial => Arc::new(SerialSystem::new(registry)),
        SystemKind::LocalParallel => {
            Arc::new(LocalSystem::new(registry, params.require_count("NTASKMAX")?))
        }
        SystemKind::RemoteBatch(scheduler) => {
            let config = RemoteBatchConfig::from_parameters(params, worker)?;
            Arc::new(RemoteBatchSystem::new(scheduler, registry, runner, config))
        }
    };

    tracing::debug!("Using {} task dispatch backend", kind);
    Ok(system)
}
