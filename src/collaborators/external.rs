use crate::config::Parameters;
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};
use crate::system::{Kwargs, TASKID_ENV};
use anyhow::Context;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Prefix of the variables carrying task arguments to external programs
pub const ARG_ENV_PREFIX: &str = "TOMOFLOW_ARG_";

/// A collaborator implemented by an external program
///
/// Each call runs `<command...> <action>` in `<SCRATCH>/<component>/<task:03>`
/// with the task index in `TOMOFLOW_TASKID` and every argument in
/// `TOMOFLOW_ARG_<KEY>`.
#[derive(Clone)]
pub struct ExternalProgram {
    component: &'static str,
    command: Vec<String>,
    scratch: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for ExternalProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalProgram")
            .field("component", &self.component)
            .field("command", &self.command)
            .field("scratch", &self.scratch)
            .finish()
    }
}

impl ExternalProgram {
    pub fn new(
        component: &'static str,
        command: Vec<String>,
        scratch: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(TomoflowError::configuration(format!(
                "no program configured for the {}",
                component
            )));
        }
        Ok(Self {
            component,
            command,
            scratch: scratch.into(),
            runner,
        })
    }

    /// Program named by a string parameter such as SOLVER_BIN
    pub fn from_parameter(
        params: &Parameters,
        key: &str,
        component: &'static str,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let raw = params.require_str(key)?;
        let command = shell_words::split(raw).map_err(|e| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("{} is not a valid command line: {}", key, e),
                Some(key.to_string()),
            )
        })?;
        let scratch = params.require_path("SCRATCH")?;
        Self::new(component, command, scratch, runner).map_err(|e| e.with_context(key))
    }

    pub fn component(&self) -> &str {
        self.component
    }

    pub fn task_dir(&self, task_index: usize) -> PathBuf {
        self.scratch
            .join(self.component)
            .join(format!("{:03}", task_index))
    }

    /// Run one action and return its stdout
    pub async fn invoke(
        &self,
        action: &str,
        task_index: usize,
        kwargs: &Kwargs,
    ) -> anyhow::Result<String> {
        let dir = self.task_dir(task_index);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let command = ProcessCommandBuilder::new(&self.command[0])
            .args(&self.command[1..])
            .arg(action)
            .env(TASKID_ENV, task_index.to_string())
            .envs(argument_env(kwargs))
            .current_dir(&dir)
            .build();

        debug!(
            "{} {} for task {} in {}",
            self.component,
            action,
            task_index,
            dir.display()
        );

        let output = self.runner.run(command).await.map_err(TomoflowError::from)?;

        if !output.status.success() {
            let mut err = TomoflowError::step_failure_with_code(
                ErrorCode::STEP_SUBPROCESS_FAILED,
                format!(
                    "{} {} failed: {}",
                    self.component,
                    action,
                    output.stderr_tail().unwrap_or("no error output")
                ),
            );
            if let TomoflowError::StepFailure { exit_code, .. } = &mut err {
                *exit_code = output.status.code();
            }
            return Err(err.into());
        }

        Ok(output.stdout)
    }
}

/// `TOMOFLOW_ARG_<KEY>` variables; strings are passed raw, anything else as JSON
pub fn argument_env(kwargs: &Kwargs) -> Vec<(String, String)> {
    kwargs
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (format!("{}{}", ARG_ENV_PREFIX, key.to_ascii_uppercase()), value)
        })
        .collect()
}

/// Kwargs entry holding a path
pub fn path_arg(kwargs: &mut Kwargs, key: &str, path: &Path) {
    kwargs.insert(key.to_string(), Value::String(path.display().to_string()));
}
