use super::WorkflowKind;
use crate::collaborators::Collaborators;
use crate::config::Parameters;
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::flow::{Step, StepContext};
use crate::system::{DispatchReport, System, TaskSubmission};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Everything a step action needs, built once per run and shared by `Arc`
#[derive(Clone)]
pub struct WorkflowContext {
    kind: WorkflowKind,
    params: Arc<Parameters>,
    system: Arc<dyn System>,
    collaborators: Collaborators,
}

impl WorkflowContext {
    pub fn new(
        kind: WorkflowKind,
        params: Arc<Parameters>,
        system: Arc<dyn System>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            kind,
            params,
            system,
            collaborators,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn system(&self) -> &Arc<dyn System> {
        &self.system
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn ntask(&self) -> Result<usize> {
        self.params.require_count("NTASK")
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.params.require_path(name).map(Path::to_path_buf)
    }

    pub fn scratch(&self, relative: &str) -> Result<PathBuf> {
        Ok(self.params.require_path("SCRATCH")?.join(relative))
    }

    /// Observed data: generated traces for synthetic cases, DATA otherwise
    pub fn observed_traces(&self) -> Result<PathBuf> {
        let synthetic = self
            .params
            .get_str("CASE")
            .is_some_and(|c| c.eq_ignore_ascii_case("synthetic"));
        match self.params.get_path("DATA") {
            Some(data) if !synthetic => Ok(data.to_path_buf()),
            _ => self.scratch("traces/obs"),
        }
    }

    /// Submission fanned out over NTASK with the TASKTIME limit
    pub fn submission(&self, target: &str) -> Result<TaskSubmission> {
        Ok(TaskSubmission::new(target)
            .fan_out(self.ntask()?)
            .timeout(self.params.get_minutes("TASKTIME")))
    }

    pub async fn dispatch(&self, submission: TaskSubmission) -> Result<DispatchReport> {
        info!(
            "Dispatching '{}' on the {} backend ({} instance(s))",
            submission.target,
            self.system.kind(),
            submission.instances()
        );
        let report = self.system.run(submission).await?;
        debug!(
            "'{}' finished in {:.1}s",
            report.target,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Model of the current iteration; MODEL_INIT until one is accepted
    pub async fn current_model(&self, step: &StepContext) -> Result<PathBuf> {
        match step.get_state("model").await {
            Some(Value::String(model)) => Ok(PathBuf::from(model)),
            _ => self.path("MODEL_INIT"),
        }
    }

    /// Copy a result into OUTPUT under `name`; missing sources are skipped
    pub async fn save_output(&self, source: &Path, name: &str) -> Result<()> {
        if !source.exists() {
            debug!("Nothing to save at {}", source.display());
            return Ok(());
        }
        let target = self.path("OUTPUT")?.join(name);
        copy_recursive(source, &target).await.map_err(|e| {
            TomoflowError::step_failure(format!(
                "failed to save {} to {}",
                source.display(),
                target.display()
            ))
            .with_source(e)
        })?;
        info!("Saved {} to {}", source.display(), target.display());
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("kind", &self.kind)
            .field("system", &self.system.kind())
            .finish_non_exhaustive()
    }
}

/// Bind a step action to the shared context
pub(crate) fn bind<F, Fut>(ctx: &Arc<WorkflowContext>, name: &'static str, action: F) -> Step
where
    F: Fn(Arc<WorkflowContext>, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    Step::new(name, move |step| action(Arc::clone(&ctx), step))
}

/// Recreate `dir` empty so stale files from a previous attempt are not read
pub(crate) async fn fresh_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).await.map_err(|e| io_failure(dir, e))?;
    }
    fs::create_dir_all(dir).await.map_err(|e| io_failure(dir, e))
}

/// Float stored in workflow state, or a step failure naming the key
pub(crate) async fn state_f64(step: &StepContext, key: &str) -> Result<f64> {
    step.get_state(key)
        .await
        .and_then(|v| v.as_f64())
        .ok_or_else(|| missing_state(key))
}

/// Path stored in workflow state, or a step failure naming the key
pub(crate) async fn state_path(step: &StepContext, key: &str) -> Result<PathBuf> {
    match step.get_state(key).await {
        Some(Value::String(path)) => Ok(PathBuf::from(path)),
        _ => Err(missing_state(key)),
    }
}

pub(crate) fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

fn missing_state(key: &str) -> TomoflowError {
    TomoflowError::step_failure(format!(
        "workflow state has no '{}'; resume from an earlier step to recompute it",
        key
    ))
}

fn io_failure(path: &Path, err: std::io::Error) -> TomoflowError {
    TomoflowError::step_failure_with_code(
        ErrorCode::STEP_GENERIC,
        format!("filesystem operation on {} failed", path.display()),
    )
    .with_source(err)
}

async fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(from, to).await?;
        return Ok(());
    }

    fs::create_dir_all(to).await?;
    let mut entries = fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let target = to.join(entry.file_name());
        Box::pin(copy_recursive(&path, &target)).await?;
    }
    Ok(())
}
