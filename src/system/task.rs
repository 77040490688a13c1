use crate::error::{ErrorCode, Result, TomoflowError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keyword arguments handed to every instance of a dispatched target
pub type Kwargs = BTreeMap<String, Value>;

/// What one dispatched instance knows about itself
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub index: usize,
    pub fan_out: usize,
    pub kwargs: Arc<Kwargs>,
}

impl TaskContext {
    pub fn new(index: usize, fan_out: usize, kwargs: Kwargs) -> Self {
        Self {
            index,
            fan_out,
            kwargs: Arc::new(kwargs),
        }
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    pub fn kwarg_str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }

    pub fn kwarg_path(&self, key: &str) -> Option<PathBuf> {
        self.kwarg_str(key).map(PathBuf::from)
    }

    pub fn require_kwarg_str(&self, key: &str) -> Result<&str> {
        self.kwarg_str(key).ok_or_else(|| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_MISSING_REQUIRED,
                format!("task argument '{}' is missing", key),
                Some(key.to_string()),
            )
        })
    }
}

/// A dispatchable unit of work, run once per task index
#[async_trait]
pub trait Task: Send + Sync {
    async fn run_one(&self, ctx: TaskContext) -> Result<()>;
}

struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run_one(&self, ctx: TaskContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Named dispatch targets available to a workflow
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("targets", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, task: Arc<dyn Task>) -> &mut Self {
        self.tasks.insert(name.into(), task);
        self
    }

    /// Register an async closure as a target
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, Arc::new(FnTask(f)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Look up a target, failing before anything is launched
    pub fn require(&self, name: &str) -> Result<Arc<dyn Task>> {
        self.tasks.get(name).cloned().ok_or_else(|| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_UNKNOWN_TARGET,
                format!(
                    "unknown task target '{}'; registered targets are: {}",
                    name,
                    self.names().join(", ")
                ),
                None,
            )
        })
    }
}

/// Run one instance of `task`, enforcing the submission's timeout
pub(crate) async fn run_instance(
    task: Arc<dyn Task>,
    target: &str,
    ctx: TaskContext,
    timeout: Option<Duration>,
) -> Result<()> {
    let index = ctx.index;
    let started = Instant::now();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task.run_one(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                return Err(TomoflowError::dispatch_timeout(
                    target,
                    index,
                    started.elapsed(),
                    limit,
                ))
            }
        },
        None => task.run_one(ctx).await,
    };
    result.map_err(|e| e.for_instance(target, index))
}
