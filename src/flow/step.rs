use crate::checkpoint::WorkflowState;
use crate::error::{ErrorCode, Result, TomoflowError};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Workflow state shared between the executor and step actions
pub type SharedState = Arc<Mutex<WorkflowState>>;

type StepAction = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What a step action is told about the invocation
#[derive(Clone)]
pub struct StepContext {
    pub step: String,
    pub pass: usize,
    /// First pass of the run's pass range (BEGIN for inversion)
    pub first_pass: usize,
    pub state: SharedState,
}

impl StepContext {
    pub fn is_first_pass(&self) -> bool {
        self.pass == self.first_pass
    }

    pub async fn get_state(&self, key: &str) -> Option<Value> {
        self.state.lock().await.get(key).cloned()
    }

    pub async fn set_state(&self, key: &str, value: impl Into<Value>) {
        self.state.lock().await.insert(key.to_string(), value.into());
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step)
            .field("pass", &self.pass)
            .field("first_pass", &self.first_pass)
            .finish()
    }
}

/// A named unit of work in a flow
#[derive(Clone)]
pub struct Step {
    name: String,
    action: StepAction,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move |ctx| Box::pin(action(ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, ctx: StepContext) -> BoxFuture<'static, Result<()>> {
        (self.action)(ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Step").field(&self.name).finish()
    }
}

/// Ordered, non-empty list of uniquely named steps
#[derive(Debug, Clone)]
pub struct Flow {
    steps: Vec<Step>,
}

impl Flow {
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_FLOW,
                "flow has no steps",
                None,
            ));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(TomoflowError::configuration_with_code(
                    ErrorCode::CONFIG_INVALID_FLOW,
                    format!("step name '{}' appears more than once in the flow", step.name()),
                    None,
                ));
            }
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Index of `name`, or a configuration error listing the valid names
    pub fn require_position(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_UNKNOWN_STEP,
                format!(
                    "unknown step name '{}'; flow steps are: {}",
                    name,
                    self.names().join(", ")
                ),
                None,
            )
        })
    }
}
