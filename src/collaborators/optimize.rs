use super::external::{path_arg, ExternalProgram};
use crate::system::Kwargs;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Outcome of judging one line-search trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialVerdict {
    Accept,
    Retry,
}

/// Model-update strategy of an inversion
#[async_trait]
pub trait Optimizer: Send + Sync {
    /// Search direction from a gradient, returning where it was written
    async fn compute_step_direction(&self, gradient: &Path) -> anyhow::Result<PathBuf>;

    /// Where [`Optimizer::compute_step_direction`] writes its result
    fn direction_path(&self) -> PathBuf;

    /// Trial model for line-search step `trial` (1-based)
    async fn propose_trial(&self, trial: usize, direction: &Path) -> anyhow::Result<PathBuf>;

    fn evaluate_trial(&self, f_try: f64, f_current: f64) -> TrialVerdict;

    /// Turn the accepted trial into the model for the next iteration
    async fn finalize(&self, iteration: usize, accepted: &Path) -> anyhow::Result<PathBuf>;
}

/// Optimizer driven through `OPTIMIZE_BIN`, keeping its files in `OPTIMIZE`
///
/// Trials are accepted on a strict misfit decrease (backtracking).
#[derive(Debug, Clone)]
pub struct ExternalOptimizer {
    program: ExternalProgram,
    optimize_dir: PathBuf,
}

impl ExternalOptimizer {
    pub fn new(program: ExternalProgram, optimize_dir: impl Into<PathBuf>) -> Self {
        Self {
            program,
            optimize_dir: optimize_dir.into(),
        }
    }

    pub fn optimize_dir(&self) -> &Path {
        &self.optimize_dir
    }

    async fn call(
        &self,
        action: &str,
        mut kwargs: Kwargs,
        output: PathBuf,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.optimize_dir).await?;
        path_arg(&mut kwargs, "output", &output);
        self.program.invoke(action, 0, &kwargs).await?;
        Ok(output)
    }
}

#[async_trait]
impl Optimizer for ExternalOptimizer {
    async fn compute_step_direction(&self, gradient: &Path) -> anyhow::Result<PathBuf> {
        let mut kwargs = Kwargs::new();
        path_arg(&mut kwargs, "gradient", gradient);
        self.call("direction", kwargs, self.direction_path()).await
    }

    fn direction_path(&self) -> PathBuf {
        self.optimize_dir.join("p_new")
    }

    async fn propose_trial(&self, trial: usize, direction: &Path) -> anyhow::Result<PathBuf> {
        let mut kwargs = Kwargs::new();
        kwargs.insert("trial".to_string(), Value::from(trial));
        path_arg(&mut kwargs, "direction", direction);
        self.call("trial", kwargs, self.optimize_dir.join("m_try")).await
    }

    fn evaluate_trial(&self, f_try: f64, f_current: f64) -> TrialVerdict {
        if f_try.is_finite() && f_try < f_current {
            TrialVerdict::Accept
        } else {
            TrialVerdict::Retry
        }
    }

    async fn finalize(&self, iteration: usize, accepted: &Path) -> anyhow::Result<PathBuf> {
        let mut kwargs = Kwargs::new();
        kwargs.insert("iteration".to_string(), Value::from(iteration));
        path_arg(&mut kwargs, "model", accepted);
        self.call("finalize", kwargs, self.optimize_dir.join("m_new"))
            .await
    }
}
