use super::external::ExternalProgram;
use crate::system::Kwargs;
use async_trait::async_trait;
use std::fmt;

/// Solver operations a workflow dispatches per task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverAction {
    Forward,
    Adjoint,
    ProcessKernels,
}

impl SolverAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverAction::Forward => "forward",
            SolverAction::Adjoint => "adjoint",
            SolverAction::ProcessKernels => "process_kernels",
        }
    }
}

impl fmt::Display for SolverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numerical solver; writes its outputs under a location keyed by task index
#[async_trait]
pub trait Solver: Send + Sync {
    async fn run_one(
        &self,
        action: SolverAction,
        task_index: usize,
        kwargs: &Kwargs,
    ) -> anyhow::Result<()>;
}

/// Solver driven through `SOLVER_BIN`
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    program: ExternalProgram,
}

impl ExternalSolver {
    pub fn new(program: ExternalProgram) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Solver for ExternalSolver {
    async fn run_one(
        &self,
        action: SolverAction,
        task_index: usize,
        kwargs: &Kwargs,
    ) -> anyhow::Result<()> {
        self.program
            .invoke(action.as_str(), task_index, kwargs)
            .await
            .map(|_| ())
    }
}
