//! Solver, preprocessor and optimizer seams used by workflow steps.
//!
//! The core only depends on the traits. The binary wires in the
//! `External*` implementations, which run the programs named by
//! `SOLVER_BIN`, `PREPROCESS_BIN` and `OPTIMIZE_BIN`.

pub mod external;
pub mod optimize;
pub mod preprocess;
pub mod solver;


pub use external::{argument_env, ExternalProgram, ARG_ENV_PREFIX};
pub use optimize::{ExternalOptimizer, Optimizer, TrialVerdict};
pub use preprocess::{sum_of_squares, ExternalPreprocessor, Preprocessor};
pub use solver::{ExternalSolver, Solver, SolverAction};

use crate::config::Parameters;
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::subprocess::ProcessRunner;
use std::sync::Arc;

/// The collaborators one workflow run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub solver: Arc<dyn Solver>,
    pub preprocess: Arc<dyn Preprocessor>,
    pub optimizer: Option<Arc<dyn Optimizer>>,
}

impl Collaborators {
    pub fn new(solver: Arc<dyn Solver>, preprocess: Arc<dyn Preprocessor>) -> Self {
        Self {
            solver,
            preprocess,
            optimizer: None,
        }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// External programs configured by the resolved parameters
    ///
    /// The optimizer is only built when `OPTIMIZE_BIN` is set.
    pub fn from_parameters(params: &Parameters, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let solver =
            ExternalProgram::from_parameter(params, "SOLVER_BIN", "solver", Arc::clone(&runner))?;
        let preprocess = ExternalProgram::from_parameter(
            params,
            "PREPROCESS_BIN",
            "preprocess",
            Arc::clone(&runner),
        )?;

        let mut collaborators = Self::new(
            Arc::new(ExternalSolver::new(solver)),
            Arc::new(ExternalPreprocessor::new(preprocess)),
        );

        if params.contains("OPTIMIZE_BIN") {
            let program =
                ExternalProgram::from_parameter(params, "OPTIMIZE_BIN", "optimize", runner)?;
            let optimizer = ExternalOptimizer::new(program, params.require_path("OPTIMIZE")?);
            collaborators = collaborators.with_optimizer(Arc::new(optimizer));
        }

        Ok(collaborators)
    }

    pub fn optimizer(&self) -> Result<&Arc<dyn Optimizer>> {
        self.optimizer.as_ref().ok_or_else(|| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_MISSING_REQUIRED,
                "this workflow needs an optimizer but OPTIMIZE_BIN is not set",
                Some("OPTIMIZE_BIN".to_string()),
            )
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("optimizer", &self.optimizer.is_some())
            .finish_non_exhaustive()
    }
}
