//! Workflow variants.
//!
//! Each variant is a composition: it declares parameters on top of the
//! variant it extends, registers its dispatch targets, and appends its steps
//! to the inherited flow.
//!
//! ```text
//! forward    generate_synthetic_data, run_forward_simulations, evaluate_objective_function
//! migration  forward + evaluate_gradient, process_kernels, scale_gradient
//! inversion  migration + compute_direction, perform_line_search, finalize_iteration
//! ```

pub mod context;
pub mod forward;
pub mod inversion;
pub mod migration;

#[cfg(test)]
mod tests;

pub use context::WorkflowContext;

use crate::checkpoint::WorkflowState;
use crate::collaborators::Collaborators;
use crate::config::{ParameterRegistry, Parameters};
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::flow::Flow;
use crate::system::TaskRegistry;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Dispatch target names shared by the steps and the batch worker
pub mod targets {
    pub const SOLVER_FORWARD: &str = "solver.forward";
    pub const SOLVER_ADJOINT: &str = "solver.adjoint";
    pub const SOLVER_PROCESS_KERNELS: &str = "solver.process_kernels";
    pub const PREPROCESS_MISFIT: &str = "preprocess.misfit";
    pub const OPTIMIZE_DIRECTION: &str = "optimize.direction";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    Forward,
    Migration,
    Inversion,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [
        WorkflowKind::Forward,
        WorkflowKind::Migration,
        WorkflowKind::Inversion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowKind::Forward => "forward",
            WorkflowKind::Migration => "migration",
            WorkflowKind::Inversion => "inversion",
        }
    }

    pub fn parameter_registry(&self) -> ParameterRegistry {
        let mut registry = ParameterRegistry::new();
        match self {
            WorkflowKind::Forward => forward::register(&mut registry),
            WorkflowKind::Migration => migration::register(&mut registry),
            WorkflowKind::Inversion => inversion::register(&mut registry),
        }
        registry
    }

    /// Step names in flow order, available without building a context
    pub fn step_names(&self) -> Vec<&'static str> {
        let mut names = forward::STEPS.to_vec();
        if matches!(self, WorkflowKind::Migration | WorkflowKind::Inversion) {
            names.extend(migration::STEPS);
        }
        if *self == WorkflowKind::Inversion {
            names.extend(inversion::STEPS);
        }
        names
    }

    pub fn task_registry(&self, collaborators: &Collaborators) -> TaskRegistry {
        let mut tasks = TaskRegistry::new();
        match self {
            WorkflowKind::Forward => forward::register_tasks(&mut tasks, collaborators),
            WorkflowKind::Migration => migration::register_tasks(&mut tasks, collaborators),
            WorkflowKind::Inversion => inversion::register_tasks(&mut tasks, collaborators),
        }
        tasks
    }

    pub fn flow(&self, ctx: &Arc<WorkflowContext>) -> Result<Flow> {
        let steps = match self {
            WorkflowKind::Forward => forward::steps(ctx),
            WorkflowKind::Migration => migration::steps(ctx),
            WorkflowKind::Inversion => inversion::steps(ctx),
        };
        Flow::new(steps)
    }

    /// Passes to run; only the inversion iterates
    pub fn pass_range(&self, params: &Parameters) -> Result<(usize, usize)> {
        match self {
            WorkflowKind::Inversion => inversion::pass_range(params),
            _ => Ok((1, 1)),
        }
    }

    /// State a fresh run starts from
    pub fn initial_state(&self, params: &Parameters) -> WorkflowState {
        let mut state = WorkflowState::new();
        if let Some(model) = params.get_path("MODEL_INIT") {
            state.insert("model".to_string(), context::path_value(model));
        }
        state
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowKind {
    type Err = TomoflowError;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                TomoflowError::configuration_with_code(
                    ErrorCode::CONFIG_UNKNOWN_WORKFLOW,
                    format!(
                        "unknown workflow '{}'; expected one of: forward, migration, inversion",
                        s
                    ),
                    None,
                )
            })
    }
}
