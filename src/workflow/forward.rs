//! Forward simulations and misfit evaluation.

use super::context::{bind, fresh_dir, path_value, WorkflowContext};
use super::{targets, WorkflowKind};
use crate::collaborators::{Collaborators, SolverAction};
use crate::config::{
    register_base_options, register_collaborator_options, register_system_options,
    ParameterRegistry,
};
use crate::error::{Result, TomoflowError};
use crate::flow::{Step, StepContext};
use crate::system::{TaskContext, TaskRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const STEPS: [&str; 3] = [
    "generate_synthetic_data",
    "run_forward_simulations",
    "evaluate_objective_function",
];

pub fn register(registry: &mut ParameterRegistry) {
    register_base_options(registry);
    register_system_options(registry);
    register_collaborator_options(registry);
}

pub fn register_tasks(tasks: &mut TaskRegistry, collaborators: &Collaborators) {
    let solver = Arc::clone(&collaborators.solver);
    tasks.register_fn(targets::SOLVER_FORWARD, move |ctx: TaskContext| {
        let solver = Arc::clone(&solver);
        async move {
            solver
                .run_one(SolverAction::Forward, ctx.index, &ctx.kwargs)
                .await
                .map_err(TomoflowError::from)
        }
    });

    let preprocess = Arc::clone(&collaborators.preprocess);
    tasks.register_fn(targets::PREPROCESS_MISFIT, move |ctx: TaskContext| {
        let preprocess = Arc::clone(&preprocess);
        async move {
            preprocess
                .misfit(ctx.index, &ctx.kwargs)
                .await
                .map_err(TomoflowError::from)
        }
    });
}

pub fn steps(ctx: &Arc<WorkflowContext>) -> Vec<Step> {
    vec![
        bind(ctx, STEPS[0], generate_synthetic_data),
        bind(ctx, STEPS[1], run_forward_simulations),
        bind(ctx, STEPS[2], evaluate_objective_function),
    ]
}

/// After the first inversion pass the line search has already simulated
/// and measured the accepted model
fn reuses_line_search(ctx: &WorkflowContext, step: &StepContext) -> bool {
    ctx.kind() == WorkflowKind::Inversion && !step.is_first_pass()
}

async fn generate_synthetic_data(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let synthetic = ctx
        .params()
        .get_str("CASE")
        .is_some_and(|c| c.eq_ignore_ascii_case("synthetic"));
    if !synthetic {
        info!("CASE is 'data'; using observed data, nothing to generate");
        return Ok(());
    }
    if !step.is_first_pass() {
        info!("Synthetic data already generated in pass {}", step.first_pass);
        return Ok(());
    }

    let model_true = ctx.path("MODEL_TRUE")?;
    let output = ctx.scratch("traces/obs")?;
    let submission = ctx
        .submission(targets::SOLVER_FORWARD)?
        .kwarg("model", path_value(&model_true))
        .kwarg("output", path_value(&output));
    ctx.dispatch(submission).await?;
    Ok(())
}

async fn run_forward_simulations(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    if reuses_line_search(&ctx, &step) {
        info!("Line search already simulated the current model; skipping");
        return Ok(());
    }
    let model = ctx.current_model(&step).await?;
    simulate(&ctx, &model).await
}

async fn evaluate_objective_function(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    if reuses_line_search(&ctx, &step) {
        info!("Misfit of the current model recorded by the line search; skipping");
        return save_traces(&ctx, step.pass).await;
    }

    let misfit = measure_misfit(&ctx).await?;
    info!("Misfit f_new = {:e}", misfit);
    step.set_state("f_new", misfit).await;
    save_traces(&ctx, step.pass).await
}

/// Dispatch the forward solver for `model` into the synthetic traces
pub(crate) async fn simulate(ctx: &WorkflowContext, model: &Path) -> Result<()> {
    let output = ctx.scratch("traces/syn")?;
    let submission = ctx
        .submission(targets::SOLVER_FORWARD)?
        .kwarg("model", path_value(model))
        .kwarg("output", path_value(&output));
    ctx.dispatch(submission).await?;
    Ok(())
}

/// Dispatch per-task misfit measurement and sum the residuals in process
pub(crate) async fn measure_misfit(ctx: &WorkflowContext) -> Result<f64> {
    let residuals = ctx.scratch("residuals")?;
    fresh_dir(&residuals).await?;

    let submission = ctx
        .submission(targets::PREPROCESS_MISFIT)?
        .kwarg("obs", path_value(&ctx.observed_traces()?))
        .kwarg("syn", path_value(&ctx.scratch("traces/syn")?))
        .kwarg("residuals", path_value(&residuals));
    ctx.dispatch(submission).await?;

    let misfit = ctx.collaborators().preprocess.sum_residuals(&residuals).await?;
    Ok(misfit)
}

async fn save_traces(ctx: &WorkflowContext, pass: usize) -> Result<()> {
    if ctx.params().get_bool("SAVETRACES") {
        ctx.save_output(&ctx.scratch("traces/syn")?, &format!("traces_{:04}", pass))
            .await?;
    }
    if ctx.params().get_bool("SAVERESIDUALS") {
        ctx.save_output(&ctx.scratch("residuals")?, &format!("residuals_{:04}", pass))
            .await?;
    }
    Ok(())
}
