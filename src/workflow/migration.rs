//! Gradient evaluation on top of the forward workflow.

use super::context::{bind, path_value, WorkflowContext};
use super::{forward, targets};
use crate::collaborators::{Collaborators, SolverAction};
use crate::config::{ParamSpec, ParamType, ParameterRegistry};
use crate::error::{Result, TomoflowError};
use crate::flow::{Step, StepContext};
use crate::system::{TaskContext, TaskRegistry};
use std::sync::Arc;
use tracing::info;

pub const STEPS: [&str; 3] = ["evaluate_gradient", "process_kernels", "scale_gradient"];

pub fn register(registry: &mut ParameterRegistry) {
    forward::register(registry);
    registry
        .declare(
            ParamSpec::par("CASE", ParamType::Str)
                .default("data")
                .doc("Type of inversion: 'data' (real data) or 'synthetic' (synthetic-synthetic)"),
        )
        .declare(
            ParamSpec::path("GRAD")
                .default_path("scratch/evalgrad")
                .doc("Scratch directory for event kernels and the summed gradient"),
        )
        .declare(
            ParamSpec::path("MASK").doc("Optional mask applied when scaling the gradient"),
        );
}

pub fn register_tasks(tasks: &mut TaskRegistry, collaborators: &Collaborators) {
    forward::register_tasks(tasks, collaborators);

    for (target, action) in [
        (targets::SOLVER_ADJOINT, SolverAction::Adjoint),
        (targets::SOLVER_PROCESS_KERNELS, SolverAction::ProcessKernels),
    ] {
        let solver = Arc::clone(&collaborators.solver);
        tasks.register_fn(target, move |ctx: TaskContext| {
            let solver = Arc::clone(&solver);
            async move {
                solver
                    .run_one(action, ctx.index, &ctx.kwargs)
                    .await
                    .map_err(TomoflowError::from)
            }
        });
    }
}

pub fn steps(ctx: &Arc<WorkflowContext>) -> Vec<Step> {
    let mut steps = forward::steps(ctx);
    steps.extend([
        bind(ctx, STEPS[0], evaluate_gradient),
        bind(ctx, STEPS[1], process_kernels),
        bind(ctx, STEPS[2], scale_gradient),
    ]);
    steps
}

async fn evaluate_gradient(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let model = ctx.current_model(&step).await?;
    let submission = ctx
        .submission(targets::SOLVER_ADJOINT)?
        .kwarg("model", path_value(&model))
        .kwarg("residuals", path_value(&ctx.scratch("residuals")?))
        .kwarg("gradient", path_value(&ctx.path("GRAD")?))
        .kwarg("export_kernels", ctx.params().get_bool("SAVEKERNELS"));
    ctx.dispatch(submission).await?;
    Ok(())
}

/// Sum event kernels into one gradient; one instance does all the work
async fn process_kernels(ctx: Arc<WorkflowContext>, _step: StepContext) -> Result<()> {
    let submission = ctx
        .submission(targets::SOLVER_PROCESS_KERNELS)?
        .single()
        .kwarg("gradient", path_value(&ctx.path("GRAD")?))
        .kwarg("ntask", ctx.ntask()?);
    ctx.dispatch(submission).await?;
    Ok(())
}

async fn scale_gradient(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let grad = ctx.path("GRAD")?;
    let gradient = grad.join("gradient");
    let model = ctx.current_model(&step).await?;
    let mask = ctx.params().get_path("MASK");

    if let Some(mask) = mask {
        info!("Applying mask {} to the gradient", mask.display());
    }
    ctx.collaborators()
        .preprocess
        .scale_gradient(&gradient, &model, mask)
        .await?;
    step.set_state("gradient", path_value(&gradient)).await;

    if ctx.params().get_bool("SAVEGRADIENT") {
        ctx.save_output(&gradient, &format!("gradient_{:04}", step.pass))
            .await?;
    }
    if ctx.params().get_bool("SAVEKERNELS") {
        ctx.save_output(&grad.join("kernels"), &format!("kernels_{:04}", step.pass))
            .await?;
    }
    Ok(())
}
