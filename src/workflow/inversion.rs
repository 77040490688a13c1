//! Iterative model updates: migration plus direction, line search and
//! model acceptance, repeated over BEGIN..=END.

use super::context::{bind, path_value, state_f64, state_path, WorkflowContext};
use super::{forward, migration, targets};
use crate::collaborators::{Collaborators, TrialVerdict};
use crate::config::{ParamSpec, ParamType, ParameterRegistry, Parameters};
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::flow::{Step, StepContext};
use crate::system::{TaskContext, TaskRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const STEPS: [&str; 3] = ["compute_direction", "perform_line_search", "finalize_iteration"];

pub fn register(registry: &mut ParameterRegistry) {
    migration::register(registry);
    registry
        .declare(
            ParamSpec::par("BEGIN", ParamType::Int)
                .default(1_i64)
                .doc("First iteration of the inversion"),
        )
        .declare(
            ParamSpec::par("END", ParamType::Int)
                .required()
                .doc("Last iteration of the inversion, inclusive"),
        )
        .declare(
            ParamSpec::par("STEP_COUNT_MAX", ParamType::Int)
                .default(10_i64)
                .doc("Maximum number of trial steps in one line search"),
        )
        .declare(
            ParamSpec::par("OPTIMIZE_BIN", ParamType::Str)
                .required()
                .doc("Program computing search directions, trial models and model updates"),
        )
        .declare(
            ParamSpec::path("OPTIMIZE")
                .default_path("scratch/optimize")
                .doc("Directory holding optimizer vectors (p_new, m_try, m_new)"),
        );

    registry.add_check(|params| {
        let mut issues = Vec::new();
        let begin = params.get_int("BEGIN").unwrap_or(1);
        if begin < 1 {
            issues.push(format!("BEGIN: must be at least 1, got {}", begin));
        }
        if let Some(end) = params.get_int("END") {
            if end < begin {
                issues.push(format!("END: must not precede BEGIN ({}), got {}", begin, end));
            }
        }
        if let Some(max) = params.get_int("STEP_COUNT_MAX") {
            if max < 1 {
                issues.push(format!("STEP_COUNT_MAX: must be at least 1, got {}", max));
            }
        }
        issues
    });
}

pub fn register_tasks(tasks: &mut TaskRegistry, collaborators: &Collaborators) {
    migration::register_tasks(tasks, collaborators);

    if let Some(optimizer) = &collaborators.optimizer {
        let optimizer = Arc::clone(optimizer);
        tasks.register_fn(targets::OPTIMIZE_DIRECTION, move |ctx: TaskContext| {
            let optimizer = Arc::clone(&optimizer);
            async move {
                let gradient = ctx.require_kwarg_str("gradient")?;
                let direction = optimizer
                    .compute_step_direction(std::path::Path::new(gradient))
                    .await?;
                info!("Search direction written to {}", direction.display());
                Ok::<(), TomoflowError>(())
            }
        });
    }
}

pub fn steps(ctx: &Arc<WorkflowContext>) -> Vec<Step> {
    let mut steps = migration::steps(ctx);
    steps.extend([
        bind(ctx, STEPS[0], compute_direction),
        bind(ctx, STEPS[1], perform_line_search),
        bind(ctx, STEPS[2], finalize_iteration),
    ]);
    steps
}

/// Iterations BEGIN..=END
pub fn pass_range(params: &Parameters) -> Result<(usize, usize)> {
    let to_pass = |name: &str| -> Result<usize> {
        let value = params.require_int(name)?;
        usize::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                TomoflowError::configuration_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("{} must be a positive iteration number, got {}", name, value),
                    Some(name.to_string()),
                )
            })
    };
    Ok((to_pass("BEGIN")?, to_pass("END")?))
}

async fn compute_direction(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let optimizer = ctx.collaborators().optimizer()?;
    let gradient = match state_path(&step, "gradient").await {
        Ok(gradient) => gradient,
        Err(_) => {
            let fallback = ctx.path("GRAD")?.join("gradient");
            debug!(
                "No gradient in workflow state, using {}",
                fallback.display()
            );
            fallback
        }
    };

    let submission = ctx
        .submission(targets::OPTIMIZE_DIRECTION)?
        .single()
        .kwarg("gradient", path_value(&gradient));
    ctx.dispatch(submission).await?;

    step.set_state("direction", path_value(&optimizer.direction_path()))
        .await;
    Ok(())
}

/// Bounded backtracking: propose, simulate, measure, judge
async fn perform_line_search(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let optimizer = Arc::clone(ctx.collaborators().optimizer()?);
    let max_trials = ctx.params().require_count("STEP_COUNT_MAX")?;
    let f_current = state_f64(&step, "f_new").await?;
    let direction = state_path(&step, "direction").await?;

    for trial in 1..=max_trials {
        let m_try = optimizer.propose_trial(trial, &direction).await?;
        forward::simulate(&ctx, &m_try).await?;
        let f_try = forward::measure_misfit(&ctx).await?;

        info!(
            "Line search trial {}/{}: f_try = {:e} (f_new = {:e})",
            trial, max_trials, f_try, f_current
        );

        match optimizer.evaluate_trial(f_try, f_current) {
            TrialVerdict::Accept => {
                step.set_state("m_try", path_value(&m_try)).await;
                step.set_state("f_try", f_try).await;
                return Ok(());
            }
            TrialVerdict::Retry => warn!("Trial {} did not reduce the misfit", trial),
        }
    }

    Err(TomoflowError::step_failure(format!(
        "line search failed to reduce the misfit after {} trial(s)",
        max_trials
    )))
}

async fn finalize_iteration(ctx: Arc<WorkflowContext>, step: StepContext) -> Result<()> {
    let optimizer = ctx.collaborators().optimizer()?;
    let accepted = state_path(&step, "m_try").await?;
    let f_try = state_f64(&step, "f_try").await?;

    let model = optimizer.finalize(step.pass, &accepted).await?;
    step.set_state("model", path_value(&model)).await;
    step.set_state("f_new", f_try).await;
    info!(
        "Iteration {} accepted {} (misfit {:e})",
        step.pass,
        model.display(),
        f_try
    );

    if ctx.params().get_bool("SAVEMODEL") {
        ctx.save_output(&model, &format!("model_{:04}", step.pass))
            .await?;
    }
    Ok(())
}
