use super::cursor::{cursor_from_start, resolve_cursor, resume_point, Cursor, ResumePoint};
use super::step::{Flow, SharedState, StepContext};
use crate::checkpoint::{CheckpointRecord, CheckpointStore, WorkflowState};
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::msg;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a call to [`FlowExecutor::run`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// (pass, step) pairs in execution order
    pub executed: Vec<(usize, String)>,
    /// The run ended at STOP_AFTER
    pub stopped_early: bool,
    /// The checkpoint said the workflow had already finished
    pub already_complete: bool,
}

/// First pass to run and the cursor applied to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PassPlan {
    pass: usize,
    cursor: Cursor,
}

/// Runs a flow over a range of passes, checkpointing after every step
pub struct FlowExecutor {
    workflow: String,
    flow: Flow,
    store: CheckpointStore,
    passes: RangeInclusive<usize>,
    state: SharedState,
    run_id: Uuid,
}

impl FlowExecutor {
    pub fn new(workflow: impl Into<String>, flow: Flow, store: CheckpointStore) -> Self {
        Self {
            workflow: workflow.into(),
            flow,
            store,
            passes: 1..=1,
            state: Arc::new(Mutex::new(WorkflowState::new())),
            run_id: Uuid::new_v4(),
        }
    }

    /// Run passes `first..=last` instead of a single pass
    pub fn with_passes(mut self, first: usize, last: usize) -> Result<Self> {
        if first > last {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("first pass {} is after last pass {}", first, last),
                Some("BEGIN".to_string()),
            ));
        }
        self.passes = first..=last;
        Ok(self)
    }

    /// Seed the shared state before the run; checkpointed state wins
    pub fn with_state(self, state: WorkflowState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            ..self
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.flow.names()
    }

    pub fn passes(&self) -> RangeInclusive<usize> {
        self.passes.clone()
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Execute the flow from `resume_from` (or the checkpoint) through
    /// `stop_after` (or the end of the last pass)
    pub async fn run(
        &self,
        resume_from: Option<&str>,
        stop_after: Option<&str>,
    ) -> Result<RunSummary> {
        let record = self.store.load().await?;
        let point = resume_point(&self.flow, &self.workflow, record.as_ref())?;

        if let Some(record) = &record {
            let mut state = self.state.lock().await;
            state.extend(record.state.clone());
        }

        let recorded_pass = record.as_ref().map(|r| r.pass);
        let plan = match self.plan(point, recorded_pass, resume_from, stop_after)? {
            Some(plan) => plan,
            None => {
                info!(
                    "Workflow {} already completed; nothing to do (run `tomoflow restart` to start over)",
                    self.workflow
                );
                return Ok(RunSummary {
                    already_complete: true,
                    ..RunSummary::default()
                });
            }
        };

        self.execute(plan).await
    }

    fn plan(
        &self,
        point: ResumePoint,
        recorded_pass: Option<usize>,
        resume_from: Option<&str>,
        stop_after: Option<&str>,
    ) -> Result<Option<PassPlan>> {
        let first = *self.passes.start();
        let last = *self.passes.end();

        if resume_from.is_some() {
            let cursor = resolve_cursor(&self.flow, resume_from, stop_after)?;
            let pass = match point {
                ResumePoint::At { pass, .. } if pass <= last => pass,
                _ => recorded_pass.unwrap_or(first).clamp(first, last),
            };
            return Ok(Some(PassPlan { pass, cursor }));
        }

        match point {
            ResumePoint::Fresh => Ok(Some(PassPlan {
                pass: first,
                cursor: resolve_cursor(&self.flow, None, stop_after)?,
            })),
            ResumePoint::Finished => Ok(None),
            ResumePoint::At { pass, .. } if pass > last => Ok(None),
            ResumePoint::At { pass, start } => {
                info!(
                    "Resuming {} from checkpoint at step '{}' (pass {})",
                    self.workflow,
                    self.flow.names()[start],
                    pass
                );
                Ok(Some(PassPlan {
                    pass,
                    cursor: cursor_from_start(&self.flow, start, stop_after)?,
                }))
            }
        }
    }

    async fn execute(&self, plan: PassPlan) -> Result<RunSummary> {
        let first = *self.passes.start();
        let last = *self.passes.end();
        let multi_pass = first != last;
        let mut summary = RunSummary::default();
        let mut resume_consumed = false;

        info!(
            "{}",
            msg::major(&format!("RUNNING WORKFLOW: {}", self.workflow.to_uppercase()))
        );

        for pass in plan.pass..=last {
            let (range, stops_here) = if resume_consumed {
                (0..self.flow.len(), false)
            } else {
                (plan.cursor.range(self.flow.len()), plan.cursor.has_stop())
            };
            resume_consumed = true;

            if multi_pass {
                info!("{}", msg::minor(&format!("PASS {} of {}..={}", pass, first, last)));
            }

            for index in range {
                let step = &self.flow.steps()[index];
                info!("Running step {}: {}", index + 1, step.name());

                let ctx = StepContext {
                    step: step.name().to_string(),
                    pass,
                    first_pass: first,
                    state: self.state(),
                };

                if let Err(e) = step.invoke(ctx).await {
                    let e = e.at_step(step.name(), pass);
                    error!("Step '{}' failed in pass {}: {}", step.name(), pass, e);
                    if let Some(hint) = e.resume_hint() {
                        warn!("{}", hint);
                    }
                    return Err(e);
                }

                let finished = pass == last && index + 1 == self.flow.len();
                self.checkpoint(step.name(), pass, finished)
                    .await
                    .map_err(|e| e.at_step(step.name(), pass))?;
                summary.executed.push((pass, step.name().to_string()));
            }

            if stops_here {
                let step = summary
                    .executed
                    .last()
                    .map(|(_, s)| s.as_str())
                    .unwrap_or_default();
                info!(
                    "{}",
                    msg::sub(&format!("Stopping after step '{}' (pass {})", step, pass))
                );
                summary.stopped_early = true;
                return Ok(summary);
            }
        }

        info!(
            "{}",
            msg::major(&format!("FINISHED WORKFLOW: {}", self.workflow.to_uppercase()))
        );
        Ok(summary)
    }

    async fn checkpoint(&self, step: &str, pass: usize, finished: bool) -> Result<()> {
        let state = self.state.lock().await.clone();
        let record = CheckpointRecord::new(&self.workflow, step, pass, state, self.run_id);
        let record = if finished { record.completed() } else { record };
        self.store.save(&record).await
    }
}
