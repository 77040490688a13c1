//! Batch-scheduler backend: job arrays submitted through scheduler CLIs.

pub mod scheduler;

#[cfg(test)]
mod tests;

pub use scheduler::{JobState, SchedulerKind, SubmitRequest};

use super::task::TaskRegistry;
use super::{DispatchReport, System, SystemKind, TaskSubmission, WorkerInvocation};
use crate::config::Parameters;
use crate::error::{ErrorCode, Result, TomoflowError};
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder, ProcessRunner};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive failed state queries tolerated before giving up
const MAX_QUERY_FAILURES: usize = 3;

/// Settings shared by every submission on a batch scheduler
#[derive(Debug, Clone)]
pub struct RemoteBatchConfig {
    pub worker: WorkerInvocation,
    pub nproc: usize,
    pub poll_interval: Duration,
    pub scheduler_args: Vec<String>,
    pub log_dir: PathBuf,
}

impl RemoteBatchConfig {
    pub fn from_parameters(params: &Parameters, worker: WorkerInvocation) -> Result<Self> {
        let scheduler_args = match params.get_str("SCHEDULER_ARGS") {
            Some(raw) => shell_words::split(raw).map_err(|e| {
                TomoflowError::configuration_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("SCHEDULER_ARGS is not a valid argument list: {}", e),
                    Some("SCHEDULER_ARGS".to_string()),
                )
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            worker,
            nproc: params.require_count("NPROC")?,
            poll_interval: params
                .get_seconds("POLL_INTERVAL")
                .unwrap_or(Duration::from_secs(5)),
            scheduler_args,
            log_dir: params.require_path("SCRATCH")?.join("logs"),
        })
    }
}

/// Submits each dispatch as one job array and polls until it is done
#[derive(Clone)]
pub struct RemoteBatchSystem {
    scheduler: SchedulerKind,
    registry: Arc<TaskRegistry>,
    runner: Arc<dyn ProcessRunner>,
    config: RemoteBatchConfig,
}

impl RemoteBatchSystem {
    pub fn new(
        scheduler: SchedulerKind,
        registry: Arc<TaskRegistry>,
        runner: Arc<dyn ProcessRunner>,
        config: RemoteBatchConfig,
    ) -> Self {
        Self {
            scheduler,
            registry,
            runner,
            config,
        }
    }

    /// Shell command each array element runs
    pub fn worker_command(&self, submission: &TaskSubmission) -> Result<String> {
        let worker = &self.config.worker;
        let kwargs = serde_json::to_string(&submission.kwargs)?;
        let words = vec![
            worker.program.display().to_string(),
            "--parameters".to_string(),
            worker.parameter_file.display().to_string(),
            "--workdir".to_string(),
            worker.workdir.display().to_string(),
            "task".to_string(),
            worker.workflow.clone(),
            submission.target.clone(),
            "--kwargs".to_string(),
            kwargs,
            "--fan-out".to_string(),
            submission.instances().to_string(),
        ];
        Ok(shell_words::join(words))
    }

    async fn submit(&self, submission: &TaskSubmission) -> Result<String> {
        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(|e| {
                TomoflowError::step_failure_with_code(
                    ErrorCode::STEP_SCHEDULER_ERROR,
                    format!(
                        "failed to create scheduler log directory {}",
                        self.config.log_dir.display()
                    ),
                )
                .with_source(e)
            })?;

        let command = self.worker_command(submission)?;
        let request = SubmitRequest {
            job_name: &submission.target,
            instances: submission.instances(),
            nproc: self.config.nproc,
            walltime: submission.timeout,
            log_dir: &self.config.log_dir,
            extra_args: &self.config.scheduler_args,
            command: &command,
        };

        let cmd = ProcessCommandBuilder::new(self.scheduler.submit_program())
            .args(self.scheduler.submit_args(&request))
            .current_dir(&self.config.worker.workdir)
            .build();
        let stdout = self.call(cmd).await?;
        let job_id = self.scheduler.parse_job_id(&stdout)?;

        info!(
            "Submitted task '{}' as {} job {} ({} instance(s))",
            submission.target,
            self.scheduler,
            job_id,
            submission.instances()
        );
        Ok(job_id)
    }

    async fn query(&self, job_id: &str, instances: usize) -> Result<Vec<JobState>> {
        let cmd = ProcessCommandBuilder::new(self.scheduler.query_program())
            .args(self.scheduler.query_args(job_id))
            .build();
        let stdout = self.call(cmd).await?;
        let mut listed = self.scheduler.parse_states(&stdout, instances);
        Ok((0..instances)
            .map(|i| listed.remove(&i).unwrap_or(JobState::Pending))
            .collect())
    }

    async fn cancel(&self, job_id: &str) {
        let cmd = ProcessCommandBuilder::new(self.scheduler.cancel_program())
            .args(self.scheduler.cancel_args(job_id))
            .build();
        match self.call(cmd).await {
            Ok(_) => info!("Cancelled {} job {}", self.scheduler, job_id),
            Err(e) => warn!("Failed to cancel {} job {}: {}", self.scheduler, job_id, e),
        }
    }

    /// Run a scheduler CLI command, treating a non-zero exit as a failure
    async fn call(&self, cmd: ProcessCommand) -> Result<String> {
        let display = cmd.display();
        let output = self.runner.run(cmd).await.map_err(|e| {
            TomoflowError::from(e).with_context(format!("while running `{}`", display))
        })?;

        if !output.status.success() {
            let mut err = TomoflowError::step_failure_with_code(
                ErrorCode::STEP_SCHEDULER_ERROR,
                format!(
                    "`{}` failed: {}",
                    display,
                    output.stderr_tail().unwrap_or("no error output")
                ),
            );
            if let TomoflowError::StepFailure { exit_code, .. } = &mut err {
                *exit_code = output.status.code();
            }
            return Err(err);
        }
        Ok(output.stdout)
    }

    /// Poll until every element is terminal or the first one fails
    ///
    /// Each element's time limit counts from the first poll that sees it out
    /// of the queue, so a long wait for resources is never a timeout.
    async fn wait(&self, submission: &TaskSubmission, job_id: &str) -> Result<()> {
        let instances = submission.instances();
        let mut started_at: Vec<Option<Instant>> = vec![None; instances];
        let mut interval = tokio::time::interval(self.config.poll_interval);
        let mut query_failures = 0;

        loop {
            interval.tick().await;

            let states = match self.query(job_id, instances).await {
                Ok(states) => {
                    query_failures = 0;
                    states
                }
                Err(e) if query_failures + 1 < MAX_QUERY_FAILURES => {
                    query_failures += 1;
                    warn!("Job state query for {} failed, retrying: {}", job_id, e);
                    continue;
                }
                Err(e) => {
                    self.cancel(job_id).await;
                    return Err(e);
                }
            };

            let now = Instant::now();
            for (clock, state) in started_at.iter_mut().zip(&states) {
                if clock.is_none() && state.has_started() {
                    *clock = Some(now);
                }
            }
            let run_time =
                |index: usize| started_at[index].map_or(Duration::ZERO, |t| now.duration_since(t));

            if let Some(err) = self.first_failure(submission, &states, run_time) {
                self.cancel(job_id).await;
                return Err(err);
            }

            let done = states.iter().filter(|s| s.is_terminal()).count();
            let queued = states.iter().filter(|s| !s.has_started()).count();
            debug!(
                "Job {}: {}/{} instance(s) finished, {} queued",
                job_id, done, instances, queued
            );
            if done == instances {
                return Ok(());
            }

            if let Some(limit) = submission.timeout {
                let overdue = states
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| *s == &JobState::Running)
                    .map(|(index, _)| (index, run_time(index)))
                    .find(|(_, elapsed)| *elapsed > limit + self.config.poll_interval);
                if let Some((instance, elapsed)) = overdue {
                    self.cancel(job_id).await;
                    return Err(TomoflowError::dispatch_timeout(
                        &submission.target,
                        instance,
                        elapsed,
                        limit,
                    ));
                }
            }
        }
    }

    fn first_failure(
        &self,
        submission: &TaskSubmission,
        states: &[JobState],
        run_time: impl Fn(usize) -> Duration,
    ) -> Option<TomoflowError> {
        states.iter().enumerate().find_map(|(index, state)| match state {
            JobState::Failed { state, exit_code } => Some(TomoflowError::instance_failure(
                &submission.target,
                index,
                *exit_code,
                format!("{} reported state {}", self.scheduler, state),
            )),
            JobState::TimedOut => {
                let elapsed = run_time(index);
                Some(TomoflowError::DispatchTimeout {
                    code: ErrorCode::TIMEOUT_SCHEDULER,
                    target: submission.target.clone(),
                    instance: index,
                    elapsed,
                    limit: submission.timeout.unwrap_or(elapsed),
                    step: None,
                    pass: None,
                })
            }
            JobState::Pending | JobState::Running | JobState::Succeeded => None,
        })
    }
}

#[async_trait]
impl System for RemoteBatchSystem {
    fn kind(&self) -> SystemKind {
        SystemKind::RemoteBatch(self.scheduler)
    }

    async fn run(&self, submission: TaskSubmission) -> Result<DispatchReport> {
        submission.validate(&self.registry)?;
        let started = Instant::now();

        let job_id = self.submit(&submission).await?;
        self.wait(&submission, &job_id).await?;

        info!("{} job {} finished", self.scheduler, job_id);
        Ok(DispatchReport {
            instances: submission.instances(),
            target: submission.target,
            elapsed: started.elapsed(),
        })
    }
}
