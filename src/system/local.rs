use super::task::{run_instance, TaskRegistry};
use super::{DispatchReport, System, SystemKind, TaskSubmission};
use crate::error::{ErrorCode, Result, TomoflowError};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Runs instances as concurrent tokio tasks, at most `max_concurrent` at once
#[derive(Debug, Clone)]
pub struct LocalSystem {
    registry: Arc<TaskRegistry>,
    max_concurrent: usize,
}

impl LocalSystem {
    pub fn new(registry: Arc<TaskRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[async_trait]
impl System for LocalSystem {
    fn kind(&self) -> SystemKind {
        SystemKind::LocalParallel
    }

    async fn run(&self, submission: TaskSubmission) -> Result<DispatchReport> {
        let task = submission.validate(&self.registry)?;
        let instances = submission.instances();
        let started = Instant::now();

        info!(
            "Running task '{}' for {} instance(s), {} at a time",
            submission.target,
            instances,
            self.max_concurrent.min(instances)
        );

        let progress = create_progress_bar(instances);
        progress.set_message(submission.target.clone());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(instances);

        for index in 0..instances {
            let semaphore = Arc::clone(&semaphore);
            let task = Arc::clone(&task);
            let target = submission.target.clone();
            let ctx = submission.context(index);
            let timeout = submission.timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    TomoflowError::step_failure(format!("task slots closed: {}", e))
                })?;
                debug!("Task '{}' instance {} starting", target, index);
                run_instance(task, &target, ctx, timeout).await
            }));
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| async move { (index, handle.await) })
            .collect();

        while let Some((index, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(join_error) => Err(TomoflowError::step_failure_with_code(
                    ErrorCode::STEP_INSTANCE_PANICKED,
                    format!("instance panicked: {}", join_error),
                )
                .for_instance(&submission.target, index)),
            };

            match outcome {
                Ok(()) => progress.inc(1),
                Err(e) => {
                    error!("Task '{}' instance {} failed: {}", submission.target, index, e);
                    for abort in &aborts {
                        abort.abort();
                    }
                    progress.abandon_with_message(format!("{} failed", submission.target));
                    return Err(e);
                }
            }
        }

        progress.finish_and_clear();
        Ok(DispatchReport {
            target: submission.target,
            instances,
            elapsed: started.elapsed(),
        })
    }
}

fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb
}
