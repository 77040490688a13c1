use super::task::{run_instance, TaskRegistry};
use super::{DispatchReport, System, SystemKind, TaskSubmission};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runs instances one after another in this process
#[derive(Debug, Clone)]
pub struct SerialSystem {
    registry: Arc<TaskRegistry>,
}

impl SerialSystem {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl System for SerialSystem {
    fn kind(&self) -> SystemKind {
        SystemKind::Serial
    }

    async fn run(&self, submission: TaskSubmission) -> Result<DispatchReport> {
        let task = submission.validate(&self.registry)?;
        let instances = submission.instances();
        let started = Instant::now();

        info!(
            "Running task '{}' for {} instance(s) serially",
            submission.target, instances
        );

        for index in 0..instances {
            debug!("Task '{}' instance {} starting", submission.target, index);
            run_instance(
                Arc::clone(&task),
                &submission.target,
                submission.context(index),
                submission.timeout,
            )
            .await?;
        }

        Ok(DispatchReport {
            target: submission.target,
            instances,
            elapsed: started.elapsed(),
        })
    }
}
