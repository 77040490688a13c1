//! Discovering which task index a worker process is.

use crate::error::{ErrorCode, Result, TomoflowError};
use tracing::warn;

/// Index variable set for in-process and local workers
pub const TASKID_ENV: &str = "TOMOFLOW_TASKID";

/// Variables consulted in order, with the offset that makes them 0-based
const INDEX_VARIABLES: [(&str, usize); 4] = [
    (TASKID_ENV, 0),
    ("SLURM_ARRAY_TASK_ID", 0),
    ("PBS_ARRAY_INDEX", 0),
    ("LSB_JOBINDEX", 1),
];

/// Task index of this process, read from the environment
pub fn discover_task_index(fan_out: usize) -> Result<usize> {
    task_index_from(|name| std::env::var(name).ok(), fan_out)
}

/// Task index from an arbitrary variable lookup
///
/// With no variable set the worker is assumed to be run by hand and gets
/// index 0.
pub fn task_index_from<F>(lookup: F, fan_out: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    for (name, offset) in INDEX_VARIABLES {
        let Some(raw) = lookup(name) else {
            continue;
        };

        let value: usize = raw.trim().parse().map_err(|_| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_TASK_INDEX,
                format!("{}='{}' is not a task index", name, raw),
                Some(name.to_string()),
            )
        })?;

        let index = value.checked_sub(offset).ok_or_else(|| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_TASK_INDEX,
                format!("{}={} is below the first index {}", name, value, offset),
                Some(name.to_string()),
            )
        })?;

        if index >= fan_out {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_TASK_INDEX,
                format!(
                    "{}={} is out of range for {} task(s)",
                    name, value, fan_out
                ),
                Some(name.to_string()),
            ));
        }
        return Ok(index);
    }

    warn!("No task index variable set; assuming task 0 (debug mode)");
    Ok(0)
}
