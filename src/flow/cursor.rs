use super::step::Flow;
use crate::checkpoint::CheckpointRecord;
use crate::error::{ErrorCode, Result, TomoflowError};
use std::ops::Range;

/// Slice of a flow selected for the first executed pass
///
/// `stop` is exclusive and already includes the step named by STOP_AFTER;
/// `None` means "through the last step".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub start: usize,
    pub stop: Option<usize>,
}

impl Cursor {
    pub fn full() -> Self {
        Self {
            start: 0,
            stop: None,
        }
    }

    pub fn range(&self, len: usize) -> Range<usize> {
        self.start..self.stop.unwrap_or(len).min(len)
    }

    pub fn has_stop(&self) -> bool {
        self.stop.is_some()
    }
}

/// Resolve step names into a cursor
pub fn resolve_cursor(
    flow: &Flow,
    resume_from: Option<&str>,
    stop_after: Option<&str>,
) -> Result<Cursor> {
    let start = match resume_from {
        Some(name) => flow.require_position(name)?,
        None => 0,
    };
    cursor_from_start(flow, start, stop_after)
}

/// Build a cursor for a known start index, resolving `stop_after`
pub fn cursor_from_start(flow: &Flow, start: usize, stop_after: Option<&str>) -> Result<Cursor> {
    let stop = match stop_after {
        Some(name) => Some(flow.require_position(name)? + 1),
        None => None,
    };

    if let Some(stop) = stop {
        if stop <= start {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!(
                    "stop_after '{}' comes before the resume point '{}'",
                    stop_after.unwrap_or_default(),
                    flow.names().get(start).copied().unwrap_or_default()
                ),
                Some("STOP_AFTER".to_string()),
            ));
        }
    }

    Ok(Cursor { start, stop })
}

/// Where a previous run left off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// No checkpoint; start from the beginning
    Fresh,
    /// Continue at `start` in `pass`
    At { pass: usize, start: usize },
    /// The recorded run already finished
    Finished,
}

/// Translate a checkpoint record into the next step to run
pub fn resume_point(
    flow: &Flow,
    workflow: &str,
    record: Option<&CheckpointRecord>,
) -> Result<ResumePoint> {
    let Some(record) = record else {
        return Ok(ResumePoint::Fresh);
    };

    if record.workflow != workflow {
        return Err(TomoflowError::configuration_with_code(
            ErrorCode::CONFIG_CHECKPOINT_MISMATCH,
            format!(
                "checkpoint was written by workflow '{}', not '{}'; run `tomoflow restart` to discard it",
                record.workflow, workflow
            ),
            None,
        ));
    }

    let index = flow.position(&record.last_completed_step).ok_or_else(|| {
        TomoflowError::configuration_with_code(
            ErrorCode::CONFIG_CHECKPOINT_MISMATCH,
            format!(
                "checkpoint names step '{}' which is not in the '{}' flow",
                record.last_completed_step, workflow
            ),
            None,
        )
    })?;

    if record.is_completed() {
        return Ok(ResumePoint::Finished);
    }

    if index + 1 == flow.len() {
        Ok(ResumePoint::At {
            pass: record.pass + 1,
            start: 0,
        })
    } else {
        Ok(ResumePoint::At {
            pass: record.pass,
            start: index + 1,
        })
    }
}
