use crate::error::{ErrorCode, TomoflowError};
use std::time::Duration;

/// Failure to run a program at all; a non-zero exit is not an error here
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("process timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error while running process: {0}")]
    Io(#[from] std::io::Error),

    #[error("mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl From<ProcessError> for TomoflowError {
    fn from(err: ProcessError) -> Self {
        let code = match &err {
            ProcessError::CommandNotFound(_) => ErrorCode::STEP_COMMAND_NOT_FOUND,
            ProcessError::Timeout(_) => ErrorCode::STEP_SUBPROCESS_FAILED,
            ProcessError::Io(_) => ErrorCode::STEP_SPAWN_FAILED,
            ProcessError::MockExpectationNotMet(_) => ErrorCode::STEP_GENERIC,
        };
        TomoflowError::step_failure_with_code(code, err.to_string()).with_source(err)
    }
}
