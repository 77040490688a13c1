use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod codes;


pub use codes::{describe_error_code, ErrorCode};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for tomoflow
///
/// Every variant is fatal to the current run. Each variant carries the step
/// name and pass number once the flow executor has seen it, so the operator
/// is told exactly where to resume.
#[derive(Error, Debug)]
pub enum TomoflowError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Configuration {
        code: u16,
        message: String,
        field: Option<String>,
        step: Option<String>,
        pass: Option<usize>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Step failure: {message}")]
    StepFailure {
        code: u16,
        message: String,
        step: Option<String>,
        pass: Option<usize>,
        target: Option<String>,
        instance: Option<usize>,
        exit_code: Option<i32>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error(
        "[E{code:04}] Dispatch timeout: target '{target}' instance {instance} ran for {elapsed:?} (limit {limit:?})"
    )]
    DispatchTimeout {
        code: u16,
        target: String,
        instance: usize,
        elapsed: Duration,
        limit: Duration,
        step: Option<String>,
        pass: Option<usize>,
    },

    #[error("[E{code:04}] Checkpoint I/O error: {message}")]
    CheckpointIo {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        step: Option<String>,
        pass: Option<usize>,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl TomoflowError {
    /// Create a configuration error with default code
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            field: None,
            step: None,
            pass: None,
            source: None,
        }
    }

    /// Create a configuration error with specific code and field
    pub fn configuration_with_code(
        code: u16,
        message: impl Into<String>,
        field: Option<String>,
    ) -> Self {
        Self::Configuration {
            code,
            message: message.into(),
            field,
            step: None,
            pass: None,
            source: None,
        }
    }

    /// Create a step failure with default code
    pub fn step_failure(message: impl Into<String>) -> Self {
        Self::step_failure_with_code(ErrorCode::STEP_GENERIC, message)
    }

    /// Create a step failure with specific code
    pub fn step_failure_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::StepFailure {
            code,
            message: message.into(),
            step: None,
            pass: None,
            target: None,
            instance: None,
            exit_code: None,
            source: None,
        }
    }

    /// Create a failure for one dispatched instance of a target
    pub fn instance_failure(
        target: impl Into<String>,
        instance: usize,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self::StepFailure {
            code: ErrorCode::STEP_INSTANCE_FAILED,
            message: format!("task '{}' instance {}: {}", target, instance, message.into()),
            step: None,
            pass: None,
            target: Some(target),
            instance: Some(instance),
            exit_code,
            source: None,
        }
    }

    /// Create a timeout for one dispatched instance
    pub fn dispatch_timeout(
        target: impl Into<String>,
        instance: usize,
        elapsed: Duration,
        limit: Duration,
    ) -> Self {
        Self::DispatchTimeout {
            code: ErrorCode::TIMEOUT_INSTANCE,
            target: target.into(),
            instance,
            elapsed,
            limit,
            step: None,
            pass: None,
        }
    }

    /// Create a checkpoint I/O error
    pub fn checkpoint_io(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::checkpoint_io_with_code(ErrorCode::CHECKPOINT_IO_ERROR, message, path)
    }

    /// Create a checkpoint I/O error with specific code
    pub fn checkpoint_io_with_code(
        code: u16,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self::CheckpointIo {
            code,
            message: message.into(),
            path,
            step: None,
            pass: None,
            source: None,
        }
    }

    /// Add a source error to this error
    ///
    /// Timeouts have no source slot; the source is folded into nothing and
    /// the error is returned unchanged.
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        match &mut self {
            Self::Configuration { source: src, .. }
            | Self::StepFailure { source: src, .. }
            | Self::CheckpointIo { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::DispatchTimeout { .. } => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Configuration { message, .. }
            | Self::StepFailure { message, .. }
            | Self::CheckpointIo { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
            Self::DispatchTimeout { .. } => {}
        }
        self
    }

    /// Attach the failing step and pass, keeping any location already set
    pub fn at_step(mut self, step_name: &str, pass_number: usize) -> Self {
        match &mut self {
            Self::Configuration { step, pass, .. }
            | Self::StepFailure { step, pass, .. }
            | Self::DispatchTimeout { step, pass, .. }
            | Self::CheckpointIo { step, pass, .. } => {
                step.get_or_insert_with(|| step_name.to_string());
                pass.get_or_insert(pass_number);
            }
        }
        self
    }

    /// Attribute a step failure to one dispatched instance, unless already attributed
    pub fn for_instance(mut self, target_name: &str, index: usize) -> Self {
        if let Self::StepFailure {
            code,
            message,
            target,
            instance,
            ..
        } = &mut self
        {
            if instance.is_none() {
                *message = format!("task '{}' instance {}: {}", target_name, index, message);
                *target = Some(target_name.to_string());
                *instance = Some(index);
                if *code == ErrorCode::STEP_GENERIC {
                    *code = ErrorCode::STEP_INSTANCE_FAILED;
                }
            }
        }
        self
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => 2,
            Self::CheckpointIo { .. } => 4,
            Self::StepFailure { .. } => 5,
            Self::DispatchTimeout { .. } => 6,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Configuration { code, .. }
            | Self::StepFailure { code, .. }
            | Self::DispatchTimeout { code, .. }
            | Self::CheckpointIo { code, .. } => *code,
        }
    }

    /// Name of the step that failed, if known
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Configuration { step, .. }
            | Self::StepFailure { step, .. }
            | Self::DispatchTimeout { step, .. }
            | Self::CheckpointIo { step, .. } => step.as_deref(),
        }
    }

    /// Pass number in which the failure happened, if known
    pub fn pass(&self) -> Option<usize> {
        match self {
            Self::Configuration { pass, .. }
            | Self::StepFailure { pass, .. }
            | Self::DispatchTimeout { pass, .. }
            | Self::CheckpointIo { pass, .. } => *pass,
        }
    }

    /// Dispatched instance responsible for the failure, if any
    pub fn instance(&self) -> Option<usize> {
        match self {
            Self::StepFailure { instance, .. } => *instance,
            Self::DispatchTimeout { instance, .. } => Some(*instance),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_step_failure(&self) -> bool {
        matches!(self, Self::StepFailure { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DispatchTimeout { .. })
    }

    pub fn is_checkpoint_io(&self) -> bool {
        matches!(self, Self::CheckpointIo { .. })
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        let message = match self {
            Self::Configuration { message, field, .. } => match field {
                Some(f) => format!("Configuration problem with '{}': {}", f, message),
                None => format!("Configuration problem: {}", message),
            },
            Self::StepFailure {
                message,
                step,
                pass,
                exit_code,
                ..
            } => {
                let mut msg = String::from("Step failed");
                if let Some(s) = step {
                    msg.push_str(&format!(" '{}'", s));
                }
                if let Some(p) = pass {
                    msg.push_str(&format!(" in pass {}", p));
                }
                if let Some(code) = exit_code {
                    msg.push_str(&format!(" (exit code {})", code));
                }
                return format!("{}: {}", msg, message);
            }
            Self::DispatchTimeout {
                target,
                instance,
                elapsed,
                limit,
                step,
                pass,
                ..
            } => {
                let mut msg = format!(
                    "Task '{}' instance {} timed out after {:.1}s (limit {:.1}s)",
                    target,
                    instance,
                    elapsed.as_secs_f64(),
                    limit.as_secs_f64()
                );
                if let Some(s) = step {
                    msg.push_str(&format!(" during step '{}'", s));
                }
                if let Some(p) = pass {
                    msg.push_str(&format!(" in pass {}", p));
                }
                return msg;
            }
            Self::CheckpointIo { message, path, .. } => match path {
                Some(p) => format!("Checkpoint error at {}: {}", p.display(), message),
                None => format!("Checkpoint error: {}", message),
            },
        };

        match (self.step(), self.pass()) {
            (Some(step), Some(pass)) => {
                format!("{} (during step '{}' in pass {})", message, step, pass)
            }
            (Some(step), None) => format!("{} (during step '{}')", message, step),
            _ => message,
        }
    }

    /// Instruction telling the operator how to pick the run back up
    pub fn resume_hint(&self) -> Option<String> {
        self.step()
            .map(|step| format!("fix the problem, then resume with `--resume-from {}`", step))
    }
}

/// Collaborators report failures through anyhow; a wrapped tomoflow error
/// keeps its kind, anything else becomes a step failure.
impl From<anyhow::Error> for TomoflowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TomoflowError>() {
            Ok(inner) => inner,
            Err(other) => {
                let message = format!("{:#}", other);
                Self::step_failure_with_code(ErrorCode::STEP_COLLABORATOR_ERROR, message)
                    .with_source(other)
            }
        }
    }
}

impl From<serde_json::Error> for TomoflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration_with_code(ErrorCode::CONFIG_PARSE_ERROR, err.to_string(), None)
            .with_source(err)
    }
}

/// Type alias for Results using TomoflowError
pub type Result<T> = std::result::Result<T, TomoflowError>;
