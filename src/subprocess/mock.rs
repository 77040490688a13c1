use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Scripted process runner for scheduler and collaborator tests
///
/// Responses are matched in registration order. A response limited with
/// `times(n)` stops matching after `n` calls, so a job that is pending and
/// then completed is scripted as two consecutive responses for `sacct`.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    responses: Vec<Scripted>,
    calls: Vec<ProcessCommand>,
}

struct Scripted {
    program: String,
    matcher: Option<ArgsMatcher>,
    output: ProcessOutput,
    used: usize,
    limit: Option<usize>,
}

impl Scripted {
    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self.limit.is_none_or(|limit| self.used < limit)
            && self.matcher.as_ref().is_none_or(|m| m(&command.args))
    }
}

/// Builder for one scripted response; call `register` to install it
pub struct ScriptedResponse {
    runner: MockProcessRunner,
    scripted: Scripted,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next response for `program`; succeeds silently by default
    pub fn expect(&self, program: &str) -> ScriptedResponse {
        ScriptedResponse {
            runner: self.clone(),
            scripted: Scripted {
                program: program.to_string(),
                matcher: None,
                output: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                },
                used: 0,
                limit: None,
            },
        }
    }

    /// Every command run so far, in order
    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|cmd| cmd.program == program)
            .count()
    }

    // A panicking test thread must not hide the history from the others.
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let mut state = self.lock();
        state.calls.push(command.clone());

        match state.responses.iter_mut().find(|s| s.matches(&command)) {
            Some(scripted) => {
                scripted.used += 1;
                Ok(scripted.output.clone())
            }
            None => Err(ProcessError::MockExpectationNotMet(format!(
                "no scripted response for `{}`",
                command.display()
            ))),
        }
    }
}

impl ScriptedResponse {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.scripted.matcher = Some(Box::new(matcher));
        self
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.scripted.output.stdout = stdout.to_string();
        self
    }

    pub fn stderr(mut self, stderr: &str) -> Self {
        self.scripted.output.stderr = stderr.to_string();
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.scripted.output.status = match code {
            0 => ExitStatus::Success,
            code => ExitStatus::Error(code),
        };
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.scripted.limit = Some(n);
        self
    }

    pub fn register(self) {
        let runner = self.runner;
        runner.lock().responses.push(self.scripted);
    }
}
