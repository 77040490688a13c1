//! Subprocess abstraction shared by the scheduler backends and the external
//! collaborator programs.

pub mod builder;
pub mod error;
pub mod groups;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use groups::terminate_live_groups;
pub use mock::{MockProcessRunner, ScriptedResponse};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
