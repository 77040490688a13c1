//! Flow executor: ordered named steps, resume/stop cursor and multi-pass runs.
//!
//! A [`Flow`] is built once by a workflow variant. [`FlowExecutor::run`]
//! resolves where to start (explicit `resume_from`, or the checkpoint left by
//! the previous run), executes steps strictly in order, and records a
//! checkpoint after each one. A failing step stops the run without advancing
//! the checkpoint.

pub mod cursor;
pub mod executor;
pub mod step;


pub use cursor::{cursor_from_start, resolve_cursor, resume_point, Cursor, ResumePoint};
pub use executor::{FlowExecutor, RunSummary};
pub use step::{Flow, SharedState, Step, StepContext};
