//! # tomoflow
//!
//! Resumable, checkpointed orchestration of seismic inversion workflows.
//!
//! ## Usage
//!
//! ```bash
//! tomoflow run inversion [--resume-from STEP] [--stop-after STEP]
//! ```
//!
//! ## Modules
//!
//! - `checkpoint` - Durable record of the last completed step, pass and workflow state
//! - `collaborators` - Solver, preprocessor and optimizer traits with external-program implementations
//! - `config` - Parameter/path registry, parameter file loading and typed values
//! - `error` - Error taxonomy with numeric codes and exit codes
//! - `flow` - Named steps, the resume/stop cursor and the multi-pass executor
//! - `msg` - Banner and block formatting for log output
//! - `signal_handler` - SIGINT/SIGTERM handling that reports the resume point
//! - `subprocess` - Process runner abstraction with a scripted mock for tests
//! - `system` - Task dispatch backends: serial, local parallel and batch schedulers
//! - `workflow` - The forward, migration and inversion workflow variants
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod flow;
pub mod msg;
pub mod signal_handler;
pub mod subprocess;
pub mod system;
pub mod workflow;


pub use error::{ErrorCode, Result, TomoflowError};
