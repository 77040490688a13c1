//! Parameter and path registry.
//!
//! Workflow variants declare what they need in a [`ParameterRegistry`];
//! [`RawParameters`] collects values from the parameter file and environment;
//! [`ParameterRegistry::resolve`] turns the two into typed [`Parameters`],
//! reporting every problem at once.

pub mod base;
pub mod loader;
pub mod parameters;
pub mod registry;

#[cfg(test)]
mod tests;

pub use base::{register_base_options, register_collaborator_options, register_system_options};
pub use loader::{RawParameters, ENV_PREFIX};
pub use parameters::{ParamValue, Parameters};
pub use registry::{ParamKind, ParamSpec, ParamType, ParameterRegistry};

/// Default parameter file name, looked up in the working directory
pub const DEFAULT_PARAMETER_FILE: &str = "parameters.yaml";
