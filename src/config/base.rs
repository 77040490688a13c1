//! Shared parameter declarations every workflow variant starts from.

use super::registry::{ParamSpec, ParamType, ParameterRegistry};

pub const CASES: [&str; 2] = ["data", "synthetic"];
pub const SAVEAS_FORMATS: [&str; 3] = ["binary", "vector", "both"];
pub const SYSTEMS: [&str; 5] = ["serial", "local", "slurm", "pbs", "lsf"];

/// Workflow-level parameters and paths
pub fn register_base_options(registry: &mut ParameterRegistry) {
    registry
        .declare(
            ParamSpec::par("CASE", ParamType::Str)
                .required()
                .doc("Type of inversion: 'data' (real data) or 'synthetic' (synthetic-synthetic)"),
        )
        .declare(
            ParamSpec::par("RESUME_FROM", ParamType::Str)
                .doc("Name of the flow step to resume the workflow from"),
        )
        .declare(
            ParamSpec::par("STOP_AFTER", ParamType::Str)
                .doc("Name of the flow step to stop the workflow after"),
        )
        .declare(
            ParamSpec::par("SAVEMODEL", ParamType::Bool)
                .default(true)
                .doc("Save final model files after each iteration"),
        )
        .declare(
            ParamSpec::par("SAVEGRADIENT", ParamType::Bool)
                .default(true)
                .doc("Save gradient files after each iteration"),
        )
        .declare(
            ParamSpec::par("SAVEKERNELS", ParamType::Bool)
                .default(false)
                .doc("Save event kernel files after each iteration"),
        )
        .declare(
            ParamSpec::par("SAVETRACES", ParamType::Bool)
                .default(false)
                .doc("Save waveform traces after each iteration"),
        )
        .declare(
            ParamSpec::par("SAVERESIDUALS", ParamType::Bool)
                .default(false)
                .doc("Save waveform residuals after each iteration"),
        )
        .declare(
            ParamSpec::par("SAVEAS", ParamType::Str)
                .default("binary")
                .doc("Format to save models, gradients, kernels: 'binary', 'vector' or 'both'"),
        )
        .declare(
            ParamSpec::path("WORKDIR")
                .default_path(".")
                .doc("Working directory; relative paths resolve against it"),
        )
        .declare(
            ParamSpec::path("SCRATCH")
                .default_path("scratch")
                .doc("Scratch directory shared by dispatched tasks"),
        )
        .declare(
            ParamSpec::path("OUTPUT")
                .default_path("output")
                .doc("Directory for saved results and the checkpoint record"),
        )
        .declare(
            ParamSpec::path("MODEL_INIT")
                .required()
                .doc("Location of the initial model used by the workflow"),
        )
        .declare(
            ParamSpec::path("MODEL_TRUE")
                .doc("Target model used to generate data when CASE is 'synthetic'"),
        )
        .declare(ParamSpec::path("DATA").doc("Observed data available to the workflow"));

    registry.add_check(|params| {
        let mut issues = Vec::new();
        let case = params.get_str("CASE").unwrap_or_default().to_ascii_lowercase();

        if !CASES.contains(&case.as_str()) {
            issues.push(format!("CASE: must be one of {:?}, got '{}'", CASES, case));
        }
        if case == "synthetic" && !params.contains("MODEL_TRUE") {
            issues.push("MODEL_TRUE: CASE == synthetic requires MODEL_TRUE".to_string());
        }
        if !params.contains("DATA") && !params.contains("MODEL_TRUE") {
            issues.push("DATA: one of DATA or MODEL_TRUE must be set".to_string());
        }

        let saveas = params.get_str("SAVEAS").unwrap_or_default();
        if !SAVEAS_FORMATS.contains(&saveas) {
            issues.push(format!(
                "SAVEAS: must be one of {:?}, got '{}'",
                SAVEAS_FORMATS, saveas
            ));
        }
        issues
    });
}

/// Task dispatcher parameters
pub fn register_system_options(registry: &mut ParameterRegistry) {
    registry
        .declare(
            ParamSpec::par("SYSTEM", ParamType::Str)
                .default("serial")
                .doc("Execution backend: 'serial', 'local', 'slurm', 'pbs' or 'lsf'"),
        )
        .declare(
            ParamSpec::par("NTASK", ParamType::Int)
                .default(1_i64)
                .doc("Number of independent tasks (e.g. sources) dispatched per parallel step"),
        )
        .declare(
            ParamSpec::par("NTASKMAX", ParamType::Int)
                .default(8_i64)
                .doc("Maximum number of tasks running at once on the local backend"),
        )
        .declare(
            ParamSpec::par("NPROC", ParamType::Int)
                .default(1_i64)
                .doc("Processors requested per task on batch schedulers"),
        )
        .declare(
            ParamSpec::par("TASKTIME", ParamType::Float)
                .doc("Per-task time limit in minutes; unset means no limit"),
        )
        .declare(
            ParamSpec::par("POLL_INTERVAL", ParamType::Float)
                .default(5.0)
                .doc("Seconds between batch scheduler job-state queries"),
        )
        .declare(
            ParamSpec::par("SCHEDULER_ARGS", ParamType::Str)
                .doc("Extra arguments appended to the scheduler submit command"),
        );

    registry.add_check(|params| {
        let mut issues = Vec::new();
        let system = params.get_str("SYSTEM").unwrap_or_default().to_ascii_lowercase();
        if !SYSTEMS.contains(&system.as_str()) {
            issues.push(format!("SYSTEM: must be one of {:?}, got '{}'", SYSTEMS, system));
        }
        for name in ["NTASK", "NTASKMAX", "NPROC"] {
            if let Some(value) = params.get_int(name) {
                if value < 1 {
                    issues.push(format!("{}: must be at least 1, got {}", name, value));
                }
            }
        }
        issues
    });
}

/// External solver and preprocessing programs
pub fn register_collaborator_options(registry: &mut ParameterRegistry) {
    registry
        .declare(
            ParamSpec::par("SOLVER_BIN", ParamType::Str)
                .required()
                .doc("Program invoked for forward, adjoint and kernel-processing tasks"),
        )
        .declare(
            ParamSpec::par("PREPROCESS_BIN", ParamType::Str)
                .required()
                .doc("Program invoked for misfit, residual and gradient-scaling tasks"),
        );
}
