/// Error code registry for tomoflow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Checkpoint storage errors
/// - 4000-4999: Step and dispatch failures
/// - 5000-5999: Dispatch timeouts
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_MISSING_REQUIRED: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_VALIDATION_FAILED: u16 = 1008;
    pub const CONFIG_UNKNOWN_STEP: u16 = 1010;
    pub const CONFIG_UNKNOWN_TARGET: u16 = 1011;
    pub const CONFIG_UNKNOWN_WORKFLOW: u16 = 1012;
    pub const CONFIG_INVALID_FLOW: u16 = 1013;
    pub const CONFIG_TASK_INDEX: u16 = 1014;
    pub const CONFIG_CHECKPOINT_MISMATCH: u16 = 1015;

    // Checkpoint errors (3000-3999)
    pub const CHECKPOINT_IO_ERROR: u16 = 3001;
    pub const CHECKPOINT_CORRUPTED: u16 = 3006;
    pub const CHECKPOINT_SERIALIZATION_ERROR: u16 = 3011;
    pub const CHECKPOINT_INCOMPATIBLE_VERSION: u16 = 3013;

    // Step failures (4000-4999)
    pub const STEP_GENERIC: u16 = 4000;
    pub const STEP_COMMAND_NOT_FOUND: u16 = 4001;
    pub const STEP_SUBPROCESS_FAILED: u16 = 4003;
    pub const STEP_SPAWN_FAILED: u16 = 4007;
    pub const STEP_INSTANCE_FAILED: u16 = 4020;
    pub const STEP_INSTANCE_PANICKED: u16 = 4021;
    pub const STEP_SCHEDULER_ERROR: u16 = 4030;
    pub const STEP_COLLABORATOR_ERROR: u16 = 4040;

    // Timeouts (5000-5999)
    pub const TIMEOUT_INSTANCE: u16 = 5000;
    pub const TIMEOUT_SCHEDULER: u16 = 5001;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "General configuration error",
        ErrorCode::CONFIG_NOT_FOUND => "Parameter file not found",
        ErrorCode::CONFIG_PARSE_ERROR => "Parameter file could not be parsed",
        ErrorCode::CONFIG_MISSING_REQUIRED => "Required parameter missing",
        ErrorCode::CONFIG_INVALID_VALUE => "Invalid parameter value",
        ErrorCode::CONFIG_VALIDATION_FAILED => "Parameter validation failed",
        ErrorCode::CONFIG_UNKNOWN_STEP => "Step name not found in flow",
        ErrorCode::CONFIG_UNKNOWN_TARGET => "Task target not registered",
        ErrorCode::CONFIG_UNKNOWN_WORKFLOW => "Unknown workflow",
        ErrorCode::CONFIG_INVALID_FLOW => "Invalid flow definition",
        ErrorCode::CONFIG_TASK_INDEX => "Task index unavailable or out of range",
        ErrorCode::CONFIG_CHECKPOINT_MISMATCH => "Checkpoint does not match workflow",

        ErrorCode::CHECKPOINT_IO_ERROR => "Checkpoint read/write failed",
        ErrorCode::CHECKPOINT_CORRUPTED => "Checkpoint record is corrupted",
        ErrorCode::CHECKPOINT_SERIALIZATION_ERROR => "Checkpoint serialization failed",
        ErrorCode::CHECKPOINT_INCOMPATIBLE_VERSION => "Checkpoint format version unsupported",

        ErrorCode::STEP_GENERIC => "Step failed",
        ErrorCode::STEP_COMMAND_NOT_FOUND => "Command not found",
        ErrorCode::STEP_SUBPROCESS_FAILED => "Subprocess exited with non-zero status",
        ErrorCode::STEP_SPAWN_FAILED => "Failed to spawn subprocess",
        ErrorCode::STEP_INSTANCE_FAILED => "Dispatched task instance failed",
        ErrorCode::STEP_INSTANCE_PANICKED => "Dispatched task instance panicked",
        ErrorCode::STEP_SCHEDULER_ERROR => "Batch scheduler reported an error",
        ErrorCode::STEP_COLLABORATOR_ERROR => "Collaborator returned an error",

        ErrorCode::TIMEOUT_INSTANCE => "Task instance exceeded its time limit",
        ErrorCode::TIMEOUT_SCHEDULER => "Scheduler job exceeded its time limit",

        _ => "Unknown error",
    }
}
