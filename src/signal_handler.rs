use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::subprocess::terminate_live_groups;
use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Grace period between SIGTERM and SIGKILL for running children
const CHILD_GRACE: Duration = Duration::from_secs(2);

/// Install SIGINT/SIGTERM handlers that stop running children, report where
/// to resume, then exit
///
/// The checkpoint is only read, never written: an interrupted step did not
/// complete, so the last recorded step stays the resume point.
pub fn setup_interrupt_handlers(store: CheckpointStore, workflow: String) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        #[allow(clippy::never_loop)]
        for sig in signals.forever() {
            terminate_live_groups(CHILD_GRACE);
            let record = read_record(store.path());
            let message = interruption_message(&workflow, record.as_ref());
            warn!("{}", message);
            eprintln!("{}", message);
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Handlers for a `tomoflow task` worker: stop the collaborator programs it
/// started and exit quietly; the coordinating run reports the failure
pub fn setup_worker_signal_handlers() -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        #[allow(clippy::never_loop)]
        for sig in signals.forever() {
            terminate_live_groups(CHILD_GRACE);
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

fn read_record(path: &Path) -> Option<CheckpointRecord> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// What to tell the operator after an interrupt
pub fn interruption_message(workflow: &str, record: Option<&CheckpointRecord>) -> String {
    match record {
        Some(record) if record.workflow == workflow => format!(
            "Interrupted; last completed step is '{}' (pass {}). \
             Run `tomoflow run {}` to continue from the next step.",
            record.last_completed_step, record.pass, workflow
        ),
        _ => format!(
            "Interrupted before any step of {} completed; nothing was checkpointed.",
            workflow
        ),
    }
}
