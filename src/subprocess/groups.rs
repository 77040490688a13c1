//! Process groups of running children.
//!
//! Every child is spawned as the leader of its own group. Signalling the
//! group instead of the leader reaches the programs a solver script starts
//! in the background as well.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static LIVE_GROUPS: Lazy<Mutex<BTreeSet<i32>>> = Lazy::new(|| Mutex::new(BTreeSet::new()));

fn registry() -> MutexGuard<'static, BTreeSet<i32>> {
    LIVE_GROUPS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Groups whose leader has not been reaped yet
pub fn live_groups() -> Vec<i32> {
    registry().iter().copied().collect()
}

/// Send `sig` to every process in the group; false if the group is gone
pub fn signal_group(pgid: i32, sig: Signal) -> bool {
    match signal::killpg(Pid::from_raw(pgid), sig) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("Failed to send {} to process group {}: {}", sig.as_str(), pgid, e);
            false
        }
    }
}

fn group_exists(pgid: i32) -> bool {
    signal::killpg(Pid::from_raw(pgid), None).is_ok()
}

/// SIGTERM each group, then SIGKILL whatever is still there after `grace`
pub fn terminate_groups(pgids: &[i32], grace: Duration) {
    let mut remaining: Vec<i32> = pgids
        .iter()
        .copied()
        .filter(|&pgid| signal_group(pgid, Signal::SIGTERM))
        .collect();

    let deadline = Instant::now() + grace;
    while !remaining.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
        remaining.retain(|&pgid| group_exists(pgid));
    }

    for pgid in remaining {
        warn!("Process group {} ignored SIGTERM, killing it", pgid);
        signal_group(pgid, Signal::SIGKILL);
    }
}

/// Terminate every group still registered; used on SIGINT/SIGTERM
pub fn terminate_live_groups(grace: Duration) {
    let groups = live_groups();
    if !groups.is_empty() {
        debug!("Terminating {} running process group(s)", groups.len());
        terminate_groups(&groups, grace);
    }
}

/// Registration of one child's group; kills the group when dropped
///
/// Dropping covers a timeout and a cancelled run alike. A child that exited
/// on its own is handed back with [`GroupGuard::release`].
#[derive(Debug)]
pub struct GroupGuard {
    pgid: i32,
    armed: bool,
}

impl GroupGuard {
    pub fn track(pid: u32) -> Option<Self> {
        let pgid = i32::try_from(pid).ok()?;
        registry().insert(pgid);
        Some(Self { pgid, armed: true })
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// Unregister without signalling
    pub fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        registry().remove(&self.pgid);
        if self.armed && signal_group(self.pgid, Signal::SIGKILL) {
            debug!("Killed process group {}", self.pgid);
        }
    }
}
