//! Command lines and output formats of the supported batch schedulers.

use crate::error::{ErrorCode, Result, TomoflowError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

static SLURM_JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)").expect("Valid regex pattern"));
static PBS_JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(\[\])?\S*)").expect("Valid regex pattern"));
static LSF_JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Job <(\d+)>").expect("Valid regex pattern"));
static PBS_SUBJOB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\[(\d+)\]").expect("Valid regex pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Slurm,
    Pbs,
    Lsf,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Slurm => f.write_str("slurm"),
            SchedulerKind::Pbs => f.write_str("pbs"),
            SchedulerKind::Lsf => f.write_str("lsf"),
        }
    }
}

/// State of one array element as reported by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Queued or held; no walltime has been spent yet
    Pending,
    Running,
    Succeeded,
    Failed {
        state: String,
        exit_code: Option<i32>,
    },
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    /// Whether the element has left the queue
    pub fn has_started(&self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// Resources and names for one array submission
#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub job_name: &'a str,
    pub instances: usize,
    pub nproc: usize,
    pub walltime: Option<Duration>,
    pub log_dir: &'a Path,
    pub extra_args: &'a [String],
    /// Shell command each array element runs
    pub command: &'a str,
}

impl SchedulerKind {
    pub fn submit_program(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "sbatch",
            SchedulerKind::Pbs => "qsub",
            SchedulerKind::Lsf => "bsub",
        }
    }

    pub fn query_program(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "sacct",
            SchedulerKind::Pbs => "qstat",
            SchedulerKind::Lsf => "bjobs",
        }
    }

    pub fn cancel_program(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "scancel",
            SchedulerKind::Pbs => "qdel",
            SchedulerKind::Lsf => "bkill",
        }
    }

    /// Arguments for submitting a job array
    pub fn submit_args(&self, req: &SubmitRequest<'_>) -> Vec<String> {
        let last = req.instances.saturating_sub(1);
        let log_dir = req.log_dir.display();
        let mut args = Vec::new();

        match self {
            SchedulerKind::Slurm => {
                args.push("--parsable".to_string());
                args.push(format!("--job-name={}", req.job_name));
                args.push(format!("--array=0-{}", last));
                args.push(format!("--ntasks={}", req.nproc));
                if let Some(limit) = req.walltime {
                    args.push(format!("--time={}", minutes(limit)));
                }
                args.push(format!("--output={}/%A_%a.log", log_dir));
                args.extend(req.extra_args.iter().cloned());
                args.push(format!("--wrap={}", req.command));
            }
            SchedulerKind::Pbs => {
                args.push("-N".to_string());
                args.push(req.job_name.to_string());
                // PBS rejects single-element arrays
                if req.instances > 1 {
                    args.push("-J".to_string());
                    args.push(format!("0-{}", last));
                }
                args.push("-l".to_string());
                args.push(format!("select=1:ncpus={}", req.nproc));
                if let Some(limit) = req.walltime {
                    args.push("-l".to_string());
                    args.push(format!("walltime={}", hms(limit)));
                }
                args.push("-j".to_string());
                args.push("oe".to_string());
                args.push("-o".to_string());
                args.push(log_dir.to_string());
                args.extend(req.extra_args.iter().cloned());
                args.push("--".to_string());
                args.push("/bin/sh".to_string());
                args.push("-c".to_string());
                args.push(req.command.to_string());
            }
            SchedulerKind::Lsf => {
                args.push("-J".to_string());
                args.push(format!("{}[1-{}]", req.job_name, req.instances));
                args.push("-n".to_string());
                args.push(req.nproc.to_string());
                if let Some(limit) = req.walltime {
                    args.push("-W".to_string());
                    args.push(minutes(limit).to_string());
                }
                args.push("-o".to_string());
                args.push(format!("{}/%J_%I.log", log_dir));
                args.extend(req.extra_args.iter().cloned());
                args.push(req.command.to_string());
            }
        }
        args
    }

    /// Pull the job id out of the submit command's stdout
    pub fn parse_job_id(&self, stdout: &str) -> Result<String> {
        let pattern = match self {
            SchedulerKind::Slurm => &*SLURM_JOB_ID,
            SchedulerKind::Pbs => &*PBS_JOB_ID,
            SchedulerKind::Lsf => &*LSF_JOB_ID,
        };

        pattern
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                TomoflowError::step_failure_with_code(
                    ErrorCode::STEP_SCHEDULER_ERROR,
                    format!(
                        "could not read a job id from {} output: {:?}",
                        self.submit_program(),
                        stdout.trim()
                    ),
                )
            })
    }

    pub fn query_args(&self, job_id: &str) -> Vec<String> {
        match self {
            SchedulerKind::Slurm => vec![
                "-j".to_string(),
                job_id.to_string(),
                "--format=JobID,State,ExitCode".to_string(),
                "--noheader".to_string(),
                "--parsable2".to_string(),
            ],
            SchedulerKind::Pbs => vec![
                "-x".to_string(),
                "-f".to_string(),
                "-t".to_string(),
                job_id.to_string(),
            ],
            SchedulerKind::Lsf => vec![
                "-a".to_string(),
                "-noheader".to_string(),
                "-o".to_string(),
                "jobindex stat exit_code".to_string(),
                job_id.to_string(),
            ],
        }
    }

    pub fn cancel_args(&self, job_id: &str) -> Vec<String> {
        vec![job_id.to_string()]
    }

    /// Parse the query output into per-index states (0-based)
    ///
    /// Elements the scheduler does not list yet are absent from the map.
    pub fn parse_states(&self, stdout: &str, instances: usize) -> BTreeMap<usize, JobState> {
        match self {
            SchedulerKind::Slurm => parse_sacct(stdout),
            SchedulerKind::Pbs => parse_qstat(stdout, instances),
            SchedulerKind::Lsf => parse_bjobs(stdout),
        }
    }
}

fn minutes(limit: Duration) -> u64 {
    limit.as_secs().div_ceil(60).max(1)
}

fn hms(limit: Duration) -> String {
    let secs = limit.as_secs().max(1);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `12345_3|COMPLETED|0:0` lines; job steps (`12345_3.batch`) are skipped
fn parse_sacct(stdout: &str) -> BTreeMap<usize, JobState> {
    let mut states = BTreeMap::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.trim().split('|').collect();
        if fields.len() < 2 || fields[0].contains('.') {
            continue;
        }
        let index = match fields[0].split_once('_') {
            Some((_, idx)) => match idx.parse::<usize>() {
                Ok(i) => i,
                Err(_) => continue,
            },
            None => 0,
        };
        let exit_code = fields
            .get(2)
            .and_then(|c| c.split(':').next())
            .and_then(|c| c.parse::<i32>().ok());
        states.insert(index, slurm_state(fields[1], exit_code));
    }
    states
}

fn slurm_state(raw: &str, exit_code: Option<i32>) -> JobState {
    let state = raw.split_whitespace().next().unwrap_or_default();
    match state {
        "COMPLETED" => JobState::Succeeded,
        "TIMEOUT" => JobState::TimedOut,
        "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" => JobState::Pending,
        "RUNNING" | "CONFIGURING" | "COMPLETING" | "RESIZING" | "SUSPENDED" | "SIGNALING"
        | "STAGE_OUT" => JobState::Running,
        other => JobState::Failed {
            state: other.to_string(),
            exit_code,
        },
    }
}

/// `qstat -f` blocks; `Job Id: 1234[5].host` with `job_state` and `Exit_status`
fn parse_qstat(stdout: &str, instances: usize) -> BTreeMap<usize, JobState> {
    let mut states = BTreeMap::new();
    let mut current: Option<usize> = None;
    let mut job_state = String::new();
    let mut exit_status: Option<i32> = None;

    let mut flush = |index: Option<usize>, state: &str, exit: Option<i32>| {
        if let Some(index) = index {
            states.insert(index, pbs_state(state, exit));
        }
    };

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(id) = line.strip_prefix("Job Id:") {
            flush(current, &job_state, exit_status);
            let id = id.trim();
            current = match PBS_SUBJOB.captures(id) {
                Some(c) => c.get(1).and_then(|m| m.as_str().parse().ok()),
                // The array parent (`1234[]`) is not an element
                None if id.contains("[]") => None,
                None if instances == 1 => Some(0),
                None => None,
            };
            job_state.clear();
            exit_status = None;
        } else if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "job_state" => job_state = value.trim().to_string(),
                "Exit_status" => exit_status = value.trim().parse().ok(),
                _ => {}
            }
        }
    }
    flush(current, &job_state, exit_status);
    states
}

fn pbs_state(state: &str, exit_status: Option<i32>) -> JobState {
    match state {
        "F" | "X" => match exit_status {
            Some(0) => JobState::Succeeded,
            // JOB_EXEC_KILL_WALLTIME, or 256 + SIGTERM from the MOM
            Some(-29) | Some(271) => JobState::TimedOut,
            code => JobState::Failed {
                state: state.to_string(),
                exit_code: code,
            },
        },
        "R" | "E" | "S" | "U" => JobState::Running,
        _ => JobState::Pending,
    }
}

/// `bjobs -o "jobindex stat exit_code"` lines; indices are 1-based
fn parse_bjobs(stdout: &str) -> BTreeMap<usize, JobState> {
    let mut states = BTreeMap::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }
        let Ok(raw_index) = fields[0].parse::<usize>() else {
            continue;
        };
        let index = raw_index.saturating_sub(1);
        let exit_code = fields.get(2).and_then(|c| c.parse::<i32>().ok());
        let state = match fields[1] {
            "DONE" => JobState::Succeeded,
            // TERM_RUNLIMIT
            "EXIT" if exit_code == Some(140) => JobState::TimedOut,
            "RUN" | "USUSP" | "SSUSP" => JobState::Running,
            "PEND" | "PSUSP" | "WAIT" | "PROV" => JobState::Pending,
            other => JobState::Failed {
                state: other.to_string(),
                exit_code,
            },
        };
        states.insert(index, state);
    }
    states
}
