use super::*;
use crate::subprocess::MockProcessRunner;
use serde_json::json;
use tempfile::TempDir;

fn remote(scheduler: SchedulerKind, dir: &TempDir) -> (RemoteBatchSystem, MockProcessRunner) {
    let mut registry = TaskRegistry::new();
    registry.register_fn("solver.forward", |_ctx| async { Ok(()) });

    let mock = MockProcessRunner::new();
    let config = RemoteBatchConfig {
        worker: WorkerInvocation {
            workflow: "forward".to_string(),
            program: PathBuf::from("/opt/bin/tomoflow"),
            parameter_file: dir.path().join("parameters.yaml"),
            workdir: dir.path().to_path_buf(),
        },
        nproc: 4,
        poll_interval: Duration::from_millis(5),
        scheduler_args: vec!["--partition=debug".to_string()],
        log_dir: dir.path().join("scratch/logs"),
    };
    let system = RemoteBatchSystem::new(
        scheduler,
        Arc::new(registry),
        Arc::new(mock.clone()),
        config,
    );
    (system, mock)
}

fn submission() -> TaskSubmission {
    TaskSubmission::new("solver.forward")
        .fan_out(3)
        .kwarg("model", json!("/scratch/model"))
}

#[tokio::test]
async fn test_slurm_pending_then_completed() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch")
        .with_args(|args| args.iter().any(|a| a == "--array=0-2"))
        .stdout("4242\n")
        .register();
    mock.expect("sacct")
        .stdout("4242_0|RUNNING|0:0\n4242_[1-2]|PENDING|0:0\n")
        .times(1)
        .register();
    mock.expect("sacct")
        .stdout(
            "4242_0|COMPLETED|0:0\n4242_0.batch|COMPLETED|0:0\n4242_1|COMPLETED|0:0\n4242_2|COMPLETED|0:0\n",
        )
        .register();

    let report = system.run(submission()).await.unwrap();

    assert_eq!(report.instances, 3);
    assert_eq!(mock.call_count("sacct"), 2);
    assert_eq!(mock.call_count("scancel"), 0);
    assert!(dir.path().join("scratch/logs").is_dir());

    let submit = &mock.calls()[0];
    assert!(submit.args.contains(&"--partition=debug".to_string()));
    assert!(submit.args.contains(&"--ntasks=4".to_string()));
    let wrap = submit.args.iter().find(|a| a.starts_with("--wrap=")).unwrap();
    assert!(wrap.contains("task forward solver.forward"));
    assert!(wrap.contains("--fan-out 3"));
}

#[tokio::test]
async fn test_slurm_failure_cancels_job_and_names_instance() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch").stdout("77;cluster\n").register();
    mock.expect("sacct")
        .stdout("77_0|COMPLETED|0:0\n77_1|FAILED|2:0\n77_2|RUNNING|0:0\n")
        .register();
    mock.expect("scancel")
        .with_args(|args| args == ["77"])
        .register();

    let err = system.run(submission()).await.unwrap_err();

    assert!(err.is_step_failure());
    assert_eq!(err.instance(), Some(1));
    assert!(err.to_string().contains("FAILED"));
    assert_eq!(mock.call_count("scancel"), 1);
}

#[tokio::test]
async fn test_slurm_timeout_state() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch").stdout("9\n").register();
    mock.expect("sacct")
        .stdout("9_0|COMPLETED|0:0\n9_1|COMPLETED|0:0\n9_2|TIMEOUT|0:15\n")
        .register();
    mock.expect("scancel").register();

    let err = system
        .run(submission().timeout(Some(Duration::from_secs(60))))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.instance(), Some(2));
    assert_eq!(err.code(), ErrorCode::TIMEOUT_SCHEDULER);
    let submit = &mock.calls()[0];
    assert!(submit.args.contains(&"--time=1".to_string()));
}

#[tokio::test]
async fn test_watchdog_cancels_stuck_job() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch").stdout("5\n").register();
    mock.expect("sacct")
        .stdout("5_0|COMPLETED|0:0\n5_1|RUNNING|0:0\n5_2|COMPLETED|0:0\n")
        .register();
    mock.expect("scancel").register();

    let err = system
        .run(submission().timeout(Some(Duration::from_millis(20))))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.instance(), Some(1));
    assert_eq!(err.code(), ErrorCode::TIMEOUT_INSTANCE);
    assert_eq!(mock.call_count("scancel"), 1);
}

#[tokio::test]
async fn test_queue_time_does_not_count_against_the_limit() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch").stdout("5\n").register();
    // Queued for roughly twice the limit before any element starts
    mock.expect("sacct")
        .stdout("5_[0-2]|PENDING|0:0\n")
        .times(20)
        .register();
    mock.expect("sacct")
        .stdout("5_0|RUNNING|0:0\n5_1|RUNNING|0:0\n5_2|PENDING|0:0\n")
        .times(1)
        .register();
    mock.expect("sacct")
        .stdout("5_0|COMPLETED|0:0\n5_1|COMPLETED|0:0\n5_2|COMPLETED|0:0\n")
        .register();
    mock.expect("scancel").register();

    let report = system
        .run(submission().timeout(Some(Duration::from_millis(50))))
        .await
        .unwrap();

    assert_eq!(report.instances, 3);
    assert!(report.elapsed > Duration::from_millis(50));
    assert_eq!(mock.call_count("sacct"), 22);
    assert_eq!(mock.call_count("scancel"), 0);
}

#[tokio::test]
async fn test_watchdog_counts_from_first_running_poll() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    mock.expect("sbatch").stdout("6\n").register();
    mock.expect("sacct")
        .stdout("6_[0-2]|PENDING|0:0\n")
        .times(10)
        .register();
    mock.expect("sacct")
        .stdout("6_0|COMPLETED|0:0\n6_1|COMPLETED|0:0\n6_2|RUNNING|0:0\n")
        .register();
    mock.expect("scancel").register();

    let err = system
        .run(submission().timeout(Some(Duration::from_millis(20))))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.instance(), Some(2));
    assert!(mock.call_count("sacct") > 11);
    assert_eq!(mock.call_count("scancel"), 1);
}

#[tokio::test]
async fn test_unparsable_job_id_is_step_failure() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Lsf, &dir);

    mock.expect("bsub")
        .stdout("Request rejected\n")
        .register();

    let err = system.run(submission()).await.unwrap_err();
    assert!(err.is_step_failure());
    assert_eq!(err.code(), ErrorCode::STEP_SCHEDULER_ERROR);
}

#[tokio::test]
async fn test_submit_failure_reports_stderr() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Pbs, &dir);

    mock.expect("qsub")
        .exit_code(38)
        .stderr("qsub: Unknown queue")
        .register();

    let err = system.run(submission()).await.unwrap_err();
    assert!(err.to_string().contains("Unknown queue"));
    assert_eq!(mock.call_count("qstat"), 0);
}

#[tokio::test]
async fn test_lsf_array_completes() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Lsf, &dir);

    mock.expect("bsub")
        .with_args(|args| args.iter().any(|a| a == "solver.forward[1-3]"))
        .stdout("Job <1001> is submitted to queue <normal>.\n")
        .register();
    mock.expect("bjobs")
        .with_args(|args| args.last().map(String::as_str) == Some("1001"))
        .stdout("1 DONE -\n2 DONE -\n3 DONE -\n")
        .register();

    system.run(submission()).await.unwrap();
}

#[tokio::test]
async fn test_pbs_array_completes() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Pbs, &dir);

    mock.expect("qsub")
        .stdout("555[].pbs01\n")
        .register();
    mock.expect("qstat")
        .stdout(
            "Job Id: 555[].pbs01\n    job_state = F\n\
             Job Id: 555[0].pbs01\n    job_state = X\n    Exit_status = 0\n\
             Job Id: 555[1].pbs01\n    job_state = X\n    Exit_status = 0\n\
             Job Id: 555[2].pbs01\n    job_state = X\n    Exit_status = 0\n",
        )
        .register();

    system.run(submission()).await.unwrap();
    let query = &mock.calls()[1];
    assert_eq!(query.args, vec!["-x", "-f", "-t", "555[].pbs01"]);
}

#[tokio::test]
async fn test_unknown_target_never_submits() {
    let dir = TempDir::new().unwrap();
    let (system, mock) = remote(SchedulerKind::Slurm, &dir);

    let err = system.run(TaskSubmission::new("nope")).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(mock.calls().is_empty());
}

#[test]
fn test_parse_job_ids() {
    assert_eq!(SchedulerKind::Slurm.parse_job_id("123;c1\n").unwrap(), "123");
    assert_eq!(SchedulerKind::Pbs.parse_job_id("88.server\n").unwrap(), "88.server");
    assert_eq!(
        SchedulerKind::Lsf
            .parse_job_id("Job <31> is submitted to default queue <normal>.")
            .unwrap(),
        "31"
    );
    assert!(SchedulerKind::Slurm.parse_job_id("sbatch: error").is_err());
}

#[test]
fn test_pbs_single_instance_has_no_array() {
    let dir = PathBuf::from("/scratch/logs");
    let request = SubmitRequest {
        job_name: "optimize.direction",
        instances: 1,
        nproc: 1,
        walltime: Some(Duration::from_secs(90 * 60)),
        log_dir: &dir,
        extra_args: &[],
        command: "true",
    };
    let args = SchedulerKind::Pbs.submit_args(&request);
    assert!(!args.contains(&"-J".to_string()));
    assert!(args.contains(&"walltime=01:30:00".to_string()));

    let states = SchedulerKind::Pbs.parse_states(
        "Job Id: 12.server\n    job_state = F\n    Exit_status = 1\n",
        1,
    );
    assert_eq!(
        states.get(&0),
        Some(&JobState::Failed {
            state: "F".to_string(),
            exit_code: Some(1)
        })
    );
}

#[test]
fn test_lsf_states_shift_to_zero_based() {
    let states = SchedulerKind::Lsf.parse_states("1 RUN -\n2 EXIT 140\n3 EXIT 1\n", 3);
    assert_eq!(states.get(&0), Some(&JobState::Running));
    assert_eq!(states.get(&1), Some(&JobState::TimedOut));
    assert!(matches!(states.get(&2), Some(JobState::Failed { .. })));
}
