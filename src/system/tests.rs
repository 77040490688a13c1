use super::*;
use crate::error::ErrorCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Registry with a target that records indices and fails for `fail_index`
fn recording_registry(
    seen: &Arc<Mutex<Vec<usize>>>,
    fail_index: Option<usize>,
) -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    let seen = Arc::clone(seen);
    registry.register_fn("solver.forward", move |ctx: TaskContext| {
        let seen = Arc::clone(&seen);
        async move {
            if Some(ctx.index) == fail_index {
                return Err(TomoflowError::step_failure("solver exited with code 3"));
            }
            seen.lock().unwrap().push(ctx.index);
            Ok(())
        }
    });
    registry.register_fn("slow", |ctx: TaskContext| async move {
        if ctx.index == 1 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(())
    });
    Arc::new(registry)
}

fn sorted(seen: &Arc<Mutex<Vec<usize>>>) -> Vec<usize> {
    let mut v = seen.lock().unwrap().clone();
    v.sort_unstable();
    v
}

#[test]
fn test_system_kind_parsing() {
    assert_eq!("serial".parse::<SystemKind>().unwrap(), SystemKind::Serial);
    assert_eq!("LOCAL".parse::<SystemKind>().unwrap(), SystemKind::LocalParallel);
    assert_eq!(
        "slurm".parse::<SystemKind>().unwrap(),
        SystemKind::RemoteBatch(SchedulerKind::Slurm)
    );
    assert!("condor".parse::<SystemKind>().unwrap_err().is_configuration());
}

#[tokio::test]
async fn test_serial_runs_every_index_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = SerialSystem::new(recording_registry(&seen, None));

    let report = system
        .run(TaskSubmission::new("solver.forward").fan_out(4))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(report.instances, 4);
    assert_eq!(report.target, "solver.forward");
}

#[tokio::test]
async fn test_serial_stops_at_first_failure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = SerialSystem::new(recording_registry(&seen, Some(1)));

    let err = system
        .run(TaskSubmission::new("solver.forward").fan_out(4))
        .await
        .unwrap_err();

    assert_eq!(err.instance(), Some(1));
    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_local_failure_names_instance() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = LocalSystem::new(recording_registry(&seen, Some(2)), 4);

    let err = system
        .run(TaskSubmission::new("solver.forward").fan_out(4))
        .await
        .unwrap_err();

    assert!(err.is_step_failure());
    assert_eq!(err.instance(), Some(2));
    assert_eq!(err.code(), ErrorCode::STEP_INSTANCE_FAILED);
    assert!(err.to_string().contains("task 'solver.forward' instance 2"));
}

#[tokio::test]
async fn test_local_failure_does_not_wait_for_stragglers() {
    let mut registry = TaskRegistry::new();
    registry.register_fn("solver.forward", |ctx: TaskContext| async move {
        match ctx.index {
            1 => tokio::time::sleep(Duration::from_secs(30)).await,
            2 => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                return Err(TomoflowError::step_failure("solver exited with code 3"));
            }
            _ => {}
        }
        Ok(())
    });
    let system = LocalSystem::new(Arc::new(registry), 4);

    let started = std::time::Instant::now();
    let err = system
        .run(TaskSubmission::new("solver.forward").fan_out(4))
        .await
        .unwrap_err();

    assert_eq!(err.instance(), Some(2));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_local_runs_all_instances() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = LocalSystem::new(recording_registry(&seen, None), 3);

    let report = system
        .run(TaskSubmission::new("solver.forward").fan_out(10))
        .await
        .unwrap();

    assert_eq!(sorted(&seen), (0..10).collect::<Vec<_>>());
    assert_eq!(report.instances, 10);
}

#[tokio::test]
async fn test_local_respects_concurrency_limit() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = TaskRegistry::new();
    {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        registry.register_fn("gauge", move |_ctx: TaskContext| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let system = LocalSystem::new(Arc::new(registry), 2);
    system
        .run(TaskSubmission::new("gauge").fan_out(8))
        .await
        .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_single_runs_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&seen, None);

    for system in [
        Arc::new(SerialSystem::new(Arc::clone(&registry))) as Arc<dyn System>,
        Arc::new(LocalSystem::new(Arc::clone(&registry), 4)) as Arc<dyn System>,
    ] {
        seen.lock().unwrap().clear();
        let report = system
            .run(TaskSubmission::new("solver.forward").fan_out(4).single())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(report.instances, 1);
    }
}

#[tokio::test]
async fn test_timeout_names_instance_and_elapsed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = LocalSystem::new(recording_registry(&seen, None), 4);

    let err = system
        .run(
            TaskSubmission::new("slow")
                .fan_out(3)
                .timeout(Some(Duration::from_millis(50))),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.instance(), Some(1));
    assert_eq!(err.exit_code(), 6);
    match err {
        TomoflowError::DispatchTimeout { elapsed, limit, .. } => {
            assert!(elapsed >= limit);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_target_and_zero_fan_out_rejected() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let system = SerialSystem::new(recording_registry(&seen, None));

    let err = system.run(TaskSubmission::new("nope")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_UNKNOWN_TARGET);

    let err = system
        .run(TaskSubmission::new("solver.forward").fan_out(0))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_kwargs_reach_every_instance() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TaskRegistry::new();
    {
        let seen = Arc::clone(&seen);
        registry.register_fn("echo", move |ctx: TaskContext| {
            let seen = Arc::clone(&seen);
            async move {
                let model = ctx.require_kwarg_str("model")?.to_string();
                seen.lock().unwrap().push((ctx.index, ctx.fan_out, model));
                Ok(())
            }
        });
    }

    SerialSystem::new(Arc::new(registry))
        .run(
            TaskSubmission::new("echo")
                .fan_out(2)
                .kwarg("model", json!("model_init")),
        )
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (0, 2, "model_init".to_string()),
            (1, 2, "model_init".to_string())
        ]
    );
}

#[test]
fn test_task_index_discovery() {
    let lookup = |vars: &'static [(&'static str, &'static str)]| {
        move |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    };

    assert_eq!(task_index_from(lookup(&[]), 4).unwrap(), 0);
    assert_eq!(task_index_from(lookup(&[(TASKID_ENV, "2")]), 4).unwrap(), 2);
    assert_eq!(
        task_index_from(lookup(&[("SLURM_ARRAY_TASK_ID", "3")]), 4).unwrap(),
        3
    );
    assert_eq!(
        task_index_from(lookup(&[("PBS_ARRAY_INDEX", "1")]), 4).unwrap(),
        1
    );
    assert_eq!(task_index_from(lookup(&[("LSB_JOBINDEX", "4")]), 4).unwrap(), 3);

    let err = task_index_from(lookup(&[("SLURM_ARRAY_TASK_ID", "x")]), 4).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_TASK_INDEX);
    assert!(task_index_from(lookup(&[(TASKID_ENV, "4")]), 4).is_err());
    assert!(task_index_from(lookup(&[("LSB_JOBINDEX", "0")]), 4).is_err());
}
