use super::*;
use crate::checkpoint::CheckpointStore;
use crate::collaborators::{Optimizer, Preprocessor, Solver, SolverAction, TrialVerdict};
use crate::config::RawParameters;
use crate::flow::FlowExecutor;
use crate::system::{Kwargs, SerialSystem, System};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct FakeSolver {
    calls: Mutex<Vec<(SolverAction, usize, Option<String>)>>,
}

impl FakeSolver {
    fn models(&self, action: SolverAction) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _, _)| *a == action)
            .filter_map(|(_, _, m)| m.clone())
            .collect()
    }

    fn count(&self, action: SolverAction) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _, _)| *a == action)
            .count()
    }
}

#[async_trait]
impl Solver for FakeSolver {
    async fn run_one(
        &self,
        action: SolverAction,
        task_index: usize,
        kwargs: &Kwargs,
    ) -> anyhow::Result<()> {
        let model = kwargs.get("model").and_then(Value::as_str).map(String::from);
        self.calls.lock().unwrap().push((action, task_index, model));
        if action == SolverAction::ProcessKernels {
            let grad = PathBuf::from(kwargs["gradient"].as_str().unwrap());
            std::fs::create_dir_all(&grad)?;
            std::fs::write(grad.join("gradient"), "0.1 0.2")?;
        }
        Ok(())
    }
}

struct FakePreprocess {
    misfits: Mutex<VecDeque<f64>>,
    misfit_calls: Mutex<usize>,
    masks: Mutex<Vec<Option<PathBuf>>>,
}

impl FakePreprocess {
    fn new(misfits: &[f64]) -> Self {
        Self {
            misfits: Mutex::new(misfits.iter().copied().collect()),
            misfit_calls: Mutex::new(0),
            masks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Preprocessor for FakePreprocess {
    async fn misfit(&self, _task_index: usize, kwargs: &Kwargs) -> anyhow::Result<()> {
        assert!(kwargs.contains_key("obs"));
        *self.misfit_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn sum_residuals(&self, residuals: &Path) -> anyhow::Result<f64> {
        assert!(residuals.is_dir());
        self.misfits
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no more misfit values"))
    }

    async fn scale_gradient(
        &self,
        _gradient: &Path,
        _model: &Path,
        mask: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.masks.lock().unwrap().push(mask.map(Path::to_path_buf));
        Ok(())
    }
}

struct FakeOptimizer {
    dir: PathBuf,
    directions: Mutex<usize>,
    gradients: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Optimizer for FakeOptimizer {
    async fn compute_step_direction(&self, gradient: &Path) -> anyhow::Result<PathBuf> {
        *self.directions.lock().unwrap() += 1;
        self.gradients.lock().unwrap().push(gradient.to_path_buf());
        Ok(self.direction_path())
    }

    fn direction_path(&self) -> PathBuf {
        self.dir.join("p_new")
    }

    async fn propose_trial(&self, trial: usize, _direction: &Path) -> anyhow::Result<PathBuf> {
        Ok(self.dir.join(format!("m_try_{}", trial)))
    }

    fn evaluate_trial(&self, f_try: f64, f_current: f64) -> TrialVerdict {
        if f_try < f_current {
            TrialVerdict::Accept
        } else {
            TrialVerdict::Retry
        }
    }

    async fn finalize(&self, iteration: usize, _accepted: &Path) -> anyhow::Result<PathBuf> {
        let model = self.dir.join(format!("m_new_{}", iteration));
        std::fs::create_dir_all(&model)?;
        Ok(model)
    }
}

struct Harness {
    solver: Arc<FakeSolver>,
    preprocess: Arc<FakePreprocess>,
    optimizer: Arc<FakeOptimizer>,
    params: Arc<Parameters>,
    executor: FlowExecutor,
}

fn parameters(dir: &TempDir, kind: WorkflowKind, extra: &[(&str, Value)]) -> Parameters {
    let mut raw = RawParameters::new();
    raw.set("CASE", "synthetic");
    raw.set("MODEL_INIT", "model_init");
    raw.set("MODEL_TRUE", "model_true");
    raw.set("NTASK", 2);
    raw.set("SOLVER_BIN", "solver");
    raw.set("PREPROCESS_BIN", "preprocess");
    raw.set("OPTIMIZE_BIN", "optimize");
    raw.set("END", 2);
    raw.set("STEP_COUNT_MAX", 3);
    for (key, value) in extra {
        raw.set(key, value.clone());
    }
    kind.parameter_registry().resolve(&raw, dir.path()).unwrap()
}

fn harness(dir: &TempDir, kind: WorkflowKind, extra: &[(&str, Value)], misfits: &[f64]) -> Harness {
    let params = Arc::new(parameters(dir, kind, extra));
    let solver = Arc::new(FakeSolver::default());
    let preprocess = Arc::new(FakePreprocess::new(misfits));
    let optimizer = Arc::new(FakeOptimizer {
        dir: dir.path().join("optimize"),
        directions: Mutex::new(0),
        gradients: Mutex::new(Vec::new()),
    });

    let collaborators = Collaborators::new(solver.clone(), preprocess.clone())
        .with_optimizer(optimizer.clone());
    let tasks = Arc::new(kind.task_registry(&collaborators));
    let system: Arc<dyn System> = Arc::new(SerialSystem::new(tasks));
    let ctx = Arc::new(WorkflowContext::new(
        kind,
        Arc::clone(&params),
        system,
        collaborators,
    ));

    let (first, last) = kind.pass_range(&params).unwrap();
    let store = CheckpointStore::new(params.require_path("OUTPUT").unwrap());
    let executor = FlowExecutor::new(kind.name(), kind.flow(&ctx).unwrap(), store)
        .with_passes(first, last)
        .unwrap()
        .with_state(kind.initial_state(&params));

    Harness {
        solver,
        preprocess,
        optimizer,
        params,
        executor,
    }
}

fn abs(dir: &TempDir, relative: &str) -> String {
    dir.path().join(relative).display().to_string()
}

#[test]
fn test_step_names_match_built_flows() {
    let dir = TempDir::new().unwrap();
    for kind in WorkflowKind::ALL {
        let h = harness(&dir, kind, &[], &[]);
        assert_eq!(h.executor.step_names(), kind.step_names());
    }
    assert_eq!(WorkflowKind::Forward.step_names().len(), 3);
    assert_eq!(WorkflowKind::Migration.step_names().len(), 6);
    assert_eq!(
        WorkflowKind::Inversion.step_names().last(),
        Some(&"finalize_iteration")
    );
}

#[test]
fn test_workflow_kind_parsing() {
    assert_eq!(
        "Inversion".parse::<WorkflowKind>().unwrap(),
        WorkflowKind::Inversion
    );
    let err = "tomography".parse::<WorkflowKind>().unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_UNKNOWN_WORKFLOW);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_migration_relaxes_case_and_declares_grad() {
    let dir = TempDir::new().unwrap();
    let mut raw = RawParameters::new();
    raw.set("MODEL_INIT", "m");
    raw.set("DATA", "obs");
    raw.set("SOLVER_BIN", "s");
    raw.set("PREPROCESS_BIN", "p");

    assert!(WorkflowKind::Forward
        .parameter_registry()
        .resolve(&raw, dir.path())
        .is_err());

    let params = WorkflowKind::Migration
        .parameter_registry()
        .resolve(&raw, dir.path())
        .unwrap();
    assert_eq!(params.get_str("CASE"), Some("data"));
    assert_eq!(
        params.get_path("GRAD"),
        Some(dir.path().join("scratch/evalgrad").as_path())
    );
    assert!(params.get_path("MASK").is_none());
}

#[test]
fn test_inversion_parameters_checked_together() {
    let dir = TempDir::new().unwrap();
    let mut raw = RawParameters::new();
    raw.set("CASE", "data");
    raw.set("MODEL_INIT", "m");
    raw.set("DATA", "obs");
    raw.set("SOLVER_BIN", "s");
    raw.set("PREPROCESS_BIN", "p");

    let err = WorkflowKind::Inversion
        .parameter_registry()
        .resolve(&raw, dir.path())
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("END"));
    assert!(message.contains("OPTIMIZE_BIN"));

    raw.set("OPTIMIZE_BIN", "o");
    raw.set("BEGIN", 3);
    raw.set("END", 2);
    let err = WorkflowKind::Inversion
        .parameter_registry()
        .resolve(&raw, dir.path())
        .unwrap_err();
    assert!(err.to_string().contains("must not precede BEGIN"));
}

#[tokio::test]
async fn test_forward_generates_data_then_measures_misfit() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, WorkflowKind::Forward, &[], &[4.5]);

    let summary = h.executor.run(None, None).await.unwrap();
    assert_eq!(summary.executed.len(), 3);

    let models = h.solver.models(SolverAction::Forward);
    assert_eq!(
        models,
        vec![
            abs(&dir, "model_true"),
            abs(&dir, "model_true"),
            abs(&dir, "model_init"),
            abs(&dir, "model_init"),
        ]
    );
    assert_eq!(*h.preprocess.misfit_calls.lock().unwrap(), 2);
    assert_eq!(h.executor.state().lock().await.get("f_new"), Some(&json!(4.5)));

    let record = h.executor.store().load().await.unwrap().unwrap();
    assert!(record.is_completed());
    assert_eq!(record.last_completed_step, "evaluate_objective_function");
}

#[tokio::test]
async fn test_data_case_skips_generation_and_uses_data() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        &dir,
        WorkflowKind::Forward,
        &[("CASE", json!("data")), ("DATA", json!("observed"))],
        &[1.0],
    );

    h.executor.run(None, None).await.unwrap();
    assert_eq!(h.solver.count(SolverAction::Forward), 2);
}

#[tokio::test]
async fn test_migration_scales_and_saves_gradient() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        &dir,
        WorkflowKind::Migration,
        &[("MASK", json!("mask"))],
        &[2.0],
    );

    h.executor.run(None, None).await.unwrap();

    assert_eq!(h.solver.count(SolverAction::Adjoint), 2);
    assert_eq!(h.solver.count(SolverAction::ProcessKernels), 1);
    assert_eq!(
        *h.preprocess.masks.lock().unwrap(),
        vec![Some(dir.path().join("mask"))]
    );

    let saved = h
        .params
        .require_path("OUTPUT")
        .unwrap()
        .join("gradient_0001");
    assert_eq!(std::fs::read_to_string(saved).unwrap(), "0.1 0.2");
}

#[tokio::test]
async fn test_inversion_line_search_over_two_iterations() {
    let dir = TempDir::new().unwrap();
    // pass 1: initial misfit, rejected trial, accepted trial; pass 2: accepted trial
    let h = harness(&dir, WorkflowKind::Inversion, &[], &[10.0, 12.0, 8.0, 5.0]);

    let summary = h.executor.run(None, None).await.unwrap();
    assert!(!summary.stopped_early);
    assert_eq!(summary.executed.len(), 18);

    let opt = dir.path().join("optimize");
    let p = |name: &str| opt.join(name).display().to_string();
    assert_eq!(
        h.solver.models(SolverAction::Forward),
        vec![
            abs(&dir, "model_true"),
            abs(&dir, "model_true"),
            abs(&dir, "model_init"),
            abs(&dir, "model_init"),
            p("m_try_1"),
            p("m_try_1"),
            p("m_try_2"),
            p("m_try_2"),
            p("m_try_1"),
            p("m_try_1"),
        ]
    );
    assert_eq!(
        h.solver.models(SolverAction::Adjoint),
        vec![
            abs(&dir, "model_init"),
            abs(&dir, "model_init"),
            p("m_new_1"),
            p("m_new_1"),
        ]
    );
    assert_eq!(*h.optimizer.directions.lock().unwrap(), 2);

    let state = h.executor.state();
    let state = state.lock().await;
    assert_eq!(state.get("model"), Some(&json!(p("m_new_2"))));
    assert_eq!(state.get("f_new"), Some(&json!(5.0)));

    let output = h.params.require_path("OUTPUT").unwrap();
    assert!(output.join("model_0001").is_dir());
    assert!(output.join("model_0002").is_dir());
}

#[tokio::test]
async fn test_exhausted_line_search_is_step_failure() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, WorkflowKind::Inversion, &[], &[1.0, 2.0, 3.0, 4.0]);

    let err = h.executor.run(None, None).await.unwrap_err();
    assert!(err.is_step_failure());
    assert_eq!(err.step(), Some("perform_line_search"));
    assert_eq!(err.pass(), Some(1));
    assert!(err.to_string().contains("after 3 trial(s)"));

    let record = h.executor.store().load().await.unwrap().unwrap();
    assert_eq!(record.last_completed_step, "compute_direction");
    assert!(!record.is_completed());
}

#[tokio::test]
async fn test_line_search_resumes_with_checkpointed_state() {
    let dir = TempDir::new().unwrap();
    let first = harness(&dir, WorkflowKind::Inversion, &[], &[10.0]);
    let summary = first
        .executor
        .run(None, Some("compute_direction"))
        .await
        .unwrap();
    assert!(summary.stopped_early);

    // a new process only knows what the checkpoint recorded
    let second = harness(&dir, WorkflowKind::Inversion, &[("END", json!(1))], &[9.0]);
    let summary = second.executor.run(None, None).await.unwrap();
    assert_eq!(
        summary.executed,
        vec![
            (1, "perform_line_search".to_string()),
            (1, "finalize_iteration".to_string())
        ]
    );
    assert_eq!(second.solver.count(SolverAction::Adjoint), 0);
}

#[tokio::test]
async fn test_direction_falls_back_to_grad_directory() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, WorkflowKind::Inversion, &[], &[]);

    // nothing computed a gradient in this run, so the state has none
    let summary = h
        .executor
        .run(Some("compute_direction"), Some("compute_direction"))
        .await
        .unwrap();
    assert_eq!(summary.executed, vec![(1, "compute_direction".to_string())]);

    let grad = h.params.require_path("GRAD").unwrap();
    assert_eq!(
        *h.optimizer.gradients.lock().unwrap(),
        vec![grad.join("gradient")]
    );
}
