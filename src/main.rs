use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tomoflow::checkpoint::{CheckpointStore, CHECKPOINT_FILE};
use tomoflow::collaborators::Collaborators;
use tomoflow::config::{ParamKind, Parameters, RawParameters, DEFAULT_PARAMETER_FILE};
use tomoflow::error::{ErrorCode, TomoflowError};
use tomoflow::flow::FlowExecutor;
use tomoflow::msg::{self, CliBlock};
use tomoflow::signal_handler::{setup_interrupt_handlers, setup_worker_signal_handlers};
use tomoflow::subprocess::{ProcessRunner, TokioProcessRunner};
use tomoflow::system::{build_system, discover_task_index, Kwargs, TaskContext, WorkerInvocation};
use tomoflow::workflow::{WorkflowContext, WorkflowKind};
use tracing::{debug, error, info, trace, warn};

/// Resumable seismic inversion workflows
#[derive(Parser)]
#[command(name = "tomoflow", version)]
#[command(about = "Run forward, migration and inversion workflows with checkpointed resume", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Parameter file, relative to the working directory
    #[arg(short, long, default_value = DEFAULT_PARAMETER_FILE, global = true)]
    parameters: PathBuf,

    /// Working directory
    #[arg(short, long, default_value = ".", global = true)]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow, resuming from the checkpoint when one exists
    Run {
        /// forward, migration or inversion
        workflow: String,

        /// Start at this step instead of the checkpointed position
        #[arg(long)]
        resume_from: Option<String>,

        /// Stop after this step (inclusive)
        #[arg(long)]
        stop_after: Option<String>,
    },
    /// Print the numbered steps of a workflow
    PrintFlow { workflow: String },
    /// Validate the parameter file, listing every problem
    Check { workflow: String },
    /// List the parameters a workflow declares
    Params { workflow: String },
    /// Show the checkpoint record
    Status,
    /// Delete the checkpoint record so the next run starts over
    Restart,
    /// Run one instance of a dispatch target (used by batch jobs)
    #[command(hide = true)]
    Task {
        workflow: String,
        target: String,

        /// Task arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,

        /// Task index; discovered from the scheduler environment when absent
        #[arg(long)]
        index: Option<usize>,

        #[arg(long, default_value = "1")]
        fan_out: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,tokio=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .with_writer(std::io::stderr)
        .init();

    debug!("tomoflow started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match run(&cli).await {
        Ok(()) => return,
        Err(e) => e,
    };

    match result.downcast_ref::<TomoflowError>() {
        Some(e) => {
            error!("Fatal error: {}", e);
            eprintln!("Error: {}", e.user_message());
            if let Some(hint) = e.resume_hint() {
                eprintln!("Hint: {}", hint);
            }
            std::process::exit(e.exit_code());
        }
        None => {
            error!("Fatal error: {:#}", result);
            eprintln!("Error: {:#}", result);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let paths = Paths::new(cli)?;
    match &cli.command {
        Commands::Run {
            workflow,
            resume_from,
            stop_after,
        } => {
            run_workflow(
                &paths,
                workflow.parse()?,
                resume_from.as_deref(),
                stop_after.as_deref(),
            )
            .await
        }
        Commands::PrintFlow { workflow } => print_flow(workflow.parse()?),
        Commands::Check { workflow } => check(&paths, workflow.parse()?).await,
        Commands::Params { workflow } => list_params(workflow.parse()?),
        Commands::Status => status(&paths).await,
        Commands::Restart => restart(&paths).await,
        Commands::Task {
            workflow,
            target,
            kwargs,
            index,
            fan_out,
        } => {
            run_task(
                &paths,
                workflow.parse()?,
                target,
                kwargs.as_deref(),
                *index,
                *fan_out,
            )
            .await
        }
    }
}

/// Absolute working directory and parameter file
struct Paths {
    workdir: PathBuf,
    parameter_file: PathBuf,
}

impl Paths {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("cannot determine the current directory")?;
        let workdir = cwd.join(&cli.workdir);
        let parameter_file = workdir.join(&cli.parameters);
        Ok(Self {
            workdir,
            parameter_file,
        })
    }

    async fn raw(&self) -> tomoflow::Result<RawParameters> {
        let mut raw = RawParameters::load(&self.parameter_file).await?;
        raw.merge_env_vars();
        Ok(raw)
    }

    async fn parameters(&self, kind: WorkflowKind) -> tomoflow::Result<Arc<Parameters>> {
        let raw = self.raw().await?;
        let params = kind.parameter_registry().resolve(&raw, &self.workdir)?;
        Ok(Arc::new(params))
    }

    /// Checkpoint store located without resolving a whole workflow
    async fn store(&self) -> CheckpointStore {
        let raw = match self.raw().await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Using default locations: {}", e);
                RawParameters::new()
            }
        };
        let lookup = |key: &str| raw.get(key).and_then(Value::as_str).map(PathBuf::from);
        let workdir = lookup("WORKDIR")
            .map(|w| self.workdir.join(w))
            .unwrap_or_else(|| self.workdir.clone());
        let output = lookup("OUTPUT").unwrap_or_else(|| PathBuf::from("output"));
        CheckpointStore::new(workdir.join(output))
    }
}

async fn run_workflow(
    paths: &Paths,
    kind: WorkflowKind,
    resume_from: Option<&str>,
    stop_after: Option<&str>,
) -> anyhow::Result<()> {
    let params = paths.parameters(kind).await?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let collaborators = Collaborators::from_parameters(&params, Arc::clone(&runner))?;
    let tasks = Arc::new(kind.task_registry(&collaborators));

    let worker = WorkerInvocation {
        workflow: kind.name().to_string(),
        program: std::env::current_exe().context("cannot locate the tomoflow executable")?,
        parameter_file: paths.parameter_file.clone(),
        workdir: paths.workdir.clone(),
    };
    let system = build_system(&params, tasks, runner, worker)?;
    let ctx = Arc::new(WorkflowContext::new(
        kind,
        Arc::clone(&params),
        system,
        collaborators,
    ));

    let store = CheckpointStore::new(params.require_path("OUTPUT")?);
    setup_interrupt_handlers(store.clone(), kind.name().to_string())?;

    let (first, last) = kind.pass_range(&params)?;
    let executor = FlowExecutor::new(kind.name(), kind.flow(&ctx)?, store)
        .with_passes(first, last)?
        .with_state(kind.initial_state(&params));

    let resume_from = resume_from.or_else(|| params.get_str("RESUME_FROM"));
    let stop_after = stop_after.or_else(|| params.get_str("STOP_AFTER"));
    let summary = executor.run(resume_from, stop_after).await?;

    if summary.already_complete {
        println!("{} already completed; run `tomoflow restart` to start over", kind);
    } else if summary.stopped_early {
        if let Some((pass, step)) = summary.executed.last() {
            println!("Stopped after step '{}' (pass {})", step, pass);
        }
    } else {
        println!(
            "{} finished: {} step(s) executed",
            kind,
            summary.executed.len()
        );
    }
    Ok(())
}

fn print_flow(kind: WorkflowKind) -> anyhow::Result<()> {
    println!("{}", msg::sub(&format!("{} flow", kind)));
    for (i, name) in kind.step_names().iter().enumerate() {
        println!("{:>3}: {}", i + 1, name);
    }
    Ok(())
}

async fn check(paths: &Paths, kind: WorkflowKind) -> anyhow::Result<()> {
    let raw = paths.raw().await?;
    match kind.parameter_registry().resolve(&raw, &paths.workdir) {
        Ok(_) => {
            println!(
                "{} is valid for the {} workflow",
                paths.parameter_file.display(),
                kind
            );
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            let mut lines = message.lines();
            let summary = lines.next().unwrap_or_default().to_string();
            let block = CliBlock::new(format!(
                "{} in {}",
                summary,
                paths.parameter_file.display()
            ))
            .header("parameter error")
            .items(lines.map(|l| l.trim().trim_start_matches("- ").to_string()))
            .border('=');
            eprintln!("{}", block);
            std::process::exit(e.exit_code());
        }
    }
}

fn list_params(kind: WorkflowKind) -> anyhow::Result<()> {
    println!("{}", msg::sub(&format!("{} parameters", kind)));
    for spec in kind.parameter_registry().specs() {
        let kind = match spec.kind {
            ParamKind::Par => spec.param_type.to_string(),
            ParamKind::Path => "path".to_string(),
        };
        let requirement = match (&spec.default, spec.required) {
            (Some(default), _) => format!("default: {}", default),
            (None, true) => "required".to_string(),
            (None, false) => "optional".to_string(),
        };
        println!("{} ({}, {})", spec.name, kind, requirement);
        for line in msg::wrap(&spec.docstr, msg::WIDTH - 4) {
            println!("    {}", line);
        }
    }
    Ok(())
}

async fn status(paths: &Paths) -> anyhow::Result<()> {
    let store = paths.store().await;
    match store.load().await? {
        Some(record) => {
            println!("workflow:  {}", record.workflow);
            println!("last step: {}", record.last_completed_step);
            println!("pass:      {}", record.pass);
            println!("status:    {}", record.status);
            println!("updated:   {}", record.updated_at.to_rfc3339());
            println!("run id:    {}", record.run_id);
            if !record.state.is_empty() {
                let keys: Vec<&str> = record.state.keys().map(String::as_str).collect();
                println!("state:     {}", keys.join(", "));
            }
        }
        None => println!("No checkpoint at {}", store.path().display()),
    }
    Ok(())
}

async fn restart(paths: &Paths) -> anyhow::Result<()> {
    let store = paths.store().await;
    if store.clear().await? {
        info!("Removed {}", store.path().display());
        println!("Checkpoint removed; the next run starts from the first step");
    } else {
        println!("No {} to remove", CHECKPOINT_FILE);
    }
    Ok(())
}

async fn run_task(
    paths: &Paths,
    kind: WorkflowKind,
    target: &str,
    kwargs: Option<&str>,
    index: Option<usize>,
    fan_out: usize,
) -> anyhow::Result<()> {
    let params = paths.parameters(kind).await?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let collaborators = Collaborators::from_parameters(&params, runner)?;
    let task = kind.task_registry(&collaborators).require(target)?;

    let kwargs: Kwargs = match kwargs {
        Some(json) => serde_json::from_str(json).map_err(TomoflowError::from)?,
        None => Kwargs::new(),
    };
    let index = match index {
        Some(index) => index,
        None => discover_task_index(fan_out)?,
    };
    if index >= fan_out {
        return Err(TomoflowError::configuration_with_code(
            ErrorCode::CONFIG_TASK_INDEX,
            format!("task index {} is outside 0..{}", index, fan_out),
            Some("--index".to_string()),
        )
        .into());
    }

    setup_worker_signal_handlers()?;
    info!("Running '{}' instance {} of {}", target, index, fan_out);
    if let Err(e) = task
        .run_one(TaskContext::new(index, fan_out, kwargs))
        .await
    {
        let e = e.for_instance(target, index);
        warn!("Instance {} of '{}' failed", index, target);
        return Err(e.into());
    }
    Ok(())
}
