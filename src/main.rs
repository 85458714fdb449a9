//! `ainews` binary: orchestrator lifecycle (`start`, `stop`, `restart`,
//! `status`) and single task runs (`run-once <task>`).

use ainews_pipeline::config::schedule::{CLEANER_TASK, LOGS_CLEANER_TASK};
use ainews_pipeline::config::{AppConfig, ENV_CONFIG_PATH};
use ainews_pipeline::staging::StagingStore;
use ainews_pipeline::supervisor::logs::{self, ORCHESTRATOR_LOG};
use ainews_pipeline::supervisor::snapshot;
use ainews_pipeline::supervisor::{
    shutdown_signal, PidFile, ServiceStatus, StopOutcome, Supervisor, SupervisorError,
};
use ainews_pipeline::{store, telemetry, CleanerContext};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long `start` waits before checking that the orchestrator came up.
const START_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "ainews", version, about = "AI news ingestion pipeline orchestrator")]
struct Cli {
    /// Config file (default: $AINEWS_CONFIG, then config/ainews.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch the orchestrator in the background.
    Start,
    /// Stop the background orchestrator.
    Stop,
    /// Stop, then start.
    Restart,
    /// Orchestrator liveness plus article and staging counts.
    Status,
    /// Run one task in the foreground and exit.
    RunOnce {
        /// `cleaner`, `logs_cleaner` or any task from the schedule.
        task: String,
    },
    /// Orchestrator loop in the foreground (what `start` launches).
    #[command(hide = true)]
    Supervise,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = match &cli.config {
        Some(p) => Some(p.canonicalize().with_context(|| format!("config {}", p.display()))?),
        None => None,
    };
    let cfg = match &config_path {
        Some(p) => AppConfig::load_from(p)?,
        None => AppConfig::load_default()?,
    };

    match cli.command {
        Command::Start => start(&cfg, config_path.as_deref()).await,
        Command::Stop => Ok(exit_code(stop(&cfg).await)),
        Command::Restart => {
            let outcome = stop(&cfg).await;
            if !outcome.is_stopped() {
                bail!("orchestrator did not stop ({outcome:?}); not starting a second one");
            }
            start(&cfg, config_path.as_deref()).await
        }
        Command::Status => status(&cfg).await,
        Command::RunOnce { task } => run_once(&cfg, &task).await,
        Command::Supervise => supervise(&cfg).await,
    }
}

fn self_exe() -> Result<PathBuf> {
    std::env::current_exe().context("resolving own executable")
}

async fn start(cfg: &AppConfig, config_path: Option<&Path>) -> Result<ExitCode> {
    let pid_file = PidFile::new(&cfg.paths.pid_file);
    if let ServiceStatus::Running { pid } = pid_file.status() {
        println!("orchestrator already running (pid {pid})");
        return Ok(ExitCode::SUCCESS);
    }

    std::fs::create_dir_all(&cfg.paths.log_dir)
        .with_context(|| format!("creating {}", cfg.paths.log_dir.display()))?;
    let log_path = cfg.paths.log_dir.join(ORCHESTRATOR_LOG);
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let mut cmd = std::process::Command::new(self_exe()?);
    cmd.arg("supervise")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        // own process group: a Ctrl-C in this terminal must not reach it
        .process_group(0);
    if let Some(p) = config_path {
        cmd.env(ENV_CONFIG_PATH, p);
    }
    let mut child = cmd.spawn().context("launching orchestrator")?;
    info!(pid = child.id(), "orchestrator launched; verifying");

    tokio::time::sleep(START_SETTLE).await;
    if let Some(status) = child.try_wait()? {
        bail!(
            "orchestrator exited during startup ({status}); see {}",
            log_path.display()
        );
    }
    match pid_file.read() {
        Some(pid) if pid == child.id() => {
            println!("orchestrator started (pid {pid}), log: {}", log_path.display());
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!(
            "orchestrator (pid {}) is alive but has not written {}",
            child.id(),
            pid_file.path().display()
        ),
    }
}

async fn stop(cfg: &AppConfig) -> StopOutcome {
    let pid_file = PidFile::new(&cfg.paths.pid_file);
    let grace = Duration::from_secs(cfg.supervisor.stop_grace_secs);
    let outcome = pid_file.stop(grace).await;
    match outcome {
        StopOutcome::NotRunning => println!("orchestrator not running"),
        StopOutcome::Terminated { pid } => println!("orchestrator stopped (pid {pid})"),
        StopOutcome::Killed { pid } => println!("orchestrator killed after {grace:?} grace (pid {pid})"),
        StopOutcome::Survived { pid } => eprintln!("orchestrator (pid {pid}) survived SIGKILL"),
    }
    outcome
}

fn exit_code(outcome: StopOutcome) -> ExitCode {
    if outcome.is_stopped() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn status(cfg: &AppConfig) -> Result<ExitCode> {
    let pid_file = PidFile::new(&cfg.paths.pid_file);
    match pid_file.status() {
        ServiceStatus::Running { pid } => println!("orchestrator: running (pid {pid})"),
        ServiceStatus::Stale { pid } => {
            println!("orchestrator: stopped (stale pid file for {pid})")
        }
        ServiceStatus::Stopped => println!("orchestrator: stopped"),
    }

    let state_path = snapshot::snapshot_path(pid_file.path());
    if let Some(snap) = snapshot::read(&state_path) {
        println!("tasks (as of {}, orchestrator pid {}):", snap.written_at.to_rfc3339(), snap.pid);
        for t in &snap.tasks {
            let pid = t.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            println!("  {}: {:?} pid={pid} runs={}", t.task_name, t.state, t.runs);
            if let Some(err) = &t.last_error {
                println!("    last error: {err}");
            }
            if let Some(at) = t.last_kill {
                println!("    last kill: {}", at.to_rfc3339());
            }
        }
    }

    let staging = StagingStore::new(&cfg.paths.data_dir);
    for source in &cfg.cleaner.sources {
        println!("staged {source}: {}", staging.load(source).len());
    }

    match store::connect(&cfg.store.url).await {
        Ok(store) => {
            let total = store.count(&Default::default()).await?;
            println!("articles: {total}");
            for (source, n) in store.count_by_source().await? {
                println!("  {source}: {n}");
            }
        }
        Err(e) => println!("articles: unavailable ({e:#})"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_once(cfg: &AppConfig, task: &str) -> Result<ExitCode> {
    match task {
        CLEANER_TASK => {
            let ctx = Arc::new(CleanerContext::from_config(cfg).await?);
            let summaries = ctx.run_all().await?;
            let saved: usize = summaries.iter().map(|s| s.saved).sum();
            info!(sources = summaries.len(), saved, "cleaner finished");
            Ok(ExitCode::SUCCESS)
        }
        LOGS_CLEANER_TASK => {
            let max_age = Duration::from_secs(cfg.supervisor.log_retention_days * 24 * 3600);
            logs::purge_older_than(&cfg.paths.log_dir, max_age)
                .with_context(|| format!("cleaning {}", cfg.paths.log_dir.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        other => {
            let exe = self_exe()?;
            let entries = cfg.schedule_entries(&exe.to_string_lossy())?;
            let Some(entry) = entries.into_iter().find(|e| e.task_name == other) else {
                return Err(SupervisorError::UnknownTask(other.to_string()).into());
            };
            let Some((program, args)) = entry.command.split_first() else {
                bail!("task {other} has no command configured");
            };
            info!(task = other, command = ?entry.command, "running task");
            let status = tokio::process::Command::new(program)
                .args(args)
                .env("AINEWS_TASK", other)
                .status()
                .await
                .with_context(|| format!("running {other}"))?;
            if status.success() {
                Ok(ExitCode::SUCCESS)
            } else {
                error!(task = other, %status, "task failed");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

async fn supervise(cfg: &AppConfig) -> Result<ExitCode> {
    let pid_file = PidFile::new(&cfg.paths.pid_file);
    if let ServiceStatus::Running { pid } = pid_file.status() {
        if pid != std::process::id() {
            bail!("another orchestrator is already running (pid {pid})");
        }
    }
    let exe = self_exe()?;
    let entries = cfg.schedule_entries(&exe.to_string_lossy())?;
    Supervisor::new(entries, cfg.supervisor.clone(), &cfg.paths.log_dir)
        .with_pid_file(pid_file)
        .run(shutdown_signal())
        .await?;
    Ok(ExitCode::SUCCESS)
}
