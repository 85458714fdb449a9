// src/supervisor/process.rs
//! Spawned worker processes. Output goes to a per-run log file; the handle is
//! owned by the supervisor for one spawn/terminate cycle.

use chrono::{DateTime, Local, Utc};
use nix::sys::signal::Signal;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::logs;
use super::pidfile::send_signal;
use super::SupervisorError;
use crate::config::ScheduleEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Had already exited.
    Exited,
    Terminated,
    Killed,
}

#[derive(Debug)]
pub struct WorkerHandle {
    pub task_name: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub log_path: PathBuf,
    started: Instant,
    child: Child,
}

/// Spawn `entry.command`, with stdout and stderr appended to a fresh run log in `log_dir`.
pub fn spawn(entry: &ScheduleEntry, log_dir: &Path) -> Result<WorkerHandle, SupervisorError> {
    let task = entry.task_name.as_str();
    let err = |source| SupervisorError::Spawn {
        task: task.to_string(),
        source,
    };
    let Some((program, args)) = entry.command.split_first() else {
        return Err(err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        )));
    };

    std::fs::create_dir_all(log_dir).map_err(err)?;
    let log_path = logs::run_log_path(log_dir, task, Local::now());
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(err)?;
    let errs = out.try_clone().map_err(err)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(errs))
        .env("AINEWS_TASK", task)
        .spawn()
        .map_err(err)?;
    let pid = child.id().unwrap_or_default();

    info!(task, pid, log = %log_path.display(), "worker spawned");
    Ok(WorkerHandle {
        task_name: task.to_string(),
        pid,
        start_time: Utc::now(),
        log_path,
        started: Instant::now(),
        child,
    })
}

impl WorkerHandle {
    /// Exit status if the process has finished (reaps it).
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(task = %self.task_name, pid = self.pid, error = %e, "could not poll worker");
                None
            }
        }
    }

    pub fn runtime(&self) -> Duration {
        self.started.elapsed()
    }

    /// How long the run log has gone without a write.
    pub fn log_idle(&self) -> Duration {
        logs::idle_for(&self.log_path).unwrap_or_else(|| self.runtime())
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and reap.
    pub async fn terminate(&mut self, grace: Duration) -> TerminateOutcome {
        if self.try_exit().is_some() {
            return TerminateOutcome::Exited;
        }
        send_signal(self.pid, Signal::SIGTERM);
        if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
            return TerminateOutcome::Terminated;
        }
        warn!(task = %self.task_name, pid = self.pid, "worker ignored SIGTERM; killing");
        if let Err(e) = self.child.kill().await {
            warn!(task = %self.task_name, pid = self.pid, error = %e, "SIGKILL failed");
        }
        TerminateOutcome::Killed
    }
}
