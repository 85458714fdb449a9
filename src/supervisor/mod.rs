// src/supervisor/mod.rs
//! Orchestrator: owns the scheduled tasks, spawns them as OS processes on a
//! one-second polling loop, and kills workers that hang.
//!
//! Per task: `Idle -> Running -> Completed -> Idle`, or
//! `Running -> TimedOut -> ForceKilled -> Idle` when the health monitor fires.
//! In-memory handles are the source of truth while the loop runs; the PID file
//! only answers `status`/`stop` from other processes.

pub mod logs;
pub mod pidfile;
pub mod process;
pub mod snapshot;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{ScheduleEntry, SupervisorSettings};
pub use pidfile::{PidFile, ServiceStatus, StopOutcome};
pub use process::{TerminateOutcome, WorkerHandle};
pub use snapshot::StateSnapshot;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn task {task}: {source}")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown task {0}")]
    UnknownTask(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    TimedOut,
    ForceKilled,
}

struct TaskSlot {
    entry: ScheduleEntry,
    state: TaskState,
    next_due: Instant,
    handle: Option<WorkerHandle>,
    runs: u64,
    last_error: Option<String>,
    last_kill: Option<DateTime<Utc>>,
}

impl TaskSlot {
    fn set(&mut self, next: TaskState) {
        if self.state != next {
            debug!(task = %self.entry.task_name, from = ?self.state, to = ?next, "task state");
            self.state = next;
        }
    }
}

/// Snapshot of one task, for `status`, logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_name: String,
    pub state: TaskState,
    pub pid: Option<u32>,
    pub runs: u64,
    /// Last spawn failure, failed exit or forced kill; cleared by a clean exit.
    pub last_error: Option<String>,
    pub last_kill: Option<DateTime<Utc>>,
}

pub struct Supervisor {
    slots: Vec<TaskSlot>,
    settings: SupervisorSettings,
    log_dir: PathBuf,
    pid_file: Option<PidFile>,
    state_file: Option<PathBuf>,
}

impl Supervisor {
    /// Disabled entries are dropped; every enabled task is due immediately.
    pub fn new(entries: Vec<ScheduleEntry>, settings: SupervisorSettings, log_dir: impl Into<PathBuf>) -> Self {
        let now = Instant::now();
        let slots = entries
            .into_iter()
            .filter(|e| {
                if !e.enabled {
                    info!(task = %e.task_name, "task disabled; not scheduling");
                }
                e.enabled
            })
            .map(|entry| TaskSlot {
                entry,
                state: TaskState::Idle,
                next_due: now,
                handle: None,
                runs: 0,
                last_error: None,
                last_kill: None,
            })
            .collect();
        Self {
            slots,
            settings,
            log_dir: log_dir.into(),
            pid_file: None,
            state_file: None,
        }
    }

    /// Also enables the task-state snapshot next to the PID file.
    pub fn with_pid_file(mut self, pid_file: PidFile) -> Self {
        self.state_file = Some(snapshot::snapshot_path(pid_file.path()));
        self.pid_file = Some(pid_file);
        self
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        self.slots
            .iter()
            .map(|s| TaskStatus {
                task_name: s.entry.task_name.clone(),
                state: s.state,
                pid: s.handle.as_ref().map(|h| h.pid),
                runs: s.runs,
                last_error: s.last_error.clone(),
                last_kill: s.last_kill,
            })
            .collect()
    }

    fn publish(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let snap = StateSnapshot {
            pid: std::process::id(),
            written_at: Utc::now(),
            tasks: self.status(),
        };
        if let Err(e) = snapshot::write(path, &snap) {
            warn!(path = %path.display(), error = %e, "could not write task state");
        }
    }

    /// One scheduling pass: reap finished workers, then spawn due tasks whose
    /// previous worker is gone.
    pub fn tick(&mut self, now: Instant) {
        for slot in &mut self.slots {
            reap(slot);
            if now < slot.next_due {
                continue;
            }
            slot.next_due = now + slot.entry.interval;

            if let Some(h) = &slot.handle {
                info!(task = %slot.entry.task_name, pid = h.pid, "previous run still alive; skipping");
                continue;
            }

            let removed = logs::rotate(&self.log_dir, &slot.entry.task_name, self.settings.keep_logs_per_task);
            if removed > 0 {
                debug!(task = %slot.entry.task_name, removed, "old run logs rotated");
            }
            match process::spawn(&slot.entry, &self.log_dir) {
                Ok(h) => {
                    counter!("supervisor_spawns_total").increment(1);
                    slot.handle = Some(h);
                    slot.runs += 1;
                    slot.set(TaskState::Running);
                }
                Err(e) => {
                    error!(task = %slot.entry.task_name, error = %e, "spawn failed; retrying next interval");
                    slot.last_error = Some(e.to_string());
                    slot.set(TaskState::Idle);
                }
            }
        }
        self.publish();
    }

    /// Kill workers whose log went stale AND whose runtime exceeds the ceiling.
    pub async fn monitor(&mut self) {
        let stale = Duration::from_secs(self.settings.stale_log_secs);
        let ceiling = Duration::from_secs(self.settings.max_runtime_secs);
        let grace = Duration::from_secs(self.settings.stop_grace_secs);

        for slot in &mut self.slots {
            reap(slot);
            let Some((idle, runtime)) = slot.handle.as_ref().map(|h| (h.log_idle(), h.runtime())) else {
                continue;
            };
            if idle <= stale || runtime <= ceiling {
                continue;
            }

            slot.set(TaskState::TimedOut);
            let Some(mut h) = slot.handle.take() else {
                continue;
            };
            warn!(
                task = %slot.entry.task_name,
                pid = h.pid,
                idle_secs = idle.as_secs(),
                runtime_secs = runtime.as_secs(),
                "worker looks hung; terminating"
            );
            let outcome = h.terminate(grace).await;
            counter!("supervisor_kills_total").increment(1);
            info!(task = %slot.entry.task_name, pid = h.pid, ?outcome, "hung worker terminated");
            slot.last_error = Some(format!(
                "killed pid {} after {}s without log output ({}s runtime)",
                h.pid,
                idle.as_secs(),
                runtime.as_secs()
            ));
            slot.last_kill = Some(Utc::now());
            slot.set(TaskState::ForceKilled);
            slot.set(TaskState::Idle);
        }
        self.publish();
    }

    /// Polling loop until `shutdown` resolves. Writing the PID file is the one
    /// fatal failure; it is removed again on the way out.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        crate::telemetry::describe_metrics();
        if let Some(pf) = &self.pid_file {
            pf.write_current()?;
            info!(pid = std::process::id(), path = %pf.path().display(), "orchestrator started");
        }
        for s in &self.slots {
            info!(
                task = %s.entry.task_name,
                interval_secs = s.entry.interval.as_secs(),
                command = ?s.entry.command,
                "task scheduled"
            );
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(self.settings.tick_ms.max(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut monitor =
            tokio::time::interval(Duration::from_secs(self.settings.monitor_interval_secs.max(1)));
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.tick(Instant::now()),
                _ = monitor.tick() => self.monitor().await,
            }
        }

        for s in &self.slots {
            if let Some(h) = &s.handle {
                info!(task = %s.entry.task_name, pid = h.pid, "leaving running worker to finish");
            }
        }
        self.publish();
        if let Some(pf) = &self.pid_file {
            pf.remove();
        }
        Ok(())
    }
}

fn reap(slot: &mut TaskSlot) {
    let Some(h) = slot.handle.as_mut() else {
        return;
    };
    if let Some(status) = h.try_exit() {
        if status.success() {
            info!(task = %slot.entry.task_name, pid = h.pid, runtime_secs = h.runtime().as_secs(), "worker finished");
            slot.last_error = None;
        } else {
            warn!(task = %slot.entry.task_name, pid = h.pid, %status, "worker exited with failure");
            slot.last_error = Some(format!("pid {} {status}", h.pid));
        }
        slot.handle = None;
        slot.set(TaskState::Completed);
        slot.set(TaskState::Idle);
    }
}

/// Resolves on SIGTERM or SIGINT. Handlers are installed when this is called,
/// not when first polled, so a signal that lands before the loop starts is
/// still seen.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let term = signal(SignalKind::terminate());
    let int = signal(SignalKind::interrupt());
    async move {
        match (term, int) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => info!("received SIGTERM"),
                    _ = int.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "cannot listen for shutdown signals; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
}
