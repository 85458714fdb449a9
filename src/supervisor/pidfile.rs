// src/supervisor/pidfile.rs
//! PID file of the long-running orchestrator: across-restart liveness only.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::SupervisorError;

/// Check a process with signal 0. EPERM still means "exists".
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn send_signal(pid: u32, sig: Signal) -> bool {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .is_some_and(|raw| kill(Pid::from_raw(raw), sig).is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running { pid: u32 },
    /// PID file points at a dead process.
    Stale { pid: u32 },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Terminated { pid: u32 },
    Killed { pid: u32 },
    /// Still alive even after SIGKILL (e.g. stuck in uninterruptible sleep).
    Survived { pid: u32 },
}

impl StopOutcome {
    /// True when no orchestrator is left running.
    pub fn is_stopped(self) -> bool {
        !matches!(self, StopOutcome::Survived { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) -> Result<(), SupervisorError> {
        let err = |source| SupervisorError::PidFile {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(err)?;
            }
        }
        let tmp = self.path.with_extension("pid.tmp");
        let mut f = fs::File::create(&tmp).map_err(err)?;
        writeln!(f, "{pid}").map_err(err)?;
        f.sync_all().map_err(err)?;
        fs::rename(&tmp, &self.path).map_err(err)?;
        Ok(())
    }

    pub fn write_current(&self) -> Result<(), SupervisorError> {
        self.write(std::process::id())
    }

    pub fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "pid file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove pid file"),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match self.read() {
            None => ServiceStatus::Stopped,
            Some(pid) if is_alive(pid) => ServiceStatus::Running { pid },
            Some(pid) => ServiceStatus::Stale { pid },
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. The PID file is removed
    /// whatever the outcome.
    pub async fn stop(&self, grace: Duration) -> StopOutcome {
        let outcome = match self.status() {
            ServiceStatus::Running { pid } => terminate_pid(pid, grace).await,
            ServiceStatus::Stale { pid } => {
                warn!(pid, "pid file was stale");
                StopOutcome::NotRunning
            }
            ServiceStatus::Stopped => StopOutcome::NotRunning,
        };
        self.remove();
        outcome
    }
}

/// Graceful-then-forced termination of an arbitrary pid.
pub async fn terminate_pid(pid: u32, grace: Duration) -> StopOutcome {
    const POLL: Duration = Duration::from_millis(100);

    info!(pid, "sending SIGTERM");
    if !send_signal(pid, Signal::SIGTERM) && !is_alive(pid) {
        return StopOutcome::NotRunning;
    }
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return StopOutcome::Terminated { pid };
        }
        tokio::time::sleep(POLL).await;
    }

    warn!(pid, grace_ms = grace.as_millis() as u64, "still alive after SIGTERM; sending SIGKILL");
    send_signal(pid, Signal::SIGKILL);
    for _ in 0..10 {
        if !is_alive(pid) {
            return StopOutcome::Killed { pid };
        }
        tokio::time::sleep(POLL).await;
    }
    StopOutcome::Survived { pid }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_file_and_liveness() {
        let tmp = tempfile::tempdir().unwrap();
        let pf = PidFile::new(tmp.path().join("run/orchestrator.pid"));
        assert_eq!(pf.status(), ServiceStatus::Stopped);

        pf.write_current().unwrap();
        assert_eq!(
            pf.status(),
            ServiceStatus::Running {
                pid: std::process::id()
            }
        );

        // pid_max on Linux is at most 2^22
        pf.write(4_194_304 + 17).unwrap();
        assert!(matches!(pf.status(), ServiceStatus::Stale { .. }));
    }

    #[tokio::test]
    async fn stop_removes_stale_file() {
        let tmp = tempfile::tempdir().unwrap();
        let pf = PidFile::new(tmp.path().join("o.pid"));
        pf.write(4_194_304 + 17).unwrap();
        assert_eq!(pf.stop(Duration::from_millis(10)).await, StopOutcome::NotRunning);
        assert!(!pf.path().exists());
    }

    #[test]
    fn zero_and_overflowing_pids_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn only_a_surviving_process_counts_as_not_stopped() {
        assert!(StopOutcome::NotRunning.is_stopped());
        assert!(StopOutcome::Terminated { pid: 1 }.is_stopped());
        assert!(StopOutcome::Killed { pid: 1 }.is_stopped());
        assert!(!StopOutcome::Survived { pid: 1 }.is_stopped());
    }
}
