// src/supervisor/snapshot.rs
//! Per-task state written next to the PID file so `ainews status` can report
//! what the orchestrator is doing from another process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Orchestrator that wrote the file.
    pub pid: u32,
    pub written_at: DateTime<Utc>,
    pub tasks: Vec<TaskStatus>,
}

/// `logs/orchestrator.pid` -> `logs/orchestrator.state.json`.
pub fn snapshot_path(pid_file: &Path) -> PathBuf {
    pid_file.with_extension("state.json")
}

/// Temp file + rename, so readers never see a partial document.
pub fn write(path: &Path, snapshot: &StateSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&body)?;
    f.sync_all()?;
    fs::rename(&tmp, path)
}

/// None when missing or unreadable.
pub fn read(path: &Path) -> Option<StateSnapshot> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}
