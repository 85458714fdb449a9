// src/supervisor/logs.rs
//! Per-run worker logs (`<task>_<YYYYmmdd_HHMMSS>.log`), rotation before each
//! spawn and age-based cleanup for the `logs_cleaner` task.

use chrono::{DateTime, Local};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// The orchestrator's own stdout/stderr file; never rotated or purged.
pub const ORCHESTRATOR_LOG: &str = "orchestrator.log";

pub fn run_log_path(dir: &Path, task: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{task}_{}.log", at.format("%Y%m%d_%H%M%S")))
}

fn run_suffix() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^_\d{8}_\d{6}\.log$").unwrap())
}

/// Run logs of `task`, oldest first. `x` does not pick up `x_crawler_...`.
pub fn task_logs(dir: &Path, task: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(task))
                .is_some_and(|rest| run_suffix().is_match(rest))
        })
        .collect();
    // timestamps are fixed-width, so name order is time order
    out.sort();
    out
}

/// Keep the newest `keep` run logs of `task`, delete the rest.
pub fn rotate(dir: &Path, task: &str, keep: usize) -> usize {
    let logs = task_logs(dir, task);
    let excess = logs.len().saturating_sub(keep);
    let mut removed = 0;
    for p in logs.into_iter().take(excess) {
        match fs::remove_file(&p) {
            Ok(()) => {
                removed += 1;
                debug!(task, path = %p.display(), "rotated old run log");
            }
            Err(e) => warn!(task, path = %p.display(), error = %e, "could not delete old run log"),
        }
    }
    removed
}

/// Delete `*.log` files in `dir` not modified for `max_age`.
pub fn purge_older_than(dir: &Path, max_age: Duration) -> io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let is_log = path.extension().and_then(|e| e.to_str()) == Some("log");
        let is_own = path.file_name().and_then(|n| n.to_str()) == Some(ORCHESTRATOR_LOG);
        if !is_log || is_own {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or_default();
        if age > max_age {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not delete log"),
            }
        }
    }
    info!(dir = %dir.display(), removed, max_age_secs = max_age.as_secs(), "old logs purged");
    Ok(removed)
}

/// Time since the file was last written; `None` if it cannot be stat'ed.
pub fn idle_for(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, b"x").unwrap();
        p
    }

    #[test]
    fn run_log_name_format() {
        let at = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let p = run_log_path(Path::new("logs"), "cleaner", at);
        assert_eq!(p, PathBuf::from("logs/cleaner_20250304_050607.log"));
    }

    #[test]
    fn task_logs_do_not_mix_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "x_20250101_000000.log");
        touch(tmp.path(), "x_crawler_20250101_000000.log");
        touch(tmp.path(), "x_notes.log");
        assert_eq!(task_logs(tmp.path(), "x").len(), 1);
        assert_eq!(task_logs(tmp.path(), "x_crawler").len(), 1);
    }

    #[test]
    fn rotate_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "cleaner_20250101_000000.log");
        touch(tmp.path(), "cleaner_20250102_000000.log");
        let newest = touch(tmp.path(), "cleaner_20250103_000000.log");
        assert_eq!(rotate(tmp.path(), "cleaner", 1), 2);
        assert_eq!(task_logs(tmp.path(), "cleaner"), vec![newest]);
    }

    #[test]
    fn purge_spares_orchestrator_log_and_fresh_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), ORCHESTRATOR_LOG);
        touch(tmp.path(), "cleaner_20250101_000000.log");
        touch(tmp.path(), "notes.txt");
        assert_eq!(purge_older_than(tmp.path(), Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(purge_older_than(tmp.path(), Duration::from_millis(1)).unwrap(), 1);
        assert!(tmp.path().join(ORCHESTRATOR_LOG).exists());
        assert!(tmp.path().join("notes.txt").exists());
    }
}
