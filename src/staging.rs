// src/staging.rs
//! Staging store: one JSON-array buffer file per source, holding raw captures
//! until the cleaner has reached a terminal outcome for them.
//!
//! Every mutation runs under an in-process mutex plus an exclusive `flock` on a
//! sibling `.lock` file, so a crawler process and the cleaner never interleave
//! read-modify-write cycles. Writes go to a temp file that is renamed over the
//! buffer, so readers only ever observe complete arrays.

use anyhow::{Context, Result};
use nix::fcntl::{Flock, FlockArg};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::model::RawCapture;

pub struct StagingStore {
    dir: PathBuf,
    local: Mutex<()>,
}

/// Held while a buffer is being mutated. Releases the file lock on drop.
struct BufferGuard {
    _flock: Flock<File>,
}

impl StagingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            local: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `data/<source>.json`, with the source name made filesystem-safe.
    pub fn buffer_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(source)))
    }

    fn lock_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(source)))
    }

    fn lock_file(&self, source: &str) -> Result<BufferGuard> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating staging dir {}", self.dir.display()))?;
        let path = self.lock_path(source);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| anyhow::anyhow!("flock {}: {errno}", path.display()))?;
        Ok(BufferGuard { _flock: flock })
    }

    /// Add captures to the source's buffer. Returns the new buffer length.
    pub fn append(&self, source: &str, items: Vec<RawCapture>) -> Result<usize> {
        let _local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let _guard = self.lock_file(source)?;

        let path = self.buffer_path(source);
        let mut current = match read_buffer(&path) {
            Ok(v) => v,
            Err(e) => {
                // Keep the unreadable file around for inspection instead of overwriting it.
                let aside = quarantine(&path)?;
                error!(
                    source,
                    error = %e,
                    moved_to = %aside.display(),
                    "staging buffer unreadable on append; quarantined"
                );
                Vec::new()
            }
        };
        let added = items.len();
        current.extend(items.into_iter().map(|mut it| {
            if it.source.is_empty() {
                it.source = source.to_string();
            }
            it
        }));
        write_buffer(&path, &current)?;
        info!(source, added, total = current.len(), "staged captures");
        Ok(current.len())
    }

    /// Full buffer for `source`. Missing or unparsable files yield an empty list.
    pub fn load(&self, source: &str) -> Vec<RawCapture> {
        let _local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.buffer_path(source);
        match read_buffer(&path) {
            Ok(v) => v,
            Err(e) => {
                error!(source, path = %path.display(), error = %e, "staging buffer unparsable; treating as empty");
                Vec::new()
            }
        }
    }

    /// Truncate the buffer to an empty array.
    pub fn clear(&self, source: &str) -> Result<()> {
        let _local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let _guard = self.lock_file(source)?;
        write_buffer(&self.buffer_path(source), &[])?;
        info!(source, "staging buffer cleared");
        Ok(())
    }

    /// Remove the captures whose canonical_url is in `done`, re-reading the
    /// buffer under the lock so captures appended meanwhile survive.
    /// Returns how many entries were removed.
    pub fn remove(&self, source: &str, done: &HashSet<String>) -> Result<usize> {
        if done.is_empty() {
            return Ok(0);
        }
        let _local = self.local.lock().unwrap_or_else(|p| p.into_inner());
        let _guard = self.lock_file(source)?;

        let path = self.buffer_path(source);
        let current = match read_buffer(&path) {
            Ok(v) => v,
            Err(e) => {
                warn!(source, error = %e, "staging buffer unreadable during removal; leaving as is");
                return Ok(0);
            }
        };
        let before = current.len();
        let kept: Vec<RawCapture> = current
            .into_iter()
            .filter(|c| !done.contains(&c.canonical_url))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            write_buffer(&path, &kept)?;
        }
        info!(source, removed, remaining = kept.len(), "staging buffer compacted");
        Ok(removed)
    }

    /// Sources that currently have a buffer file.
    pub fn sources(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for e in entries.flatten() {
                let path = e.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        out.push(stem.to_string());
                    }
                }
            }
        }
        out.sort();
        out
    }
}

fn file_stem(source: &str) -> String {
    let s: String = source
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s
    }
}

fn read_buffer(path: &Path) -> Result<Vec<RawCapture>> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<RawCapture> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(items)
}

fn write_buffer(path: &Path, items: &[RawCapture]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(items).context("serializing staging buffer")?;
    let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let aside = path.with_extension(format!("corrupt-{ts}"));
    fs::rename(path, &aside).with_context(|| format!("quarantining {}", path.display()))?;
    Ok(aside)
}
