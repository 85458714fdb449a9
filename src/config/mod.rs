// src/config/mod.rs
//! Application configuration: one TOML file with defaults for every field,
//! plus a couple of env overrides.

pub mod ai;
pub mod schedule;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::AiSettings;
pub use schedule::{ScheduleEntry, ScheduleSpec};

pub const ENV_CONFIG_PATH: &str = "AINEWS_CONFIG";
pub const ENV_STORE_URL: &str = "AINEWS_STORE_URL";
pub const DEFAULT_CONFIG_PATH: &str = "config/ainews.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Per-source staging buffers live here.
    pub data_dir: PathBuf,
    /// Orchestrator and per-run worker logs.
    pub log_dir: PathBuf,
    pub pid_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            pid_file: PathBuf::from("logs/orchestrator.pid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/articles.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum delay after a rate-limit rejection.
    pub rate_limit_floor_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 3_000,
            max_delay_ms: 30_000,
            rate_limit_floor_ms: 10_000,
            jitter_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerSettings {
    pub chunk_size: usize,
    pub chunk_interval_secs: u64,
    pub min_title_chars: usize,
    pub min_content_chars: usize,
    pub max_emoji_ratio: f64,
    /// Sources whose staging buffers the cleaner drains.
    pub sources: Vec<String>,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            chunk_interval_secs: 10,
            min_title_chars: 2,
            min_content_chars: 50,
            max_emoji_ratio: 0.1,
            sources: vec!["x.com".to_string(), "crunchbase.com".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub tick_ms: u64,
    pub monitor_interval_secs: u64,
    /// A worker whose log has not changed for this long is considered stale...
    pub stale_log_secs: u64,
    /// ...and is killed once it has also run longer than this.
    pub max_runtime_secs: u64,
    pub stop_grace_secs: u64,
    pub keep_logs_per_task: usize,
    pub log_retention_days: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            monitor_interval_secs: 30,
            stale_log_secs: 1_800,
            max_runtime_secs: 7_200,
            stop_grace_secs: 5,
            keep_logs_per_task: 1,
            log_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub store: StoreConfig,
    pub ai: AiSettings,
    pub retry: RetrySettings,
    pub cleaner: CleanerSettings,
    pub supervisor: SupervisorSettings,
    pub schedule: BTreeMap<String, ScheduleSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            store: StoreConfig::default(),
            ai: AiSettings::default(),
            retry: RetrySettings::default(),
            cleaner: CleanerSettings::default(),
            supervisor: SupervisorSettings::default(),
            schedule: schedule::default_schedule(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg = Self::parse(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $AINEWS_CONFIG
    /// 2) config/ainews.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        let mut cfg = Self::default();
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        if cfg.schedule.is_empty() {
            cfg.schedule = schedule::default_schedule();
        }
        cfg.ai.sanitize();
        if cfg.cleaner.chunk_size == 0 {
            cfg.cleaner.chunk_size = CleanerSettings::default().chunk_size;
        }
        if cfg.retry.max_attempts == 0 {
            cfg.retry.max_attempts = 1;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_STORE_URL) {
            if !url.trim().is_empty() {
                self.store.url = url.trim().to_string();
            }
        }
    }

    /// Resolved schedule entries; built-in tasks run `self_exe run-once <task>`.
    pub fn schedule_entries(&self, self_exe: &str) -> Result<Vec<ScheduleEntry>> {
        schedule::resolve_schedule(&self.schedule, self_exe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_full_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.cleaner.chunk_size, 8);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.supervisor.monitor_interval_secs, 30);
        assert!(cfg.schedule.contains_key("cleaner"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppConfig::parse(
            r#"
[cleaner]
chunk_size = 3

[schedule.cleaner]
interval = "5m"
"#,
        )
        .unwrap();
        assert_eq!(cfg.cleaner.chunk_size, 3);
        assert_eq!(cfg.cleaner.min_content_chars, 50);
        assert_eq!(cfg.schedule.len(), 1);
        assert!(cfg.schedule["cleaner"].enabled);
    }
}
