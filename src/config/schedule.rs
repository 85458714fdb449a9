// src/config/schedule.rs
//! Declarative task schedule: `task_name -> { interval, enabled, command }`.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Built-in task names that map to `ainews run-once <task>`.
pub const CLEANER_TASK: &str = "cleaner";
pub const LOGS_CLEANER_TASK: &str = "logs_cleaner";

/// One `[schedule.<task>]` table as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSpec {
    pub interval: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// argv of the worker process. Built-in tasks default to this binary.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

/// Resolved schedule entry used by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub task_name: String,
    pub interval: Duration,
    pub enabled: bool,
    pub command: Vec<String>,
}

/// Longest accepted interval; keeps `Instant + interval` far from overflow.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 86_400);

/// Parse `30s`, `15m`, `3h`, `1d` (a bare number means minutes).
/// Wall-clock times (`"09:00,21:00"`) are rejected.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() {
        bail!("empty interval");
    }
    if s.contains(':') {
        bail!("daily HH:MM times are not supported in {raw:?}; use an interval such as \"12h\"");
    }
    let (num, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s.as_str(), "m"),
    };
    let n: u64 = num
        .parse()
        .map_err(|_| anyhow!("invalid interval number in {raw:?}"))?;
    if n == 0 {
        bail!("interval must be positive: {raw:?}");
    }
    let mult = match unit.trim() {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => bail!("unknown interval unit {other:?} in {raw:?}"),
    };
    let secs = n
        .checked_mul(mult)
        .ok_or_else(|| anyhow!("interval overflows: {raw:?}"))?;
    let interval = Duration::from_secs(secs);
    if interval > MAX_INTERVAL {
        bail!("interval {raw:?} exceeds {} days", MAX_INTERVAL.as_secs() / 86_400);
    }
    Ok(interval)
}

/// Schedule used when the config file has no `[schedule]` tables.
/// Crawler tasks stay disabled until a command is configured for them.
pub fn default_schedule() -> BTreeMap<String, ScheduleSpec> {
    let mut m = BTreeMap::new();
    m.insert(
        "x_crawler".to_string(),
        ScheduleSpec {
            interval: "3h".into(),
            enabled: false,
            command: None,
        },
    );
    m.insert(
        "crunchbase_crawler".to_string(),
        ScheduleSpec {
            interval: "12h".into(),
            enabled: false,
            command: None,
        },
    );
    m.insert(
        CLEANER_TASK.to_string(),
        ScheduleSpec {
            interval: "1m".into(),
            enabled: true,
            command: None,
        },
    );
    m.insert(
        LOGS_CLEANER_TASK.to_string(),
        ScheduleSpec {
            interval: "24h".into(),
            enabled: true,
            command: None,
        },
    );
    m
}

/// Resolve specs into entries. `self_exe` is the argv prefix for built-in tasks.
/// Enabled non-built-in tasks without a command are disabled with a warning.
pub fn resolve_schedule(
    specs: &BTreeMap<String, ScheduleSpec>,
    self_exe: &str,
) -> Result<Vec<ScheduleEntry>> {
    let mut out = Vec::with_capacity(specs.len());
    for (name, spec) in specs {
        let interval = parse_interval(&spec.interval)
            .map_err(|e| anyhow!("schedule.{name}: {e}"))?;
        let builtin = name == CLEANER_TASK || name == LOGS_CLEANER_TASK;
        let command = match &spec.command {
            Some(cmd) if !cmd.is_empty() => cmd.clone(),
            _ if builtin => vec![self_exe.to_string(), "run-once".into(), name.clone()],
            _ => Vec::new(),
        };
        let mut enabled = spec.enabled;
        if enabled && command.is_empty() {
            tracing::warn!(task = %name, "task enabled without a command; disabling");
            enabled = false;
        }
        out.push(ScheduleEntry {
            task_name: name.clone(),
            interval,
            enabled,
            command,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_units() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_interval(" 3H ").unwrap(), Duration::from_secs(10_800));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_interval("5").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("3w").is_err());
        assert!(parse_interval("h").is_err());
    }

    #[test]
    fn huge_intervals_fail_instead_of_wrapping() {
        let err = parse_interval("300000000000000d").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
        assert!(parse_interval("18446744073709551615h").is_err());
        assert!(parse_interval("400d").is_err());
        assert_eq!(parse_interval("366d").unwrap(), MAX_INTERVAL);
    }

    #[test]
    fn clock_times_are_rejected_with_a_hint() {
        for raw in ["09:00", "09:00,21:00"] {
            let err = parse_interval(raw).unwrap_err().to_string();
            assert!(err.contains("HH:MM"), "{err}");
        }
    }

    #[test]
    fn builtin_tasks_get_self_command_and_crawlers_need_one() {
        let entries = resolve_schedule(&default_schedule(), "/bin/ainews").unwrap();
        let cleaner = entries.iter().find(|e| e.task_name == CLEANER_TASK).unwrap();
        assert!(cleaner.enabled);
        assert_eq!(cleaner.command, vec!["/bin/ainews", "run-once", "cleaner"]);

        let mut specs = default_schedule();
        specs.get_mut("x_crawler").unwrap().enabled = true;
        let entries = resolve_schedule(&specs, "/bin/ainews").unwrap();
        let x = entries.iter().find(|e| e.task_name == "x_crawler").unwrap();
        assert!(!x.enabled, "no command configured");
    }
}
