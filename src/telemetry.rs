// src/telemetry.rs
//! Tracing subscriber setup for the binary, and metric descriptions.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "AINEWS_LOG_FORMAT";
const DEFAULT_FILTER: &str = "ainews=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `AINEWS_LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(false)).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// One-time metric registration.
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("clean_items_total", "Raw captures handed to the transformation worker.");
        describe_counter!("clean_irrelevant_total", "Captures flagged out of domain by the service.");
        describe_counter!(
            "clean_rejected_total",
            "Captures dropped after a parse or validation failure."
        );
        describe_counter!(
            "clean_failed_total",
            "Captures whose service calls exhausted their retries."
        );
        describe_counter!("persist_saved_total", "Articles inserted into the store.");
        describe_counter!(
            "persist_duplicate_total",
            "Articles skipped because their canonical_url was already stored."
        );
        describe_counter!("ai_calls_total", "Requests sent to the text-generation service.");
        describe_counter!("ai_retries_total", "Retried text-generation requests.");
        describe_counter!("supervisor_spawns_total", "Worker processes spawned.");
        describe_counter!("supervisor_kills_total", "Worker processes force-terminated.");
        describe_gauge!("clean_last_run_ts", "Unix ts when the cleaner last finished.");
    });
}
