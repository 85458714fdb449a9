// src/pipeline.rs
//! One cleaner run: staging -> transformation worker -> persistence gateway,
//! then drop from staging every capture that reached an outcome.

use anyhow::{Context, Result};
use metrics::gauge;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::persist::PersistenceGateway;
use crate::staging::StagingStore;
use crate::store;
use crate::transform::client::{OpenAiClient, TextGenClient};
use crate::transform::retry::RetryPolicy;
use crate::transform::{ItemOutcome, TransformWorker};

/// Per-source totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanerSummary {
    pub source: String,
    pub staged: usize,
    pub cleaned: usize,
    pub irrelevant: usize,
    pub rejected: usize,
    pub failed: usize,
    pub saved: usize,
    pub duplicates: usize,
    /// Captures removed from staging after the run.
    pub removed: usize,
}

/// Service objects for the cleaner, built once and shared by every source.
pub struct CleanerContext {
    staging: StagingStore,
    worker: TransformWorker,
    gateway: PersistenceGateway,
    sources: Vec<String>,
}

impl CleanerContext {
    pub fn new(
        staging: StagingStore,
        worker: TransformWorker,
        gateway: PersistenceGateway,
        sources: Vec<String>,
    ) -> Self {
        Self {
            staging,
            worker,
            gateway,
            sources,
        }
    }

    /// Wire the production collaborators from config.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let client: Arc<dyn TextGenClient> =
            Arc::new(OpenAiClient::from_settings(&cfg.ai).context("building text-generation client")?);
        let store = store::connect(&cfg.store.url).await?;
        let gateway = PersistenceGateway::open(store)
            .await
            .context("loading dedup index")?;
        let worker = TransformWorker::new(client, RetryPolicy::from(&cfg.retry), &cfg.cleaner);
        Ok(Self::new(
            StagingStore::new(&cfg.paths.data_dir),
            worker,
            gateway,
            cfg.cleaner.sources.clone(),
        ))
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Clean every configured source, each in its own task.
    pub async fn run_all(self: &Arc<Self>) -> Result<Vec<CleanerSummary>> {
        crate::telemetry::describe_metrics();
        let mut set = JoinSet::new();
        for source in self.sources.clone() {
            let ctx = Arc::clone(self);
            set.spawn(async move {
                let res = ctx.run_source(&source).await;
                (source, res)
            });
        }

        let mut summaries = Vec::new();
        let mut failures = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(s))) => summaries.push(s),
                Ok((source, Err(e))) => {
                    failures += 1;
                    error!(source, error = ?e, "cleaner run failed");
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "cleaner task panicked");
                }
            }
        }
        summaries.sort_by(|a, b| a.source.cmp(&b.source));
        gauge!("clean_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        if failures > 0 {
            anyhow::bail!("{failures} source(s) failed to clean");
        }
        Ok(summaries)
    }

    pub async fn run_source(&self, source: &str) -> Result<CleanerSummary> {
        let batch = self.staging.load(source);
        let mut summary = CleanerSummary {
            source: source.to_string(),
            staged: batch.len(),
            ..CleanerSummary::default()
        };
        if batch.is_empty() {
            info!(source, "nothing staged");
            return Ok(summary);
        }

        let report = self.worker.run(&batch).await;
        summary.cleaned = report.cleaned();
        summary.irrelevant = report.irrelevant();
        summary.rejected = report.rejected();
        summary.failed = report.failed();

        // cleaned captures leave only once the store has them
        let mut done: HashSet<String> = report
            .items
            .iter()
            .filter(|r| !matches!(r.outcome, ItemOutcome::Cleaned(_)))
            .map(|r| r.canonical_url.clone())
            .collect();

        let saved = self.gateway.save_report(&report.articles()).await;
        let save_error = match saved {
            Ok(s) => {
                summary.saved = s.saved;
                summary.duplicates = s.duplicates;
                done.extend(s.persisted);
                None
            }
            Err(e) => Some(e),
        };

        summary.removed = self
            .staging
            .remove(source, &done)
            .with_context(|| format!("removing processed captures for {source}"))?;

        if let Some(e) = save_error {
            return Err(e).with_context(|| format!("persisting cleaned articles for {source}"));
        }

        info!(
            source,
            staged = summary.staged,
            cleaned = summary.cleaned,
            irrelevant = summary.irrelevant,
            rejected = summary.rejected,
            failed = summary.failed,
            saved = summary.saved,
            duplicates = summary.duplicates,
            removed = summary.removed,
            "cleaner run finished"
        );
        Ok(summary)
    }
}
