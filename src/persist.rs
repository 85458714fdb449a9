// src/persist.rs
//! Dedup index + persistence gateway. The index is advisory: the store's
//! uniqueness constraint decides, and a duplicate-key rejection counts as
//! "already present" rather than an error.

use metrics::counter;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::model::CleanedArticle;
use crate::store::{ArticleStore, StoreResult};

/// In-memory set of canonical URLs known to be persisted.
#[derive(Default)]
pub struct DedupIndex {
    urls: RwLock<HashSet<String>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(store: &dyn ArticleStore) -> StoreResult<Self> {
        let urls: HashSet<String> = store.existing_urls().await?.into_iter().collect();
        info!(known = urls.len(), store = store.name(), "dedup index loaded");
        Ok(Self {
            urls: RwLock::new(urls),
        })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(url)
    }

    pub fn insert(&self, url: impl Into<String>) {
        self.urls
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    /// Skipped via the index, rejected by the store, or repeated within the call.
    pub duplicates: usize,
    /// canonical_urls that are now known to be persisted (saved or duplicate).
    pub persisted: Vec<String>,
}

pub struct PersistenceGateway {
    store: Arc<dyn ArticleStore>,
    index: DedupIndex,
}

impl PersistenceGateway {
    /// Build the gateway, seeding the dedup index from the store.
    pub async fn open(store: Arc<dyn ArticleStore>) -> StoreResult<Self> {
        let index = DedupIndex::load(store.as_ref()).await?;
        Ok(Self { store, index })
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    /// Persist new articles; returns how many rows were actually added.
    pub async fn save(&self, articles: &[CleanedArticle]) -> StoreResult<usize> {
        Ok(self.save_report(articles).await?.saved)
    }

    /// Skip urls the index already knows, then bulk-insert the rest. Rows the
    /// store rejects as duplicates count as persisted.
    pub async fn save_report(&self, articles: &[CleanedArticle]) -> StoreResult<SaveReport> {
        let mut report = SaveReport::default();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut fresh: Vec<CleanedArticle> = Vec::new();

        for a in articles {
            let url = a.canonical_url.as_str();
            if self.index.contains(url) || !seen.insert(url) {
                debug!(canonical_url = url, "already persisted; skipping");
                report.duplicates += 1;
                report.persisted.push(url.to_string());
                continue;
            }
            fresh.push(a.clone());
        }

        if !fresh.is_empty() {
            let out = self.store.insert_many(&fresh).await?;
            if out.duplicates > 0 {
                debug!(duplicates = out.duplicates, "store reported duplicate keys; treating as saved");
            }
            report.saved += out.inserted;
            report.duplicates += out.duplicates;
            for a in &fresh {
                self.index.insert(a.canonical_url.as_str());
                report.persisted.push(a.canonical_url.clone());
            }
        }

        counter!("persist_saved_total").increment(report.saved as u64);
        counter!("persist_duplicate_total").increment(report.duplicates as u64);
        info!(
            saved = report.saved,
            duplicates = report.duplicates,
            "persisted articles"
        );
        Ok(report)
    }
}
