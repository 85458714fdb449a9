// src/store/mod.rs
//! Persistence store contract for cleaned articles. Engines must enforce
//! uniqueness of `canonical_url`; a second insert surfaces as
//! [`StoreError::DuplicateKey`].

pub mod memory;
pub mod sqlite;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::CleanedArticle;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("article with canonical_url {0} already stored")]
    DuplicateKey(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Equality/lower-bound filter used by `count` and `find`.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub source: Option<String>,
    pub author: Option<String>,
    /// Only articles processed at or after this instant.
    pub processed_since: Option<DateTime<Utc>>,
}

impl ArticleFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, a: &CleanedArticle) -> bool {
        self.source.as_deref().map_or(true, |s| a.source == s)
            && self.author.as_deref().map_or(true, |s| a.author == s)
            && self.processed_since.map_or(true, |t| a.processed_at >= t)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// By `processed_at`, descending.
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert one article; `DuplicateKey` when its canonical_url already exists.
    async fn insert(&self, article: &CleanedArticle) -> StoreResult<()>;

    /// Insert every article, counting duplicate-key rejections instead of failing.
    async fn insert_many(&self, articles: &[CleanedArticle]) -> StoreResult<InsertOutcome> {
        let mut out = InsertOutcome::default();
        for a in articles {
            match self.insert(a).await {
                Ok(()) => out.inserted += 1,
                Err(StoreError::DuplicateKey(_)) => out.duplicates += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Every persisted canonical_url; seeds the dedup index.
    async fn existing_urls(&self) -> StoreResult<Vec<String>>;

    async fn count(&self, filter: &ArticleFilter) -> StoreResult<u64>;

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, u64>>;

    async fn find(
        &self,
        filter: &ArticleFilter,
        sort: SortOrder,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<CleanedArticle>>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<CleanedArticle>>;

    /// Case-insensitive substring search over title and content, newest first.
    async fn search(&self, query: &str, limit: u64) -> StoreResult<Vec<CleanedArticle>>;

    fn name(&self) -> &'static str;
}

/// Open the store named by `url`: `memory:` or any sqlite URL.
pub async fn connect(url: &str) -> anyhow::Result<Arc<dyn ArticleStore>> {
    if url.trim() == "memory:" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(url)
        .await
        .with_context(|| format!("opening article store {url}"))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(source: &str, author: &str) -> CleanedArticle {
        CleanedArticle {
            id: "id".into(),
            title: "t".into(),
            content: "c".into(),
            author: author.into(),
            source: source.into(),
            canonical_url: "u".into(),
            published_at: "2025-01-01".into(),
            extras: BTreeMap::new(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_all_set_fields() {
        let a = article("x.com", "alice");
        assert!(ArticleFilter::default().matches(&a));
        assert!(ArticleFilter::source("x.com").matches(&a));
        assert!(!ArticleFilter::source("crunchbase.com").matches(&a));
        let f = ArticleFilter {
            author: Some("bob".into()),
            ..ArticleFilter::source("x.com")
        };
        assert!(!f.matches(&a));
    }

    #[tokio::test]
    async fn connect_memory_store() {
        let store = connect("memory:").await.unwrap();
        assert_eq!(store.name(), "memory");
        assert_eq!(store.count(&ArticleFilter::default()).await.unwrap(), 0);
    }
}
