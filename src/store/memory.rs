// src/store/memory.rs
//! In-memory article store with the same uniqueness contract as SQLite.
//! Used by tests and `store.url = "memory:"` dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use super::{ArticleFilter, ArticleStore, SortOrder, StoreError, StoreResult};
use crate::model::CleanedArticle;

#[derive(Default)]
struct Inner {
    rows: Vec<CleanedArticle>,
    urls: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored article, in insertion order.
    pub fn all(&self) -> Vec<CleanedArticle> {
        self.read(|i| i.rows.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    fn sorted(&self, filter: &ArticleFilter, sort: SortOrder) -> Vec<CleanedArticle> {
        let mut rows: Vec<CleanedArticle> =
            self.read(|i| i.rows.iter().filter(|a| filter.matches(a)).cloned().collect());
        rows.sort_by_key(|a| a.processed_at);
        if sort == SortOrder::NewestFirst {
            rows.reverse();
        }
        rows
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert(&self, article: &CleanedArticle) -> StoreResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if !guard.urls.insert(article.canonical_url.clone()) {
            return Err(StoreError::DuplicateKey(article.canonical_url.clone()));
        }
        guard.rows.push(article.clone());
        Ok(())
    }

    async fn existing_urls(&self) -> StoreResult<Vec<String>> {
        Ok(self.read(|i| i.rows.iter().map(|a| a.canonical_url.clone()).collect()))
    }

    async fn count(&self, filter: &ArticleFilter) -> StoreResult<u64> {
        Ok(self.read(|i| i.rows.iter().filter(|a| filter.matches(a)).count() as u64))
    }

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, u64>> {
        Ok(self.read(|i| {
            let mut out = BTreeMap::new();
            for a in &i.rows {
                *out.entry(a.source.clone()).or_insert(0) += 1;
            }
            out
        }))
    }

    async fn find(
        &self,
        filter: &ArticleFilter,
        sort: SortOrder,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<CleanedArticle>> {
        Ok(self
            .sorted(filter, sort)
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<CleanedArticle>> {
        Ok(self.read(|i| i.rows.iter().find(|a| a.id == id).cloned()))
    }

    async fn search(&self, query: &str, limit: u64) -> StoreResult<Vec<CleanedArticle>> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .sorted(&ArticleFilter::default(), SortOrder::NewestFirst)
            .into_iter()
            .filter(|a| a.title.to_lowercase().contains(&q) || a.content.to_lowercase().contains(&q))
            .take(limit as usize)
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn article(url: &str, title: &str, age_mins: i64) -> CleanedArticle {
        CleanedArticle {
            id: crate::model::article_id("x.com", url),
            title: title.into(),
            content: "body text".into(),
            author: "alice".into(),
            source: "x.com".into(),
            canonical_url: url.into(),
            published_at: "2025-01-01".into(),
            extras: BTreeMap::new(),
            processed_at: Utc::now() - Duration::minutes(age_mins),
        }
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected() {
        let s = MemoryStore::new();
        s.insert(&article("u1", "a", 0)).await.unwrap();
        let err = s.insert(&article("u1", "b", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(u) if u == "u1"));
        assert_eq!(s.all().len(), 1);
    }

    #[tokio::test]
    async fn insert_many_counts_duplicates() {
        let s = MemoryStore::new();
        let batch = vec![article("u1", "a", 0), article("u2", "b", 0), article("u1", "c", 0)];
        let out = s.insert_many(&batch).await.unwrap();
        assert_eq!((out.inserted, out.duplicates), (2, 1));
    }

    #[tokio::test]
    async fn find_sorts_and_pages() {
        let s = MemoryStore::new();
        for (i, url) in ["old", "mid", "new"].iter().enumerate() {
            s.insert(&article(url, url, 30 - i as i64 * 10)).await.unwrap();
        }
        let page = s
            .find(&ArticleFilter::default(), SortOrder::NewestFirst, 1, 5)
            .await
            .unwrap();
        let urls: Vec<_> = page.iter().map(|a| a.canonical_url.as_str()).collect();
        assert_eq!(urls, vec!["mid", "old"]);
    }

    #[tokio::test]
    async fn search_and_lookup() {
        let s = MemoryStore::new();
        s.insert(&article("u1", "OpenAI GPT-5", 0)).await.unwrap();
        s.insert(&article("u2", "Anthropic funding", 0)).await.unwrap();
        let hits = s.search("gpt", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let id = crate::model::article_id("x.com", "u2");
        assert_eq!(s.get_by_id(&id).await.unwrap().unwrap().canonical_url, "u2");
        assert_eq!(s.count_by_source().await.unwrap()["x.com"], 2);
    }
}
