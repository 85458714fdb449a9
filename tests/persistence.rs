// tests/persistence.rs
use ainews_pipeline::model::{article_id, CleanedArticle};
use ainews_pipeline::store::{ArticleFilter, ArticleStore, MemoryStore, SqliteStore};
use ainews_pipeline::PersistenceGateway;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

fn article(url: &str) -> CleanedArticle {
    CleanedArticle {
        id: article_id("x.com", url),
        title: format!("title for {url}"),
        content: "content".into(),
        author: "alice".into(),
        source: "x.com".into(),
        canonical_url: url.into(),
        published_at: "2025-01-01 00:00".into(),
        extras: BTreeMap::new(),
        processed_at: Utc::now(),
    }
}

async fn assert_idempotent(store: Arc<dyn ArticleStore>) {
    let gw = PersistenceGateway::open(store.clone()).await.unwrap();
    let urls = ["u1", "u2", "u1", "u3", "u2", "u2"];
    let batch: Vec<_> = urls.iter().map(|u| article(u)).collect();

    assert_eq!(gw.save(&batch).await.unwrap(), 3);
    assert_eq!(gw.save(&batch).await.unwrap(), 0);

    let mut stored = store.existing_urls().await.unwrap();
    stored.sort();
    assert_eq!(stored, vec!["u1", "u2", "u3"]);
}

#[tokio::test]
async fn duplicate_urls_persist_once_in_memory() {
    assert_idempotent(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn duplicate_urls_persist_once_in_sqlite() {
    assert_idempotent(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn reloaded_index_rejects_every_persisted_url() {
    let tmp = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", tmp.path().join("a.db").display());
    let batch: Vec<_> = (0..20).map(|i| article(&format!("https://x.com/a/{i}"))).collect();

    {
        let store: Arc<dyn ArticleStore> = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let gw = PersistenceGateway::open(store).await.unwrap();
        assert_eq!(gw.save(&batch).await.unwrap(), 20);
    }

    // fresh process: index is rebuilt from the store
    let store: Arc<dyn ArticleStore> = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let gw = PersistenceGateway::open(store.clone()).await.unwrap();
    assert_eq!(gw.index().len(), 20);
    let report = gw.save_report(&batch).await.unwrap();
    assert_eq!(report.saved, 0);
    assert_eq!(report.duplicates, 20);
    assert_eq!(store.count(&ArticleFilter::default()).await.unwrap(), 20);
}

#[tokio::test]
async fn two_gateways_racing_on_one_store() {
    let store: Arc<dyn ArticleStore> = Arc::new(MemoryStore::new());
    let a = PersistenceGateway::open(store.clone()).await.unwrap();
    let b = PersistenceGateway::open(store.clone()).await.unwrap();
    let batch = vec![article("shared")];

    let (ra, rb) = tokio::join!(a.save(&batch), b.save(&batch));
    assert_eq!(ra.unwrap() + rb.unwrap(), 1);
    assert_eq!(store.count(&ArticleFilter::default()).await.unwrap(), 1);
}
