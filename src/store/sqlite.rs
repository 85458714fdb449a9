// src/store/sqlite.rs
//! SQLite article store. `canonical_url` carries a UNIQUE constraint, so two
//! processes racing on the same URL end in one row plus a duplicate-key error.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{ArticleFilter, ArticleStore, InsertOutcome, SortOrder, StoreError, StoreResult};
use crate::model::CleanedArticle;

const COLUMNS: &str =
    "id, canonical_url, source, title, content, author, published_at, extras, processed_at";

const INSERT: &str = "INSERT INTO articles \
     (id, canonical_url, source, title, content, author, published_at, extras, processed_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_OR_SKIP: &str = "INSERT INTO articles \
     (id, canonical_url, source, title, content, author, published_at, extras, processed_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT DO NOTHING";

pub struct SqliteStore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn bind_article<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    a: &'q CleanedArticle,
) -> StoreResult<Query<'q, Sqlite, SqliteArguments<'q>>> {
    let extras = serde_json::to_string(&a.extras)
        .map_err(|e| StoreError::Corrupt(format!("{}: extras: {e}", a.canonical_url)))?;
    Ok(q.bind(&a.id)
        .bind(&a.canonical_url)
        .bind(&a.source)
        .bind(&a.title)
        .bind(&a.content)
        .bind(&a.author)
        .bind(&a.published_at)
        .bind(extras)
        .bind(ts(&a.processed_at)))
}

/// Fixed-width RFC 3339 so text comparison orders like time.
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Open (and create if needed) the database behind a `sqlite:` URL.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = opts.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Backend(format!("creating {}: {e}", parent.display())))?;
                }
            }
        }

        // every connection to `:memory:` is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(opts)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        debug!(url, "sqlite article store ready");
        Ok(store)
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                canonical_url TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                author TEXT NOT NULL,
                published_at TEXT NOT NULL,
                extras TEXT NOT NULL DEFAULT '{}',
                processed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source);
            CREATE INDEX IF NOT EXISTS idx_articles_processed_at ON articles(processed_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: String,
    canonical_url: String,
    source: String,
    title: String,
    content: String,
    author: String,
    published_at: String,
    extras: String,
    processed_at: String,
}

impl ArticleRow {
    fn into_article(self) -> StoreResult<CleanedArticle> {
        let processed_at = DateTime::parse_from_rfc3339(&self.processed_at)
            .map_err(|e| StoreError::Corrupt(format!("{}: processed_at: {e}", self.canonical_url)))?
            .with_timezone(&Utc);
        let extras = serde_json::from_str(&self.extras)
            .map_err(|e| StoreError::Corrupt(format!("{}: extras: {e}", self.canonical_url)))?;
        Ok(CleanedArticle {
            id: self.id,
            title: self.title,
            content: self.content,
            author: self.author,
            source: self.source,
            canonical_url: self.canonical_url,
            published_at: self.published_at,
            extras,
            processed_at,
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ArticleFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(s) = &filter.source {
        qb.push(" AND source = ").push_bind(s.clone());
    }
    if let Some(a) = &filter.author {
        qb.push(" AND author = ").push_bind(a.clone());
    }
    if let Some(t) = &filter.processed_since {
        qb.push(" AND processed_at >= ").push_bind(ts(t));
    }
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn insert(&self, a: &CleanedArticle) -> StoreResult<()> {
        let res = bind_article(sqlx::query(INSERT), a)?
            .execute(&self.pool)
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateKey(a.canonical_url.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    /// One transaction for the whole batch; a row that hits the unique
    /// constraint is skipped and counted, the rest still commit.
    async fn insert_many(&self, articles: &[CleanedArticle]) -> StoreResult<InsertOutcome> {
        let mut out = InsertOutcome::default();
        if articles.is_empty() {
            return Ok(out);
        }
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for a in articles {
            let res = bind_article(sqlx::query(INSERT_OR_SKIP), a)?
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            if res.rows_affected() == 0 {
                debug!(canonical_url = %a.canonical_url, "duplicate key in batch");
                out.duplicates += 1;
            } else {
                out.inserted += 1;
            }
        }
        tx.commit().await.map_err(backend)?;
        Ok(out)
    }

    async fn existing_urls(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT canonical_url FROM articles")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn count(&self, filter: &ArticleFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles");
        push_filter(&mut qb, filter);
        let (n,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n.max(0) as u64)
    }

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT source, COUNT(*) FROM articles GROUP BY source")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(s, n)| (s, n.max(0) as u64))
            .collect())
    }

    async fn find(
        &self,
        filter: &ArticleFilter,
        sort: SortOrder,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<CleanedArticle>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM articles"));
        push_filter(&mut qb, filter);
        qb.push(match sort {
            SortOrder::NewestFirst => " ORDER BY processed_at DESC",
            SortOrder::OldestFirst => " ORDER BY processed_at ASC",
        });
        qb.push(" LIMIT ")
            .push_bind(limit.min(i64::MAX as u64) as i64)
            .push(" OFFSET ")
            .push_bind(skip.min(i64::MAX as u64) as i64);

        let rows: Vec<ArticleRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<CleanedArticle>> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ArticleRow::into_article).transpose()
    }

    async fn search(&self, query: &str, limit: u64) -> StoreResult<Vec<CleanedArticle>> {
        let q = query.trim();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {COLUMNS} FROM articles \
             WHERE title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\' \
             ORDER BY processed_at DESC LIMIT ?2"
        ))
        .bind(like_pattern(q))
        .bind(limit.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
