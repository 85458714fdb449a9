// src/model.rs
//! Shared data model: raw captures staged by crawlers and the cleaned articles
//! produced from them. `canonical_url` is the identity key for both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Placeholder for optional fields the model did not provide.
pub const NOT_PROVIDED: &str = "未提供";

/// Author, engagement counters and the crawler's source-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CaptureMetadata {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub retweets: Option<u64>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    /// Whatever else the crawler scraped (titles, media urls, published dates...).
    #[serde(default)]
    pub raw: Value,
}

/// One scraped unit of content before cleaning. Immutable once staged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawCapture {
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub metadata: CaptureMetadata,
    pub canonical_url: String,
}

impl RawCapture {
    pub fn new(source: impl Into<String>, text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            metadata: CaptureMetadata::default(),
            canonical_url: url.into(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    /// String field from the raw payload, if present and non-empty.
    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .raw
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Structured article as persisted and served by the read API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanedArticle {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub source: String,
    pub canonical_url: String,
    pub published_at: String,
    /// Source-specific optional fields (`likes`, `funding_round`, ...).
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
    pub processed_at: DateTime<Utc>,
}

/// Stable article id: hex SHA-256 of `source + "_" + canonical_url`.
pub fn article_id(source: &str, canonical_url: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"_");
    hasher.update(canonical_url.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
