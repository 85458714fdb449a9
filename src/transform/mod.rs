// src/transform/mod.rs
//! Transformation worker: raw captures in, cleaned articles out. No persistence
//! side effects; every item ends in exactly one [`ItemOutcome`].

pub mod client;
pub mod normalize;
pub mod parse;
pub mod retry;
pub mod templates;
pub mod validate;

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::CleanerSettings;
use crate::model::{article_id, CleanedArticle, RawCapture, NOT_PROVIDED};
use client::TextGenClient;
use parse::{parse_response, Parsed, ParsedFields};
use retry::RetryPolicy;
use templates::{SourceTemplate, TemplateRegistry};
use validate::ValidationRules;

/// Terminal result for one capture within a run.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Cleaned(Box<CleanedArticle>),
    /// Flagged out-of-domain by the service. A normal outcome.
    Irrelevant,
    /// Parse or validation failure; retrying cannot help.
    Rejected(String),
    /// Service calls exhausted their retries or failed fatally. Dropped with
    /// the reason logged; the capture is not retried on later runs.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub canonical_url: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    pub items: Vec<ItemReport>,
}

impl TransformReport {
    pub fn articles(&self) -> Vec<CleanedArticle> {
        self.items
            .iter()
            .filter_map(|r| match &r.outcome {
                ItemOutcome::Cleaned(a) => Some((**a).clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cleaned(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Cleaned(_)))
    }
    pub fn irrelevant(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Irrelevant))
    }
    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Rejected(_)))
    }
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| f(&r.outcome)).count()
    }
}

pub struct TransformWorker {
    client: Arc<dyn TextGenClient>,
    templates: TemplateRegistry,
    policy: RetryPolicy,
    rules: ValidationRules,
    chunk_size: usize,
    chunk_interval: Duration,
}

impl TransformWorker {
    pub fn new(client: Arc<dyn TextGenClient>, policy: RetryPolicy, settings: &CleanerSettings) -> Self {
        Self {
            client,
            templates: TemplateRegistry::builtin(),
            policy,
            rules: ValidationRules::from(settings),
            chunk_size: settings.chunk_size.max(1),
            chunk_interval: Duration::from_secs(settings.chunk_interval_secs),
        }
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    /// Process a staging batch sequentially, chunk by chunk, pausing between chunks.
    pub async fn run(&self, batch: &[RawCapture]) -> TransformReport {
        let mut report = TransformReport::default();
        let chunks = batch.chunks(self.chunk_size).count();
        for (i, chunk) in batch.chunks(self.chunk_size).enumerate() {
            debug!(chunk = i + 1, chunks, size = chunk.len(), "processing chunk");
            for capture in chunk {
                let outcome = self.process(capture).await;
                record(capture, &outcome);
                report.items.push(ItemReport {
                    canonical_url: capture.canonical_url.clone(),
                    outcome,
                });
            }
            if i + 1 < chunks && !self.chunk_interval.is_zero() {
                tokio::time::sleep(self.chunk_interval).await;
            }
        }
        report
    }

    pub async fn process(&self, capture: &RawCapture) -> ItemOutcome {
        counter!("clean_items_total").increment(1);
        let template = self.templates.get(&capture.source);
        let user = template.user_content(capture);

        let label = format!("{}:{}", capture.source, capture.canonical_url);
        let client = &self.client;
        let system = template.system_prompt.as_str();
        let user = user.as_str();
        let response = self
            .policy
            .run(&label, move |_| async move { client.complete(system, user).await })
            .await;
        let text = match response {
            Ok(t) => t,
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        };

        let fields = match parse_response(&text, &template.fields) {
            Ok(Parsed::Irrelevant) => return ItemOutcome::Irrelevant,
            Ok(p) => match p.into_fields() {
                Some(f) => f,
                None => return ItemOutcome::Irrelevant,
            },
            Err(e) => return ItemOutcome::Rejected(e.to_string()),
        };

        let title = normalize::normalize_title(&fields.title);
        let content = normalize::normalize_content(&template.layout(&fields.content));
        if let Err(e) = self.rules.check(&title, &content) {
            return ItemOutcome::Rejected(e.to_string());
        }

        ItemOutcome::Cleaned(Box::new(build_article(capture, template, fields, title, content)))
    }
}

fn record(capture: &RawCapture, outcome: &ItemOutcome) {
    let url = capture.canonical_url.as_str();
    let source = capture.source.as_str();
    match outcome {
        ItemOutcome::Cleaned(a) => debug!(source, canonical_url = url, title = %a.title, "cleaned"),
        ItemOutcome::Irrelevant => {
            counter!("clean_irrelevant_total").increment(1);
            info!(source, canonical_url = url, "dropped: not relevant");
        }
        ItemOutcome::Rejected(reason) => {
            counter!("clean_rejected_total").increment(1);
            warn!(source, canonical_url = url, reason = %reason, "dropped: rejected");
        }
        ItemOutcome::Failed(reason) => {
            counter!("clean_failed_total").increment(1);
            error!(source, canonical_url = url, reason = %reason, "dropped: service calls failed");
        }
    }
}

/// Published time from the capture itself, used when the response has none.
fn capture_date(capture: &RawCapture) -> Option<String> {
    capture
        .raw_str("published_date")
        .or_else(|| capture.raw_str("date_time"))
        .map(str::to_string)
        .or_else(|| {
            capture
                .metadata
                .captured_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        })
}

fn build_article(
    capture: &RawCapture,
    template: &SourceTemplate,
    fields: ParsedFields,
    title: String,
    content: String,
) -> CleanedArticle {
    let author = fields
        .author
        .or_else(|| capture.metadata.author.clone())
        .unwrap_or_else(|| NOT_PROVIDED.to_string());
    let published_at = fields
        .date
        .or_else(|| capture_date(capture))
        .unwrap_or_else(|| NOT_PROVIDED.to_string());

    let mut extras = fields.extras;
    for extra in &template.fields.extras {
        if extras.contains_key(extra.key) {
            continue;
        }
        let value = extra
            .fallback
            .and_then(|f| f(capture))
            .unwrap_or_else(|| Value::String(NOT_PROVIDED.to_string()));
        extras.insert(extra.key.to_string(), value);
    }

    CleanedArticle {
        id: article_id(&capture.source, &capture.canonical_url),
        title,
        content,
        author,
        source: capture.source.clone(),
        canonical_url: capture.canonical_url.clone(),
        published_at,
        extras,
        processed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::{ScriptedClient, ServiceError};
    use serde_json::json;

    const BODY: &str = "OpenAI 今天发布了新一代模型 GPT-5，在推理、编码与多模态理解上均有显著提升，并同步开放了接口，开发者可以立即申请试用";

    fn settings() -> CleanerSettings {
        CleanerSettings {
            chunk_interval_secs: 0,
            ..CleanerSettings::default()
        }
    }

    fn worker(client: ScriptedClient) -> TransformWorker {
        TransformWorker::new(Arc::new(client), RetryPolicy::default(), &settings())
    }

    fn capture(url: &str) -> RawCapture {
        RawCapture::new("x.com", "OpenAI releases GPT-5", url).with_author("alice")
    }

    #[tokio::test]
    async fn builds_article_with_fallbacks() {
        let mut cap = capture("https://x.com/alice/1");
        cap.metadata.likes = Some(42);
        cap.metadata.raw = json!({"published_date": "2025-03-01 08:00"});
        let resp = json!({"title": "OpenAI发布GPT-5", "content": BODY, "retweets": "1,200"}).to_string();

        let out = worker(ScriptedClient::always(resp)).process(&cap).await;
        let ItemOutcome::Cleaned(a) = out else {
            panic!("expected cleaned outcome");
        };
        assert_eq!(a.title, "OpenAI 发布 GPT-5");
        assert!(a.content.ends_with('。'));
        assert_eq!(a.author, "alice");
        assert_eq!(a.published_at, "2025-03-01 08:00");
        assert_eq!(a.extras["likes"], json!(42));
        assert_eq!(a.extras["retweets"], json!(1200));
        assert_eq!(a.extras["followers"], json!(NOT_PROVIDED));
        assert_eq!(a.id, article_id("x.com", "https://x.com/alice/1"));
    }

    #[tokio::test]
    async fn irrelevant_and_rejected_yield_no_articles() {
        let w = worker(ScriptedClient::new(vec![
            Ok("NOT_RELEVANT".into()),
            Ok(r#"{"title":"t","content":"short"}"#.into()),
        ]));
        let report = w.run(&[capture("u1"), capture("u2")]).await;
        assert_eq!(report.irrelevant(), 1);
        assert_eq!(report.rejected(), 1);
        assert!(report.articles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_service_error_fails_item_without_aborting_batch() {
        let resp = json!({"title": "标题", "content": BODY}).to_string();
        let w = worker(ScriptedClient::new(vec![
            Err(ServiceError::Rejected {
                status: 400,
                body: "bad request".into(),
            }),
            Ok(resp),
        ]));
        let report = w.run(&[capture("u1"), capture("u2")]).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.cleaned(), 1);
        assert_eq!(report.items[1].canonical_url, "u2");
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_pause_between_each_other() {
        let resp = json!({"title": "标题", "content": BODY}).to_string();
        let settings = CleanerSettings {
            chunk_size: 2,
            chunk_interval_secs: 10,
            ..CleanerSettings::default()
        };
        let w = TransformWorker::new(
            Arc::new(ScriptedClient::always(resp)),
            RetryPolicy::default(),
            &settings,
        );
        let start = tokio::time::Instant::now();
        let batch: Vec<RawCapture> = (0..5).map(|i| capture(&format!("u{i}"))).collect();
        let report = w.run(&batch).await;
        assert_eq!(report.cleaned(), 5);
        // three chunks, two pauses
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    }
}
