// src/transform/templates.rs
//! Per-source request templates and response field maps, keyed by `source`.

use serde_json::Value;
use std::collections::HashMap;

use super::normalize::format_crunchbase_content;
use crate::model::RawCapture;

/// Response text meaning "not relevant to the AI news domain".
pub const IRRELEVANT_SENTINEL: &str = "NOT_RELEVANT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Integer counter; accepts `1,234`.
    Count,
}

/// A source-specific optional field (`likes`, `funding_round`, ...).
#[derive(Clone)]
pub struct ExtraField {
    pub key: &'static str,
    pub labels: &'static [&'static str],
    pub kind: FieldKind,
    /// Value taken from the raw capture when the response lacks the field.
    pub fallback: Option<fn(&RawCapture) -> Option<Value>>,
}

/// Which response labels feed which article field.
#[derive(Clone)]
pub struct FieldMap {
    pub title: &'static [&'static str],
    pub content: &'static [&'static str],
    pub author: &'static [&'static str],
    pub date: &'static [&'static str],
    pub extras: Vec<ExtraField>,
}

const TITLE: &[&str] = &["title", "标题"];
const CONTENT: &[&str] = &["content", "正文", "body"];
const AUTHOR: &[&str] = &["author", "作者"];
const DATE: &[&str] = &["date", "日期", "date_time", "published_at"];

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            title: TITLE,
            content: CONTENT,
            author: AUTHOR,
            date: DATE,
            extras: Vec::new(),
        }
    }
}

impl FieldMap {
    /// Canonical key for a response label, if this map knows it.
    pub fn canonical(&self, label: &str) -> Option<&'static str> {
        let l = label.trim().trim_matches(|c| c == '"' || c == '*').trim();
        let l = l.to_lowercase();
        let hit = |labels: &[&str]| labels.iter().any(|x| x.to_lowercase() == l);
        if hit(self.title) {
            return Some("title");
        }
        if hit(self.content) {
            return Some("content");
        }
        if hit(self.author) {
            return Some("author");
        }
        if hit(self.date) {
            return Some("date");
        }
        self.extras
            .iter()
            .find(|e| e.key == l || hit(e.labels))
            .map(|e| e.key)
    }

    pub fn extra(&self, key: &str) -> Option<&ExtraField> {
        self.extras.iter().find(|e| e.key == key)
    }
}

#[derive(Clone)]
pub struct SourceTemplate {
    pub source: String,
    pub system_prompt: String,
    pub build_user: fn(&RawCapture) -> String,
    pub fields: FieldMap,
    /// Source-specific layout applied to the body before normalization.
    pub format_content: Option<fn(&str) -> String>,
}

impl SourceTemplate {
    pub fn user_content(&self, capture: &RawCapture) -> String {
        (self.build_user)(capture)
    }

    pub fn layout(&self, content: &str) -> String {
        match self.format_content {
            Some(f) => f(content),
            None => content.to_string(),
        }
    }
}

/// `source -> template`, with a catch-all default for unknown sources.
#[derive(Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, SourceTemplate>,
    default: SourceTemplate,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateRegistry {
    pub fn builtin() -> Self {
        let mut reg = Self {
            templates: HashMap::new(),
            default: default_template(),
        };
        reg.register(x_template());
        reg.register(crunchbase_template());
        reg
    }

    pub fn register(&mut self, t: SourceTemplate) {
        self.templates.insert(t.source.to_ascii_lowercase(), t);
    }

    pub fn get(&self, source: &str) -> &SourceTemplate {
        self.templates
            .get(&source.trim().to_ascii_lowercase())
            .unwrap_or(&self.default)
    }
}

fn output_rules(fields: &str) -> String {
    format!(
        "Reply with ONE JSON object only, keys: {fields}. \
         Missing optional values use \"{na}\". \
         If the material is not about AI technology, products, research, business or policy, \
         reply with {{}} or the single word {IRRELEVANT_SENTINEL}.",
        na = crate::model::NOT_PROVIDED
    )
}

fn x_template() -> SourceTemplate {
    SourceTemplate {
        source: "x.com".into(),
        system_prompt: format!(
            "You turn posts from x.com into short Chinese AI-industry news items. \
             Translate to Chinese, keep technical terms, write a headline of at most 25 characters \
             and list media links at the end of the body. {}",
            output_rules("title, content, author, followers, likes, retweets, date (YYYY-MM-DD HH:MM)")
        ),
        build_user: x_user_content,
        fields: FieldMap {
            extras: vec![
                ExtraField {
                    key: "followers",
                    labels: &["粉丝数"],
                    kind: FieldKind::Count,
                    fallback: Some(fallback_followers),
                },
                ExtraField {
                    key: "likes",
                    labels: &["点赞数"],
                    kind: FieldKind::Count,
                    fallback: Some(fallback_likes),
                },
                ExtraField {
                    key: "retweets",
                    labels: &["转发数"],
                    kind: FieldKind::Count,
                    fallback: Some(fallback_retweets),
                },
            ],
            ..FieldMap::default()
        },
        format_content: None,
    }
}

fn crunchbase_template() -> SourceTemplate {
    let text = |key: &'static str, labels: &'static [&'static str]| ExtraField {
        key,
        labels,
        kind: FieldKind::Text,
        fallback: None,
    };
    SourceTemplate {
        source: "crunchbase.com".into(),
        system_prompt: format!(
            "You turn Crunchbase funding articles into Chinese AI-investment news. \
             Keep the full level of detail; headline format is company + amount + round. {}",
            output_rules(
                "title, content, author, company, funding_round, funding_amount, investors, date (YYYY-MM-DD)"
            )
        ),
        build_user: crunchbase_user_content,
        fields: FieldMap {
            extras: vec![
                text("company", &["公司"]),
                text("funding_round", &["融资轮次"]),
                text("funding_amount", &["融资金额"]),
                text("investors", &["投资方"]),
            ],
            ..FieldMap::default()
        },
        format_content: Some(format_crunchbase_content),
    }
}

fn default_template() -> SourceTemplate {
    SourceTemplate {
        source: "*".into(),
        system_prompt: format!(
            "You turn scraped material into a structured Chinese news item. {}",
            output_rules("title, content, author, date")
        ),
        build_user: default_user_content,
        fields: FieldMap::default(),
        format_content: None,
    }
}

fn raw_u64(c: &RawCapture, key: &str) -> Option<u64> {
    c.metadata.raw.get(key).and_then(Value::as_u64)
}

fn fallback_followers(c: &RawCapture) -> Option<Value> {
    c.metadata
        .followers
        .or_else(|| raw_u64(c, "followers_count"))
        .map(Value::from)
}

fn fallback_likes(c: &RawCapture) -> Option<Value> {
    c.metadata
        .likes
        .or_else(|| raw_u64(c, "favorite_count"))
        .map(Value::from)
}

fn fallback_retweets(c: &RawCapture) -> Option<Value> {
    c.metadata
        .retweets
        .or_else(|| raw_u64(c, "retweet_count"))
        .map(Value::from)
}

fn decoded(s: &str) -> String {
    html_escape::decode_html_entities(s).trim().to_string()
}

fn captured_at(c: &RawCapture) -> String {
    c.raw_str("date_time")
        .or_else(|| c.raw_str("published_date"))
        .map(str::to_string)
        .or_else(|| {
            c.metadata
                .captured_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        })
        .unwrap_or_default()
}

fn x_author(c: &RawCapture) -> String {
    match (c.raw_str("name"), c.raw_str("username")) {
        (Some(n), Some(u)) => format!("{n} (@{u})"),
        (Some(n), None) => n.to_string(),
        (None, Some(u)) => format!("@{u}"),
        (None, None) => c.metadata.author.clone().unwrap_or_default(),
    }
}

fn media_kind(url: &str) -> &'static str {
    let u = url.to_ascii_lowercase();
    if [".jpg", ".jpeg", ".png", ".gif", ".webp"].iter().any(|e| u.contains(e)) {
        "image"
    } else if [".mp4", ".mov", ".avi", ".m3u8"].iter().any(|e| u.contains(e)) {
        "video"
    } else {
        "link"
    }
}

fn x_user_content(c: &RawCapture) -> String {
    let count = |v: Option<u64>| v.unwrap_or(0);
    let mut out = format!(
        "Post: {}\n\nAuthor: {}\nFollowers: {}\nLikes: {}\nRetweets: {}\nPublished: {}\nURL: {}",
        decoded(&c.text),
        x_author(c),
        count(c.metadata.followers.or_else(|| raw_u64(c, "followers_count"))),
        count(c.metadata.likes.or_else(|| raw_u64(c, "favorite_count"))),
        count(c.metadata.retweets.or_else(|| raw_u64(c, "retweet_count"))),
        captured_at(c),
        c.canonical_url,
    );
    if let Some(media) = c.metadata.raw.get("media_urls").and_then(Value::as_array) {
        let urls: Vec<&str> = media.iter().filter_map(Value::as_str).collect();
        if !urls.is_empty() {
            out.push_str("\n\nMedia:\n");
            for (i, url) in urls.iter().enumerate() {
                out.push_str(&format!("{}. {} link: {}\n", i + 1, media_kind(url), url));
            }
        }
    }
    out
}

fn crunchbase_user_content(c: &RawCapture) -> String {
    format!(
        "Article title: {}\n\nArticle body: {}\n\nAuthor: {}\nPublished: {}\nURL: {}",
        c.raw_str("title").map(decoded).unwrap_or_default(),
        c.raw_str("content")
            .map(decoded)
            .unwrap_or_else(|| decoded(&c.text)),
        c.metadata
            .author
            .clone()
            .or_else(|| c.raw_str("author").map(str::to_string))
            .unwrap_or_default(),
        captured_at(c),
        c.canonical_url,
    )
}

fn default_user_content(c: &RawCapture) -> String {
    format!(
        "Content: {}\n\nAuthor: {}\nPublished: {}\nURL: {}",
        decoded(&c.text),
        c.metadata.author.clone().unwrap_or_default(),
        captured_at(c),
        c.canonical_url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_falls_back_to_default() {
        let reg = TemplateRegistry::builtin();
        assert_eq!(reg.get("X.com").source, "x.com");
        assert_eq!(reg.get("crunchbase.com").source, "crunchbase.com");
        assert_eq!(reg.get("hotnews").source, "*");
    }

    #[test]
    fn only_crunchbase_reformats_the_body() {
        let reg = TemplateRegistry::builtin();
        let body = "第一段\n第二段 https://acme.ai";
        assert_eq!(
            reg.get("crunchbase.com").layout(body),
            "第一段\n\n第二段 [链接](https://acme.ai)"
        );
        assert_eq!(reg.get("x.com").layout(body), body);
        assert_eq!(reg.get("hotnews").layout(body), body);
    }

    #[test]
    fn canonical_labels_cover_aliases() {
        let reg = TemplateRegistry::builtin();
        let x = &reg.get("x.com").fields;
        assert_eq!(x.canonical("标题"), Some("title"));
        assert_eq!(x.canonical("\"Title\""), Some("title"));
        assert_eq!(x.canonical("点赞数"), Some("likes"));
        assert_eq!(x.canonical("funding_round"), None);
        let cb = &reg.get("crunchbase.com").fields;
        assert_eq!(cb.canonical("融资轮次"), Some("funding_round"));
    }

    #[test]
    fn x_request_lists_media_and_author() {
        let mut c = RawCapture::new("x.com", "GPT-5 &amp; friends", "https://x.com/alice/1");
        c.metadata.raw = json!({
            "name": "Alice",
            "username": "alice",
            "favorite_count": 7,
            "media_urls": ["https://pbs.twimg.com/a.jpg", "https://video.twimg.com/b.mp4"]
        });
        let reg = TemplateRegistry::builtin();
        let req = reg.get("x.com").user_content(&c);
        assert!(req.contains("GPT-5 & friends"));
        assert!(req.contains("Alice (@alice)"));
        assert!(req.contains("Likes: 7"));
        assert!(req.contains("1. image link: https://pbs.twimg.com/a.jpg"));
        assert!(req.contains("2. video link: https://video.twimg.com/b.mp4"));
    }
}
