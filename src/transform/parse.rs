// src/transform/parse.rs
//! Tagged-variant parser for text-generation responses.
//!
//! A response is tried as a JSON object first (code fences and surrounding
//! prose tolerated), then as a line-oriented `label: value` block. Both shapes
//! land in the same [`ParsedFields`], keyed through the source's [`FieldMap`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::templates::{FieldKind, FieldMap, IRRELEVANT_SENTINEL};
use crate::model::NOT_PROVIDED;

/// Field values extracted from one response, regardless of its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub date: Option<String>,
    /// Extras the response actually provided; fallbacks are applied later.
    pub extras: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// The service flagged the material as out of domain.
    Irrelevant,
    Json(ParsedFields),
    LabelValue(ParsedFields),
}

impl Parsed {
    pub fn into_fields(self) -> Option<ParsedFields> {
        match self {
            Parsed::Irrelevant => None,
            Parsed::Json(f) | Parsed::LabelValue(f) => Some(f),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("response contained no recognizable fields")]
    Unrecognized,
    #[error("required field `{0}` missing from response")]
    MissingField(&'static str),
}

pub fn parse_response(text: &str, fields: &FieldMap) -> Result<Parsed, ParseError> {
    let body = strip_code_fences(text);
    if is_irrelevant_signal(body) {
        return Ok(Parsed::Irrelevant);
    }

    if let Some(obj) = outermost_json_object(body) {
        if obj.is_empty() {
            return Ok(Parsed::Irrelevant);
        }
        let raw = json_entries(&obj, fields);
        if !raw.is_empty() {
            return finish(raw, fields).map(Parsed::Json);
        }
    }

    let raw = label_value_entries(body, fields);
    if raw.is_empty() {
        return Err(ParseError::Unrecognized);
    }
    finish(raw, fields).map(Parsed::LabelValue)
}

fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // drop the info string (`json`, `text`, ...) on the opening fence line
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn is_irrelevant_signal(body: &str) -> bool {
    let first = body.lines().next().unwrap_or("").trim();
    let first = first.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c == '。');
    first.eq_ignore_ascii_case(IRRELEVANT_SENTINEL)
}

fn outermost_json_object(body: &str) -> Option<Map<String, Value>> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

/// Canonical key -> raw value, as found in the response.
type RawEntries = BTreeMap<&'static str, Value>;

fn json_entries(obj: &Map<String, Value>, fields: &FieldMap) -> RawEntries {
    let mut out = RawEntries::new();
    for (k, v) in obj {
        if let Some(key) = fields.canonical(k) {
            out.entry(key).or_insert_with(|| v.clone());
        }
    }
    out
}

/// Split `label: value` (ASCII or full-width colon). Lines starting with a
/// URL or a `——` dash are body text, never labels.
fn split_label(line: &str) -> Option<(&str, &str)> {
    if line.starts_with("http") || line.starts_with("——") {
        return None;
    }
    let idx = line.find([':', '：'])?;
    let sep_len = line[idx..].chars().next().map_or(1, char::len_utf8);
    Some((&line[..idx], &line[idx + sep_len..]))
}

fn label_value_entries(body: &str, fields: &FieldMap) -> RawEntries {
    let mut out = RawEntries::new();
    let mut current: Option<&'static str> = None;
    let mut content: Vec<String> = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        let unbulleted = trimmed.trim_start_matches(['-', '#', '>']).trim_start();
        let labelled = split_label(unbulleted)
            .and_then(|(label, value)| fields.canonical(label).map(|k| (k, value.trim())));

        match labelled {
            Some((key, value)) => {
                current = Some(key);
                if key == "content" {
                    content.clear();
                    if !value.is_empty() {
                        content.push(value.to_string());
                    }
                } else {
                    out.insert(key, Value::String(value.to_string()));
                }
            }
            None if current == Some("content") => content.push(trimmed.to_string()),
            None => {}
        }
    }

    if !content.is_empty() {
        out.insert("content", Value::String(content.join("\n").trim().to_string()));
    }
    out
}

fn text_value(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(text_value)
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    if s.is_empty() || s == NOT_PROVIDED {
        None
    } else {
        Some(s)
    }
}

/// Counter values: `1234`, `"1234"` or `"1,234"`.
fn count_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().replace([',', '，'], "").parse().ok(),
        _ => None,
    }
}

fn finish(mut raw: RawEntries, fields: &FieldMap) -> Result<ParsedFields, ParseError> {
    let mut take = |key: &str| raw.remove(key).as_ref().and_then(text_value);
    let title = take("title").ok_or(ParseError::MissingField("title"))?;
    let content = take("content").ok_or(ParseError::MissingField("content"))?;
    let author = take("author");
    let date = take("date");

    let mut extras = BTreeMap::new();
    for (key, v) in raw {
        let Some(field) = fields.extra(key) else {
            continue;
        };
        let value = match field.kind {
            FieldKind::Count => count_value(&v).map(Value::from),
            FieldKind::Text => text_value(&v).map(Value::String),
        };
        if let Some(value) = value {
            extras.insert(key.to_string(), value);
        }
    }

    Ok(ParsedFields {
        title,
        content,
        author,
        date,
        extras,
    })
}
