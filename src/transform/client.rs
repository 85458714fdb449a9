// src/transform/client.rs
//! Text-generation service abstraction + the OpenAI-compatible HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use super::retry::{Classify, ErrorClass};
use crate::config::AiSettings;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider returned an empty completion")]
    EmptyResponse,
    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl Classify for ServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Connection(_) | ServiceError::Timeout | ServiceError::EmptyResponse => {
                ErrorClass::Transient
            }
            ServiceError::RateLimited => ErrorClass::RateLimited,
            // 5xx is the provider's problem and usually passes.
            ServiceError::Rejected { status, .. } if *status >= 500 => ErrorClass::Transient,
            ServiceError::Rejected { .. } | ServiceError::Decode(_) => ErrorClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::Decode(e.to_string())
        } else {
            ServiceError::Connection(e.to_string())
        }
    }
}

/// One request = (system instructions, user content); one response = free text.
#[async_trait]
pub trait TextGenClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ServiceError>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible Chat Completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn from_settings(settings: &AiSettings) -> anyhow::Result<Self> {
        let api_key = settings.resolved_api_key()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("ainews-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}
#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ServiceError> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        metrics::counter!("ai_calls_total").increment(1);
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body: crate::transform::normalize::truncate_chars(&body, 300),
            });
        }

        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ServiceError::EmptyResponse);
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Deterministic client for tests and dry runs: replays a scripted sequence of
/// outcomes, then repeats `fallback` forever. Counts every call. Blank texts
/// come back as `EmptyResponse`, like from the HTTP client.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    fallback: Box<dyn Fn() -> Result<String, ServiceError> + Send + Sync>,
    calls: AtomicU32,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Box::new(|| Err(ServiceError::EmptyResponse)),
            calls: AtomicU32::new(0),
        }
    }

    /// Always answer with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(Vec::new()).with_fallback(move || Ok(text.clone()))
    }

    pub fn with_fallback(
        mut self,
        f: impl Fn() -> Result<String, ServiceError> + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Box::new(f);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenClient for ScriptedClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        let out = match next {
            Some(r) => r,
            None => (self.fallback)(),
        };
        // same contract as the HTTP client: a blank completion is an error
        match out {
            Ok(text) if text.trim().is_empty() => Err(ServiceError::EmptyResponse),
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(ServiceError::Timeout.class(), ErrorClass::Transient);
        assert_eq!(ServiceError::EmptyResponse.class(), ErrorClass::Transient);
        assert_eq!(ServiceError::RateLimited.class(), ErrorClass::RateLimited);
        let bad = ServiceError::Rejected {
            status: 400,
            body: "bad".into(),
        };
        assert_eq!(bad.class(), ErrorClass::Fatal);
        let down = ServiceError::Rejected {
            status: 503,
            body: String::new(),
        };
        assert_eq!(down.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn scripted_client_replays_then_falls_back() {
        let c = ScriptedClient::new(vec![Err(ServiceError::Timeout), Ok("hi".into())]);
        assert!(c.complete("s", "u").await.is_err());
        assert_eq!(c.complete("s", "u").await.unwrap(), "hi");
        assert!(matches!(
            c.complete("s", "u").await,
            Err(ServiceError::EmptyResponse)
        ));
        assert_eq!(c.calls(), 3);
    }
}
