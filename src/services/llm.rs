//! LLM collaborator: the refinement pass's chat-completions client.
//!
//! Refinement is fail-open by contract, so the client is deliberately
//! thin: one `complete` operation, bounded retries with exponential
//! backoff on transient failures, and an error value for everything else.
//! The pipeline never depends on this service being reachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";

/// Why a completion produced no text.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM not configured")]
    NotConfigured,

    #[error("LLM API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    /// 5xx and timeouts are worth retrying; auth and 4xx are not.
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One system + user prompt in, one completion out.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl OpenAiCompatClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
        temperature: f32,
        max_tokens: usize,
        max_retries: u32,
        retry_backoff_ms: u64,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url
                .unwrap_or(OPENAI_DEFAULT_BASE)
                .trim_end_matches('/')
                .to_string(),
            temperature,
            max_tokens,
            max_retries,
            retry_backoff_ms,
            timeout_secs,
        })
    }

    /// Build a client from an [`ExtractionConfig`], or `None` when no
    /// model/key is configured.
    pub fn from_config(config: &crate::config::ExtractionConfig) -> Option<Self> {
        let key = config.llm_api_key.as_deref()?;
        let model = config.llm_model.as_deref()?;
        Self::new(
            key,
            model,
            config.llm_base_url.as_deref(),
            config.temperature,
            config.max_tokens,
            config.max_retries,
            config.retry_backoff_ms,
            config.api_timeout_secs,
        )
        .ok()
    }

    async fn call_once(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

#[async_trait]
impl LlmService for OpenAiCompatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut last_err = LlmError::NotConfigured;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Refinement retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.call_once(system, user).await {
                Ok(content) => {
                    debug!("Refinement completion: {} chars", content.len());
                    return Ok(content);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!("Refinement attempt {} failed: {}", attempt + 1, e);
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
