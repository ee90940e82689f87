//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint that speaks `POST {base_url}/chat/completions`
//! (OpenAI, Gemini's OpenAI surface, Ollama, vLLM, ...). Rate limiting and
//! 5xx replies are retried with exponential backoff; auth failures are not.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Completion, CompletionRequest, ModelProvider, TokenUsage};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 30_000;

pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max) = request.max_output_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": schema.name, "schema": schema.schema },
            });
        }
        body
    }

    async fn send_once(&self, body: &Value) -> Result<ChatResponse, Attempt> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(ProviderError::Transport(e.to_string()), None))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ChatResponse>()
                .await
                .map_err(|e| Attempt::Fatal(ProviderError::Malformed(e.to_string())));
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(classify_status(status, body, retry_after))
    }
}

/// Outcome of one HTTP attempt that did not succeed.
enum Attempt {
    Retry(ProviderError, Option<u64>),
    Fatal(ProviderError),
}

fn classify_status(status: StatusCode, body: String, retry_after: Option<u64>) -> Attempt {
    match status.as_u16() {
        401 | 403 => Attempt::Fatal(ProviderError::Auth(format!("HTTP {status}"))),
        code if is_retryable_status(code) => Attempt::Retry(
            ProviderError::Http {
                status: code,
                body: truncate(&body, 300),
            },
            retry_after,
        ),
        code => Attempt::Fatal(ProviderError::Http {
            status: code,
            body: truncate(&body, 300),
        }),
    }
}

/// Transient statuses worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Exponential backoff, honoring a server `Retry-After` when it is longer.
pub fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = match retry_after_secs {
        Some(secs) => (secs.min(30) * 1000).max(capped_ms),
        None => capped_ms,
    };
    Duration::from_millis(delay_ms)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = self.request_body(&request);
        let mut attempt = 0u32;

        let response = loop {
            match self.send_once(&body).await {
                Ok(response) => break response,
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(err, retry_after)) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = retry_delay(attempt, retry_after);
                    tracing::warn!(attempt, ?delay, error = %err, "provider call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(Completion {
            text,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
