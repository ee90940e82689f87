//! Model provider capability.
//!
//! Every stage that needs the generative model (router, reranker, generation,
//! judge, fact extraction) talks to a [`ModelProvider`] trait object and never
//! to a concrete client. [`openai::OpenAiCompatProvider`] is the shipped
//! implementation; tests substitute scripted providers.

pub mod openai;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProviderError;

/// JSON schema the provider is asked to conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    /// Stable name of the schema (`route_decision`, `judge_verdict`, ...).
    pub name: String,
    pub schema: serde_json::Value,
}

impl StructuredSchema {
    /// Derive the schema for `T` via `schemars`.
    pub fn of<T: JsonSchema>(name: &str) -> Self {
        let mut schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
        }
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

/// A single call to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub schema: Option<StructuredSchema>,
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature,
            schema: None,
            max_output_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: StructuredSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// The single call contract every model backend satisfies.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Model identifier, used for usage accounting.
    fn model_name(&self) -> &str;
}

/// [`ModelProvider::complete`] bounded by `timeout`.
pub async fn complete_within(
    provider: &dyn ModelProvider,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<Completion, ProviderError> {
    match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

/// Run a structured request and parse the reply into `T`.
///
/// Tolerates replies wrapped in Markdown code fences. Empty text is
/// [`ProviderError::EmptyResponse`]; text that is not valid `T` is
/// [`ProviderError::Malformed`].
pub async fn complete_structured<T: DeserializeOwned>(
    provider: &dyn ModelProvider,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<(T, Option<TokenUsage>), ProviderError> {
    let completion = complete_within(provider, request, timeout).await?;
    let value = parse_structured(&completion.text)?;
    Ok((value, completion.usage))
}

/// Parse a structured reply, stripping code fences first.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ProviderError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Remove a surrounding ```` ```json ... ``` ```` fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
        text = text.strip_suffix("```").unwrap_or(text);
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Sample {
        score: u8,
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parse_structured_classifies_failures() {
        assert_eq!(
            parse_structured::<Sample>("```json\n{\"score\": 7}\n```").unwrap(),
            Sample { score: 7 }
        );
        assert_eq!(
            parse_structured::<Sample>("   "),
            Err(ProviderError::EmptyResponse)
        );
        assert!(matches!(
            parse_structured::<Sample>("{\"score\": \"high\"}"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn schema_is_derived_without_meta_key() {
        let schema = StructuredSchema::of::<Sample>("sample");
        assert_eq!(schema.name, "sample");
        assert!(schema.schema.get("$schema").is_none());
        assert!(schema.schema["properties"].get("score").is_some());
    }

    struct Stalled;

    #[async_trait]
    impl ModelProvider for Stalled {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::EmptyResponse)
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn complete_within_times_out() {
        let timeout = Duration::from_millis(10);
        let err = complete_within(&Stalled, CompletionRequest::new("hi", 0.0), timeout)
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Timeout(timeout));
    }

    #[test]
    fn usage_sum_saturates() {
        let mut total = TokenUsage {
            input_tokens: u32::MAX - 1,
            output_tokens: 5,
            total_tokens: u32::MAX,
        };
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        assert_eq!(total.input_tokens, u32::MAX);
        assert_eq!(total.output_tokens, 10);
        assert_eq!(total.total_tokens, u32::MAX);
    }
}
