//! Error taxonomy for the pipeline.
//!
//! Only [`OrchestratorError`] ever reaches a caller. Retrieval, reranking and
//! auditing failures are absorbed where they happen; router failures end in a
//! conservative default route.

use std::time::Duration;
use thiserror::Error;

/// Text returned in place of any internal failure detail.
pub const TRY_AGAIN_MESSAGE: &str =
    "Something went wrong while preparing your answer. Please try again in a moment.";

/// Fixed refusal used when the judge flags a safety violation.
pub const SAFE_REFUSAL: &str =
    "I can't help with that request. If you think this is a mistake, try rephrasing what you need.";

/// Failure talking to the model provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider returned no usable text")]
    EmptyResponse,

    #[error("malformed provider output: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Auth failures will not heal by retrying with different sampling.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

/// A single router attempt that did not yield a well-formed decision.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("router model call failed: {0}")]
    Provider(ProviderError),

    #[error("router output did not parse as a route decision: {0}")]
    Malformed(String),
}

impl From<ProviderError> for ClassificationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Malformed(msg) => ClassificationError::Malformed(msg),
            ProviderError::EmptyResponse => {
                ClassificationError::Malformed("empty response".into())
            }
            other => ClassificationError::Provider(other),
        }
    }
}

/// Failure of one generation attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("generation provider failure: {0}")]
    Provider(ProviderError),

    #[error("model returned no usable answer")]
    EmptyResponse,
}

impl From<ProviderError> for GenerationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::EmptyResponse => GenerationError::EmptyResponse,
            other => GenerationError::Provider(other),
        }
    }
}

/// Fatal failure of a request, as seen by the caller.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model provider failure: {0}")]
    Provider(ProviderError),

    #[error("model returned no usable content after all attempts")]
    EmptyResponse,

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl From<GenerationError> for OrchestratorError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Provider(p) => OrchestratorError::Provider(p),
            GenerationError::EmptyResponse => OrchestratorError::EmptyResponse,
        }
    }
}

impl OrchestratorError {
    /// Message that is safe to show an end user.
    pub fn user_message(&self) -> &str {
        match self {
            OrchestratorError::InvalidInput(_) => {
                "Your message could not be processed. Please check it and send it again."
            }
            OrchestratorError::Provider(_)
            | OrchestratorError::EmptyResponse
            | OrchestratorError::Storage(_) => TRY_AGAIN_MESSAGE,
        }
    }
}
