//! The LLM port (C9): the only interface the agent loop needs from a
//! language model backend. Concrete adapters (HTTP clients for a specific
//! vendor API) are an embedder's responsibility and live outside this
//! crate — this module defines the contract only.

use crate::types::{LlmRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<LlmError> for fractal_core::Error {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => fractal_core::Error::Cancelled,
            other => fractal_core::Error::llm_error("llm", other.to_string()),
        }
    }
}

pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// A chat-completion backend. Streaming is mandatory so the agent loop can
/// surface `node.thinking` deltas as they arrive rather than waiting for a
/// full response.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn models(&self) -> &[&str];

    fn supports_model(&self, model: &str) -> bool {
        self.models().iter().any(|m| *m == model || model.starts_with(m))
    }

    /// Stream a completion. If `cancel` fires, the provider drops the
    /// underlying connection and the stream yields [`LlmError::Cancelled`].
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;
}
