//! LLM provider adapter contract.
//!
//! Concrete adapters (OpenAI, Bedrock, ...) live outside the runtime; the
//! agent primitive only depends on this trait. Adapters must pre-classify
//! their native failures into the retryable/fatal taxonomy.

use crate::session::{SessionMessage, ToolCallRequest};
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

/// Model configuration for one declared agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider key (e.g. "openai", "bedrock", "mock").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Provider-specific extras, passed through opaquely.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl ModelConfig {
    /// Create a config for a provider/model pair.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            extra: Value::Null,
        }
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// The model requested tool calls.
    ToolCalls,
    /// Output token limit reached.
    Length,
    /// Provider-side content filtering.
    ContentFilter,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Result of one provider round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental output from a streaming completion.
#[derive(Debug, Clone)]
pub enum CompletionDelta {
    /// A text fragment.
    Text(String),
    /// The stream finished with this completion.
    Done(Completion),
}

/// Boxed stream of completion deltas.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionDelta, ProviderError>> + Send>>;

/// Provider failures, pre-classified by the adapter.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transient failure; the runtime retries within the retry budget.
    #[error("retryable provider error: {0}")]
    Retryable(String),
    /// Permanent failure; surfaced to the script.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Whether the runtime should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Retry strategy for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Max attempts per call (must be >= 1).
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (1-based), doubling up to the cap.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }
}

/// Abstraction over LLM inference backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run a non-streaming completion.
    async fn complete(
        &self,
        config: &ModelConfig,
        messages: &[SessionMessage],
        tools: &[ToolDescriptor],
    ) -> Result<Completion, ProviderError>;

    /// Run a streaming completion. The default implementation wraps
    /// [`complete`](Self::complete) into a single `Done` delta.
    async fn complete_stream(
        &self,
        config: &ModelConfig,
        messages: &[SessionMessage],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionStream, ProviderError> {
        let completion = self.complete(config, messages, tools).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(
            CompletionDelta::Done(completion),
        )])))
    }

    /// Retry policy applied by the runtime to retryable failures.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Stable label for logging.
    fn name(&self) -> &'static str;
}
