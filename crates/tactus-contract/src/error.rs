//! Error taxonomy shared by every layer of the runtime.
//!
//! Errors that cross the script boundary carry an [`ErrorKind`] from a closed
//! set so scripts can match on the kind without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds surfaced to scripts, the harness, and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Inputs violate a declared parameter schema or primitive argument constraint.
    Validation,
    /// A tool invocation failed.
    Tool,
    /// Transient LLM provider failure; retried within the retry budget.
    ProviderRetryable,
    /// Permanent LLM provider failure.
    ProviderFatal,
    /// A wall-clock limit was hit.
    Timeout,
    /// The invocation was cancelled externally or by its parent.
    Cancelled,
    /// A journalled value's shape disagrees with current code.
    CheckpointConflict,
    /// An internal invariant was violated; the invocation fails.
    Internal,
}

impl ErrorKind {
    /// Stable wire/display label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Tool => "tool",
            Self::ProviderRetryable => "provider_retryable",
            Self::ProviderFatal => "provider_fatal",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CheckpointConflict => "checkpoint_conflict",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced across the script boundary.
///
/// Scripts observe these as catchable errors tagged with their kind. Errors
/// propagated from a child invocation via `wait`/`result` carry the child id.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ScriptError {
    /// Which taxonomy bucket this error belongs to.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Child invocation that originally raised the error, if propagated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
}

impl ScriptError {
    /// Create an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            child_id: None,
        }
    }

    /// A parameter or argument failed validation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// A tool invocation failed.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tool, message)
    }

    /// A wall-clock limit was hit.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// The invocation was cancelled.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "invocation cancelled")
    }

    /// A journalled value no longer matches the requesting primitive.
    pub fn checkpoint_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CheckpointConflict, message)
    }

    /// An internal invariant was violated.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the id of the child invocation that raised this error.
    #[must_use]
    pub fn with_child(mut self, child_id: impl Into<String>) -> Self {
        self.child_id = Some(child_id.into());
        self
    }

    /// Whether this error was a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let v = serde_json::to_value(ErrorKind::CheckpointConflict).unwrap();
        assert_eq!(v, serde_json::json!("checkpoint_conflict"));
    }

    #[test]
    fn display_includes_kind_label() {
        let err = ScriptError::timeout("approval expired");
        assert_eq!(err.to_string(), "timeout error: approval expired");
    }
}
