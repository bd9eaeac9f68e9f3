//! Human-in-the-loop handler contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three kinds of human-in-the-loop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlKind {
    /// Yes/no decision.
    Approve,
    /// Free-form value.
    Input,
    /// Review of produced content.
    Review,
}

impl HitlKind {
    /// Stable wire/display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Input => "input",
            Self::Review => "review",
        }
    }
}

/// One request handed to the HITL handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlRequest {
    /// Unique, deterministic request id.
    pub request_id: String,
    pub kind: HitlKind,
    /// Prompt shown to the human.
    pub message: String,
    /// Arbitrary context payload (e.g. content under review).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Wall-clock timeout in seconds; `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    /// Value returned on timeout; absent means timeout raises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Terminal outcome of a HITL request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HitlOutcome {
    /// The human responded with a value.
    Resolved { value: Value },
    /// The request timed out without a response.
    TimedOut,
    /// The request was cancelled.
    Cancelled,
}

/// Handler consumed by the HITL gateway.
///
/// Implementations block until the request is resolved, times out, or is
/// cancelled. The gateway also enforces the request's wall-clock timeout, so
/// handlers that never respond are safe.
#[async_trait]
pub trait HitlHandler: Send + Sync {
    /// Present one request to a human and await its outcome.
    async fn request(&self, request: &HitlRequest) -> HitlOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_wire_shape() {
        let v = serde_json::to_value(HitlOutcome::Resolved { value: json!(true) }).unwrap();
        assert_eq!(v, json!({"outcome": "resolved", "value": true}));
        let v = serde_json::to_value(HitlOutcome::TimedOut).unwrap();
        assert_eq!(v, json!({"outcome": "timed_out"}));
    }
}
