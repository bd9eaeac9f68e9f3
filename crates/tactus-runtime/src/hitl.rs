//! HITL gateway: suspends the invocation awaiting a human decision.
//!
//! Request ids are derived from the journal step id so mock-mode runs emit
//! byte-identical event logs. The gateway enforces the wall-clock timeout
//! itself, so handlers that never respond are safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tactus_contract::hitl::{HitlHandler, HitlKind, HitlOutcome, HitlRequest};
use tactus_contract::{EventPayload, InvocationStatus, ScriptError};

use crate::context::InvocationContext;

/// Options for one `Human.*` call.
#[derive(Debug, Clone, Default)]
pub struct HitlOptions {
    pub message: String,
    pub context: Option<Value>,
    /// Wall-clock timeout in seconds; `None` waits indefinitely.
    pub timeout_secs: Option<f64>,
    /// Returned on timeout; absent means timeout raises.
    pub default: Option<Value>,
}

impl HitlOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Raise one request, suspend, and return the resolved value.
pub(crate) async fn request(
    ctx: &Arc<InvocationContext>,
    kind: HitlKind,
    opts: HitlOptions,
) -> Result<Value, ScriptError> {
    let step_id = ctx.journal.step_id(&format!("human:{}", kind.as_str()));

    if let Some(outcome) = ctx.journal.lookup_as::<HitlOutcome>(&step_id).await? {
        return finish(&opts, outcome);
    }
    ctx.check_cancelled()?;

    let request = HitlRequest {
        request_id: step_id.clone(),
        kind,
        message: opts.message.clone(),
        context: opts.context.clone(),
        timeout_secs: opts.timeout_secs,
        default: opts.default.clone(),
    };
    ctx.emit(EventPayload::HitlRequest {
        request_id: request.request_id.clone(),
        kind,
        message: request.message.clone(),
        context: request.context.clone(),
        timeout_secs: request.timeout_secs,
        default: request.default.clone(),
    })
    .await;
    ctx.set_status(InvocationStatus::WaitingHuman).await?;

    let outcome = await_outcome(ctx, &request).await;
    if matches!(outcome, HitlOutcome::Cancelled) {
        return Err(ScriptError::cancelled());
    }

    if let HitlOutcome::Resolved { value } = &outcome {
        ctx.emit(EventPayload::HitlResolved {
            request_id: request.request_id.clone(),
            value: value.clone(),
        })
        .await;
    }
    ctx.journal.commit(&step_id, &outcome).await?;
    ctx.emit(EventPayload::CheckpointWritten { step_id }).await;
    ctx.set_status(InvocationStatus::Running).await?;
    finish(&opts, outcome)
}

/// Race the handler against the request timeout and cancellation.
async fn await_outcome(ctx: &Arc<InvocationContext>, request: &HitlRequest) -> HitlOutcome {
    let timeout = request
        .timeout_secs
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)));
    tokio::select! {
        _ = ctx.cancel.cancelled() => HitlOutcome::Cancelled,
        outcome = ctx.hitl.request(request) => outcome,
        _ = sleep_or_forever(timeout) => HitlOutcome::TimedOut,
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Map a terminal outcome to the script-visible value.
fn finish(opts: &HitlOptions, outcome: HitlOutcome) -> Result<Value, ScriptError> {
    match outcome {
        HitlOutcome::Resolved { value } => Ok(value),
        HitlOutcome::TimedOut => opts.default.clone().ok_or_else(|| {
            ScriptError::timeout(format!(
                "human request '{}' timed out with no default",
                opts.message
            ))
        }),
        HitlOutcome::Cancelled => Err(ScriptError::cancelled()),
    }
}

/// Mock handler behavior when no scripted response matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockHitlMode {
    /// Approve every request (`true` / the request default / `"ok"`).
    Approve,
    /// Reject every request.
    Reject,
    /// Never respond; the gateway timeout decides.
    Silent,
}

/// Deterministic HITL handler for mock mode.
///
/// Scripted responses are keyed by request message; a fixed response answers
/// any request; unmatched requests fall back to the mode.
#[derive(Clone)]
pub struct MockHitlHandler {
    mode: MockHitlMode,
    responses: HashMap<String, Value>,
    fixed: Option<Value>,
}

impl MockHitlHandler {
    pub fn new(mode: MockHitlMode) -> Self {
        Self {
            mode,
            responses: HashMap::new(),
            fixed: None,
        }
    }

    /// Auto-approve handler.
    pub fn approve() -> Self {
        Self::new(MockHitlMode::Approve)
    }

    /// Auto-reject handler.
    pub fn reject() -> Self {
        Self::new(MockHitlMode::Reject)
    }

    /// Handler that never responds.
    pub fn silent() -> Self {
        Self::new(MockHitlMode::Silent)
    }

    /// Respond with `value` to requests whose message equals `message`.
    #[must_use]
    pub fn with_response(mut self, message: impl Into<String>, value: Value) -> Self {
        self.responses.insert(message.into(), value);
        self
    }

    /// Respond with `value` to every request.
    #[must_use]
    pub fn with_fixed_response(mut self, value: Value) -> Self {
        self.fixed = Some(value);
        self
    }

    /// Parse the `hitl` section of a mock-config document:
    /// `{"hitl": {"mode": "approve"|"reject"|"silent", "responses": {message: value}}}`.
    pub fn from_json(doc: &Value) -> Result<Self, ScriptError> {
        let section = match doc.get("hitl") {
            None => return Ok(Self::approve()),
            Some(section) => section,
        };
        let mode = match section.get("mode").and_then(Value::as_str) {
            None | Some("approve") => MockHitlMode::Approve,
            Some("reject") => MockHitlMode::Reject,
            Some("silent") => MockHitlMode::Silent,
            Some(other) => {
                return Err(ScriptError::validation(format!(
                    "unknown mock hitl mode '{other}'"
                )))
            }
        };
        let mut handler = Self::new(mode);
        if let Some(responses) = section.get("responses").and_then(Value::as_object) {
            for (message, value) in responses {
                handler.responses.insert(message.clone(), value.clone());
            }
        }
        Ok(handler)
    }
}

#[async_trait]
impl HitlHandler for MockHitlHandler {
    async fn request(&self, request: &HitlRequest) -> HitlOutcome {
        if let Some(value) = self.responses.get(&request.message) {
            return HitlOutcome::Resolved {
                value: value.clone(),
            };
        }
        if let Some(value) = &self.fixed {
            return HitlOutcome::Resolved {
                value: value.clone(),
            };
        }
        match self.mode {
            MockHitlMode::Approve => HitlOutcome::Resolved {
                value: match request.kind {
                    HitlKind::Approve | HitlKind::Review => Value::Bool(true),
                    HitlKind::Input => request
                        .default
                        .clone()
                        .unwrap_or_else(|| Value::String("ok".into())),
                },
            },
            MockHitlMode::Reject => HitlOutcome::Resolved {
                value: Value::Bool(false),
            },
            MockHitlMode::Silent => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_of(kind: HitlKind, message: &str) -> HitlRequest {
        HitlRequest {
            request_id: "human:approve:0".into(),
            kind,
            message: message.into(),
            context: None,
            timeout_secs: None,
            default: None,
        }
    }

    #[tokio::test]
    async fn approve_mode_resolves_true() {
        let handler = MockHitlHandler::approve();
        let outcome = handler.request(&request_of(HitlKind::Approve, "go?")).await;
        assert_eq!(outcome, HitlOutcome::Resolved { value: json!(true) });
    }

    #[tokio::test]
    async fn scripted_response_wins_over_mode() {
        let handler = MockHitlHandler::reject().with_response("go?", json!("yes"));
        let outcome = handler.request(&request_of(HitlKind::Approve, "go?")).await;
        assert_eq!(outcome, HitlOutcome::Resolved { value: json!("yes") });
    }

    #[tokio::test]
    async fn silent_mode_never_resolves() {
        let handler = MockHitlHandler::silent();
        let request = request_of(HitlKind::Approve, "go?");
        let pending = handler.request(&request);
        let raced =
            tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;
        assert!(raced.is_err());
    }

    #[test]
    fn parses_mock_config_section() {
        let doc = json!({"hitl": {"mode": "reject", "responses": {"go?": true}}});
        let handler = MockHitlHandler::from_json(&doc).unwrap();
        assert_eq!(handler.mode, MockHitlMode::Reject);
        assert_eq!(handler.responses.get("go?"), Some(&json!(true)));
    }
}
