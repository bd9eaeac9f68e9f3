//! Typed append-only event records for observability and checkpointing.
//!
//! Every invocation owns one event log. Events are never mutated; sequence
//! numbers are dense and strictly increasing per invocation, starting at 1.

use crate::hitl::HitlKind;
use crate::procedure::InvocationStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis().min(u128::from(u64::MAX)) as u64)
}

/// Envelope for one event in an invocation's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the invocation's log (1-based, dense).
    pub seq: u64,
    /// Owning invocation.
    pub invocation_id: String,
    /// Unix-millisecond timestamp at append time.
    pub timestamp_ms: u64,
    /// Typed payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    /// Build a record stamped with the current time.
    pub fn new(invocation_id: impl Into<String>, seq: u64, payload: EventPayload) -> Self {
        Self {
            seq,
            invocation_id: invocation_id.into(),
            timestamp_ms: now_ms(),
            payload,
        }
    }
}

/// Severity attached to `log` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Lifecycle values carried by `execution` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLifecycle {
    /// The invocation started executing.
    Started,
    /// The invocation was reconstructed from storage and resumed.
    Resumed,
    /// The invocation completed.
    Completed,
    /// The invocation terminated with an uncaught error.
    Error,
    /// The invocation was cancelled.
    Cancelled,
}

/// Which half of an agent turn an `agent_turn` event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTurnStage {
    Started,
    Responded,
}

/// Progress marker for `test_scenario` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStage {
    Started,
    Passed,
    Failed,
}

/// Progress marker for `evaluation` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    Started,
    RunCompleted,
    Finished,
}

/// The closed set of event payloads an invocation log may contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Free-form log line emitted by the script or a primitive.
    Log { level: LogLevel, message: String },
    /// Invocation lifecycle transition.
    Execution {
        lifecycle: ExecutionLifecycle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Terminal roll-up of an invocation.
    ExecutionSummary {
        status: InvocationStatus,
        iterations: u64,
        duration_ms: u64,
        tools_used: Vec<String>,
    },
    /// One agent turn starting or finishing.
    AgentTurn {
        agent: String,
        stage: AgentTurnStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// A tool invocation and its outcome.
    ToolCall {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Token usage for one provider round-trip.
    Cost {
        agent: String,
        model: String,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// A parameter or argument validation outcome.
    Validation {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// The invocation's final result value.
    Output { result: Value },
    /// A human-in-the-loop request was raised.
    HitlRequest {
        request_id: String,
        kind: HitlKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// A human-in-the-loop request was resolved.
    HitlResolved { request_id: String, value: Value },
    /// The procedure moved to a new stage.
    StageChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        to: String,
    },
    /// A checkpoint was committed to the journal.
    CheckpointWritten { step_id: String },
    /// Harness progress for one scenario.
    TestScenario {
        scenario: String,
        stage: ScenarioStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Harness progress for one evaluation.
    Evaluation {
        scenario: String,
        stage: EvaluationStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
}

impl EventPayload {
    /// Stable wire label of this payload ("type" field of the JSON shape).
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Execution { .. } => "execution",
            Self::ExecutionSummary { .. } => "execution_summary",
            Self::AgentTurn { .. } => "agent_turn",
            Self::ToolCall { .. } => "tool_call",
            Self::Cost { .. } => "cost",
            Self::Validation { .. } => "validation",
            Self::Output { .. } => "output",
            Self::HitlRequest { .. } => "hitl_request",
            Self::HitlResolved { .. } => "hitl_resolved",
            Self::StageChange { .. } => "stage_change",
            Self::CheckpointWritten { .. } => "checkpoint_written",
            Self::TestScenario { .. } => "test_scenario",
            Self::Evaluation { .. } => "evaluation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_tag_matches_type_label() {
        let payload = EventPayload::StageChange {
            from: Some("start".into()),
            to: "done".into(),
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["type"], json!(payload.type_label()));
        assert_eq!(v["from"], json!("start"));
        assert_eq!(v["to"], json!("done"));
    }

    #[test]
    fn record_round_trips() {
        let record = EventRecord::new(
            "inv-1",
            1,
            EventPayload::Log {
                level: LogLevel::Info,
                message: "hello".into(),
            },
        );
        let v = serde_json::to_value(&record).unwrap();
        let back: EventRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, record);
    }
}
