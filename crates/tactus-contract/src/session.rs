//! Conversation message model for agent sessions.
//!
//! A session is one ordered message log per (invocation, agent). Visibility
//! classes label each message so context filters and external consumers can
//! select what they see without mutating the log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Visibility class attached to every session message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityClass {
    /// Only visible to the runtime and the LLM.
    Internal,
    /// Regular conversation content.
    #[default]
    Chat,
    /// One-way notice surfaced to observers.
    Notification,
    /// Awaiting a human approval decision.
    PendingApproval,
    /// Awaiting human input.
    PendingInput,
    /// Awaiting a human review.
    PendingReview,
}

impl VisibilityClass {
    /// Returns `true` for the default class (`Chat`).
    pub fn is_default(&self) -> bool {
        *self == VisibilityClass::Chat
    }
}

/// Generate a time-ordered UUID v7 message identifier.
pub fn gen_message_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique identifier for this tool call.
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool as JSON.
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Create a new tool call request.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A message in an agent's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Stable message identifier (UUID v7, auto-generated).
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Tool call ID this message responds to (for tool role).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Visibility class. Defaults to `Chat`.
    #[serde(default, skip_serializing_if = "VisibilityClass::is_default")]
    pub visibility: VisibilityClass,
}

impl SessionMessage {
    fn build(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: gen_message_id(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            visibility: VisibilityClass::Chat,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content)
    }

    /// Create an internal system message, visible only to the runtime and model.
    pub fn internal_system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content).with_visibility(VisibilityClass::Internal)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut msg = Self::build(Role::Assistant, content);
        msg.tool_calls = if calls.is_empty() { None } else { Some(calls) };
        msg
    }

    /// Create a tool response message.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::build(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Set the visibility class.
    #[must_use]
    pub fn with_visibility(mut self, visibility: VisibilityClass) -> Self {
        self.visibility = visibility;
        self
    }
}

/// A recorded tool invocation, queryable from scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    /// Result payload when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: u64,
    /// Agent on whose behalf the call ran, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_visibility_omitted_on_wire() {
        let v = serde_json::to_value(SessionMessage::user("hi")).unwrap();
        assert!(v.get("visibility").is_none());

        let v = serde_json::to_value(SessionMessage::internal_system("note")).unwrap();
        assert_eq!(v["visibility"], serde_json::json!("internal"));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = SessionMessage::tool("call-1", "{\"ok\":true}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
    }
}
