//! Tool registry and mock registry.
//!
//! Every tool invocation is journalled, recorded in the calling agent's
//! session, and emitted as a `tool_call` event. The mock registry records
//! identical events so assertions and journals do not distinguish the two.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use tactus_contract::{
    now_ms, EventPayload, ScriptError, SessionMessage, Tool, ToolCallRecord, ToolCallRequest,
    ToolDescriptor,
};

use crate::context::InvocationContext;

/// Built-in tools available to every procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    /// Marks the agent's intent to exit its loop.
    Done,
    /// Open-ended todo queue kept in invocation state.
    Todo,
}

impl BuiltinTool {
    fn descriptor(&self) -> ToolDescriptor {
        match self {
            Self::Done => ToolDescriptor::new("done", "Signal that the task is complete.")
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "reason": {"type": "string", "description": "Why the task is complete."}
                    }
                })),
            Self::Todo => ToolDescriptor::new("todo", "Manage the shared todo queue.")
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["add", "complete", "list", "clear"]},
                        "item": {"type": "string"}
                    },
                    "required": ["action"]
                })),
        }
    }
}

/// State key backing the `todo` builtin.
const TODO_STATE_KEY: &str = "__todos";

/// How a registered name resolves to an invocable tool.
pub enum ToolBinding {
    /// A user-supplied native tool.
    Native(Arc<dyn Tool>),
    /// A built-in.
    Builtin(BuiltinTool),
    /// A nested procedure exposed as a tool under this name.
    Procedure { procedure: String },
}

/// Canonical fingerprint of a JSON value: object keys sorted recursively.
pub fn fingerprint(value: &Value) -> String {
    fn canonical(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), canonical(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }
    canonical(value).to_string()
}

/// Canned responses for mock mode.
#[derive(Debug, Clone)]
pub struct MockToolConfig {
    /// Exact `(tool, argument-fingerprint)` matches.
    exact: HashMap<String, Value>,
    /// Name-level default responses.
    defaults: HashMap<String, Value>,
    /// Response when nothing matches.
    fallback: Value,
}

impl Default for MockToolConfig {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            defaults: HashMap::new(),
            fallback: json!({"ok": true}),
        }
    }
}

impl MockToolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn exact_key(tool: &str, arguments: &Value) -> String {
        format!("{tool}::{}", fingerprint(arguments))
    }

    /// Respond with `response` whenever `tool` is called with exactly
    /// `arguments`.
    #[must_use]
    pub fn with_exact(mut self, tool: &str, arguments: Value, response: Value) -> Self {
        self.exact
            .insert(Self::exact_key(tool, &arguments), response);
        self
    }

    /// Respond with `response` for any call of `tool`.
    #[must_use]
    pub fn with_response(mut self, tool: &str, response: Value) -> Self {
        self.defaults.insert(tool.to_string(), response);
        self
    }

    /// Replace the unmatched-call fallback (`{"ok": true}` by default).
    #[must_use]
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = fallback;
        self
    }

    /// Resolve the canned response for one call.
    pub fn respond_to(&self, tool: &str, arguments: &Value) -> Value {
        if let Some(response) = self.exact.get(&Self::exact_key(tool, arguments)) {
            return response.clone();
        }
        if let Some(response) = self.defaults.get(tool) {
            return response.clone();
        }
        self.fallback.clone()
    }

    /// Parse the `tools` section of a mock-config document:
    /// `{"tools": {name: response}, "tool_matches": [{tool, arguments,
    /// response}], "fallback": response}`.
    pub fn from_json(doc: &Value) -> Result<Self, ScriptError> {
        let mut config = Self::default();
        if let Some(tools) = doc.get("tools") {
            let map = tools.as_object().ok_or_else(|| {
                ScriptError::validation("mock config 'tools' must be an object")
            })?;
            for (name, response) in map {
                config.defaults.insert(name.clone(), response.clone());
            }
        }
        if let Some(matches) = doc.get("tool_matches") {
            let list = matches.as_array().ok_or_else(|| {
                ScriptError::validation("mock config 'tool_matches' must be a list")
            })?;
            for entry in list {
                let tool = entry
                    .get("tool")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ScriptError::validation("tool_matches entry missing 'tool'"))?;
                let arguments = entry.get("arguments").cloned().unwrap_or(json!({}));
                let response = entry.get("response").cloned().unwrap_or(Value::Null);
                config = config.with_exact(tool, arguments, response);
            }
        }
        if let Some(fallback) = doc.get("fallback") {
            config.fallback = fallback.clone();
        }
        Ok(config)
    }
}

/// Outcome of one tool invocation, as journalled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    /// Session-facing rendering of this outcome.
    pub fn session_content(&self) -> String {
        match (&self.result, &self.error) {
            (_, Some(error)) => format!("error: {error}"),
            (Some(result), None) => result.to_string(),
            (None, None) => Value::Null.to_string(),
        }
    }
}

/// Resolves tool names to invocables for one invocation.
///
/// With a mock config installed, the invoke step is replaced by a canned
/// response lookup; journalling, events, and session recording are unchanged.
pub struct ToolRegistry {
    bindings: HashMap<String, ToolBinding>,
    mock: Option<MockToolConfig>,
}

impl ToolRegistry {
    /// Create a registry holding the builtins, plus the mock config when in
    /// mock mode.
    pub fn new(mock: Option<MockToolConfig>) -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("done".to_string(), ToolBinding::Builtin(BuiltinTool::Done));
        bindings.insert("todo".to_string(), ToolBinding::Builtin(BuiltinTool::Todo));
        Self { bindings, mock }
    }

    /// Register a binding under its public name.
    pub fn register(&mut self, name: impl Into<String>, binding: ToolBinding) {
        self.bindings.insert(name.into(), binding);
    }

    /// Whether the registry runs in mock mode.
    pub fn is_mock(&self) -> bool {
        self.mock.is_some()
    }

    /// Descriptor for one registered tool.
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        match self.bindings.get(name)? {
            ToolBinding::Native(tool) => Some(tool.descriptor()),
            ToolBinding::Builtin(builtin) => Some(builtin.descriptor()),
            ToolBinding::Procedure { procedure } => Some(ToolDescriptor::new(
                name,
                format!("Run the '{procedure}' procedure."),
            )),
        }
    }

    /// Descriptors for an agent's declared tool subset, in declaration order.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|name| self.descriptor(name))
            .collect()
    }

    /// Invoke one tool call: journal read-through, effect, `tool_call` event,
    /// session recording.
    pub async fn invoke(
        &self,
        ctx: &Arc<InvocationContext>,
        agent: Option<&str>,
        call: &ToolCallRequest,
    ) -> Result<ToolOutcome, ScriptError> {
        let step_id = ctx.journal.step_id(&format!("tool:{}", call.name));
        if let Some(outcome) = ctx.journal.lookup_as::<ToolOutcome>(&step_id).await? {
            self.apply_state(ctx, call, &outcome);
            self.record(ctx, agent, call, &outcome);
            return Ok(outcome);
        }
        ctx.check_cancelled()?;

        let outcome = self.perform(ctx, call).await?;
        self.apply_state(ctx, call, &outcome);

        ctx.emit(EventPayload::ToolCall {
            tool: call.name.clone(),
            agent: agent.map(str::to_string),
            arguments: call.arguments.clone(),
            result: outcome.result.clone(),
            error: outcome.error.clone(),
        })
        .await;
        ctx.journal.commit(&step_id, &outcome).await?;
        ctx.emit(EventPayload::CheckpointWritten { step_id }).await;
        self.record(ctx, agent, call, &outcome);
        Ok(outcome)
    }

    /// Run the effect (or the mock lookup) for one call.
    async fn perform(
        &self,
        ctx: &Arc<InvocationContext>,
        call: &ToolCallRequest,
    ) -> Result<ToolOutcome, ScriptError> {
        if let Some(mock) = &self.mock {
            return Ok(ToolOutcome::success(
                mock.respond_to(&call.name, &call.arguments),
            ));
        }
        match self.bindings.get(&call.name) {
            None => Ok(ToolOutcome::failure(format!(
                "tool not found: {}",
                call.name
            ))),
            Some(ToolBinding::Native(tool)) => {
                match tool.execute(call.arguments.clone()).await {
                    Ok(result) => Ok(ToolOutcome::success(result)),
                    Err(err) => Ok(ToolOutcome::failure(err.to_string())),
                }
            }
            Some(ToolBinding::Builtin(BuiltinTool::Done)) => {
                let reason = call
                    .arguments
                    .get("reason")
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(ToolOutcome::success(json!({"ok": true, "reason": reason})))
            }
            Some(ToolBinding::Builtin(BuiltinTool::Todo)) => Ok(run_todo(ctx, &call.arguments)),
            Some(ToolBinding::Procedure { procedure }) => {
                let params = match &call.arguments {
                    Value::Object(map) => map.clone(),
                    Value::Null => Map::new(),
                    other => {
                        return Ok(ToolOutcome::failure(format!(
                            "procedure tool arguments must be a map, got {other}"
                        )))
                    }
                };
                let scheduler = ctx.scheduler()?;
                match scheduler.run_child(ctx, procedure, params).await {
                    Ok(result) => Ok(ToolOutcome::success(result)),
                    Err(err) if err.is_cancelled() => Err(err),
                    Err(err) => Ok(ToolOutcome::failure(err.to_string())),
                }
            }
        }
    }

    /// Re-apply state carried by a tool outcome. Runs on both the live and
    /// the replay path so a resumed invocation reconstructs tool-owned state
    /// (the `todo` queue) from the journalled outcome.
    fn apply_state(
        &self,
        ctx: &Arc<InvocationContext>,
        call: &ToolCallRequest,
        outcome: &ToolOutcome,
    ) {
        if !matches!(
            self.bindings.get(&call.name),
            Some(ToolBinding::Builtin(BuiltinTool::Todo))
        ) {
            return;
        }
        if let Some(todos) = outcome.result.as_ref().and_then(|r| r.get("todos")) {
            ctx.state.set(TODO_STATE_KEY, todos.clone());
        }
    }

    /// Record the call in the index and the calling agent's session. Used on
    /// both the live and the replay path; emits nothing.
    fn record(
        &self,
        ctx: &Arc<InvocationContext>,
        agent: Option<&str>,
        call: &ToolCallRequest,
        outcome: &ToolOutcome,
    ) {
        ctx.tool_calls.record(ToolCallRecord {
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: outcome.result.clone(),
            error: outcome.error.clone(),
            timestamp_ms: now_ms(),
            agent_name: agent.map(str::to_string),
        });
        if let Some(agent) = agent {
            ctx.sessions.append(
                agent,
                SessionMessage::tool(call.id.clone(), outcome.session_content()),
            );
        }
    }
}

/// The `todo` builtin: queue manipulation over invocation state.
///
/// Reads the current queue from state but writes nothing; the registry
/// applies the resulting queue via `apply_state` so replay and live paths
/// mutate state identically.
fn run_todo(ctx: &Arc<InvocationContext>, arguments: &Value) -> ToolOutcome {
    let action = arguments.get("action").and_then(Value::as_str).unwrap_or("list");
    let mut todos: Vec<String> = ctx
        .state
        .get(TODO_STATE_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    match action {
        "add" => match arguments.get("item").and_then(Value::as_str) {
            Some(item) => todos.push(item.to_string()),
            None => return ToolOutcome::failure("todo add requires 'item'"),
        },
        "complete" => match arguments.get("item").and_then(Value::as_str) {
            Some(item) => todos.retain(|t| t != item),
            None => return ToolOutcome::failure("todo complete requires 'item'"),
        },
        "clear" => todos.clear(),
        "list" => {}
        other => return ToolOutcome::failure(format!("unknown todo action '{other}'")),
    }

    ToolOutcome::success(json!({"todos": todos}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn mock_lookup_prefers_exact_then_default_then_fallback() {
        let config = MockToolConfig::new()
            .with_exact("fetch", json!({"url": "a"}), json!({"body": "A"}))
            .with_response("fetch", json!({"body": "any"}));
        assert_eq!(
            config.respond_to("fetch", &json!({"url": "a"})),
            json!({"body": "A"})
        );
        assert_eq!(
            config.respond_to("fetch", &json!({"url": "z"})),
            json!({"body": "any"})
        );
        assert_eq!(config.respond_to("other", &json!({})), json!({"ok": true}));
    }

    #[test]
    fn mock_config_parses_document() {
        let doc = json!({
            "tools": {"search": {"hits": []}},
            "tool_matches": [
                {"tool": "search", "arguments": {"q": "rust"}, "response": {"hits": ["tactus"]}}
            ],
            "fallback": {"ok": false}
        });
        let config = MockToolConfig::from_json(&doc).unwrap();
        assert_eq!(
            config.respond_to("search", &json!({"q": "rust"})),
            json!({"hits": ["tactus"]})
        );
        assert_eq!(config.respond_to("search", &json!({})), json!({"hits": []}));
        assert_eq!(config.respond_to("x", &json!({})), json!({"ok": false}));
    }
}
