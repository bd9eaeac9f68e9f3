//! Deterministic provider stub and the aggregate mock-mode configuration.
//!
//! In mock mode tools, HITL, and the LLM provider are replaced by stubs that
//! emit the same events and journal records as the real implementations, so
//! repeated runs of a deterministic script are byte-identical modulo
//! timestamps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tactus_contract::provider::{
    Completion, FinishReason, ModelConfig, ModelProvider, ProviderError, Usage,
};
use tactus_contract::{ScriptError, SessionMessage, ToolCallRequest, ToolDescriptor};

use crate::hitl::MockHitlHandler;
use crate::tools::MockToolConfig;

/// Fixed usage reported by mock completions, for deterministic cost events.
pub const MOCK_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// One scripted mock turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockTurn {
    #[serde(default)]
    pub text: String,
    /// Tool calls as `{name, arguments}`; call ids are assigned at run time.
    #[serde(default)]
    pub tool_calls: Vec<MockToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// A scripted tool call, without a call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Scripted LLM provider for mock mode.
///
/// Turns are scripted per model id. Unscripted models fall back to a
/// deterministic heuristic: call `done` when the agent has it, otherwise
/// answer with plain text.
pub struct MockProvider {
    scripted: Mutex<HashMap<String, VecDeque<MockTurn>>>,
    call_counter: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            call_counter: AtomicU64::new(0),
        }
    }

    /// Queue scripted turns for a model id.
    #[must_use]
    pub fn with_turns(self, model: impl Into<String>, turns: Vec<MockTurn>) -> Self {
        self.scripted
            .lock()
            .expect("mock provider lock poisoned")
            .entry(model.into())
            .or_default()
            .extend(turns);
        self
    }

    fn next_call_id(&self) -> String {
        format!("mock-call-{}", self.call_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn completion_from(&self, turn: MockTurn) -> Completion {
        let tool_calls: Vec<ToolCallRequest> = turn
            .tool_calls
            .into_iter()
            .map(|call| ToolCallRequest::new(self.next_call_id(), call.name, call.arguments))
            .collect();
        let finish_reason = turn.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        Completion {
            text: turn.text,
            tool_calls,
            finish_reason,
            usage: Some(MOCK_USAGE),
        }
    }

    fn default_completion(&self, tools: &[ToolDescriptor]) -> Completion {
        if tools.iter().any(|t| t.name == "done") {
            Completion {
                text: String::new(),
                tool_calls: vec![ToolCallRequest::new(
                    self.next_call_id(),
                    "done",
                    serde_json::json!({"reason": "task complete"}),
                )],
                finish_reason: FinishReason::ToolCalls,
                usage: Some(MOCK_USAGE),
            }
        } else {
            Completion {
                text: "ok".into(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                usage: Some(MOCK_USAGE),
            }
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(
        &self,
        config: &ModelConfig,
        _messages: &[SessionMessage],
        tools: &[ToolDescriptor],
    ) -> Result<Completion, ProviderError> {
        let scripted = self
            .scripted
            .lock()
            .expect("mock provider lock poisoned")
            .get_mut(&config.model)
            .and_then(VecDeque::pop_front);
        Ok(match scripted {
            Some(turn) => self.completion_from(turn),
            None => self.default_completion(tools),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Aggregate mock-mode configuration: tools, HITL, and scripted turns.
///
/// Parsed from the `--mock-config` JSON document:
///
/// ```json
/// {
///   "tools": {"search": {"hits": []}},
///   "tool_matches": [{"tool": "search", "arguments": {"q": "x"}, "response": {}}],
///   "fallback": {"ok": true},
///   "hitl": {"mode": "approve", "responses": {"go?": true}},
///   "turns": {"model-id": [{"text": "", "tool_calls": [{"name": "done"}]}]}
/// }
/// ```
#[derive(Clone)]
pub struct MockConfig {
    pub tools: MockToolConfig,
    pub hitl: MockHitlHandler,
    pub turns: HashMap<String, Vec<MockTurn>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            tools: MockToolConfig::default(),
            hitl: MockHitlHandler::approve(),
            turns: HashMap::new(),
        }
    }
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a full mock-config document.
    pub fn from_json(doc: &Value) -> Result<Self, ScriptError> {
        let tools = MockToolConfig::from_json(doc)?;
        let hitl = MockHitlHandler::from_json(doc)?;
        let mut turns = HashMap::new();
        if let Some(section) = doc.get("turns") {
            let map = section
                .as_object()
                .ok_or_else(|| ScriptError::validation("mock config 'turns' must be an object"))?;
            for (model, list) in map {
                let parsed: Vec<MockTurn> = serde_json::from_value(list.clone()).map_err(|e| {
                    ScriptError::validation(format!("invalid mock turns for '{model}': {e}"))
                })?;
                turns.insert(model.clone(), parsed);
            }
        }
        Ok(Self { tools, hitl, turns })
    }

    /// Build the scripted provider for this configuration.
    pub fn provider(&self) -> MockProvider {
        let mut provider = MockProvider::new();
        for (model, turns) in &self.turns {
            provider = provider.with_turns(model.clone(), turns.clone());
        }
        provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_heuristic_calls_done_when_available() {
        let provider = MockProvider::new();
        let tools = vec![ToolDescriptor::new("done", "finish")];
        let completion = provider
            .complete(&ModelConfig::new("mock", "m"), &[], &tools)
            .await
            .unwrap();
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        assert_eq!(completion.tool_calls[0].name, "done");
    }

    #[tokio::test]
    async fn scripted_turns_pop_in_order() {
        let provider = MockProvider::new().with_turns(
            "m",
            vec![
                MockTurn {
                    text: "thinking".into(),
                    ..MockTurn::default()
                },
                MockTurn {
                    tool_calls: vec![MockToolCall {
                        name: "done".into(),
                        arguments: json!({"reason": "finished"}),
                    }],
                    ..MockTurn::default()
                },
            ],
        );
        let config = ModelConfig::new("mock", "m");
        let first = provider.complete(&config, &[], &[]).await.unwrap();
        assert_eq!(first.text, "thinking");
        assert_eq!(first.finish_reason, FinishReason::Stop);
        let second = provider.complete(&config, &[], &[]).await.unwrap();
        assert_eq!(second.tool_calls[0].arguments["reason"], json!("finished"));
    }

    #[test]
    fn mock_config_parses_all_sections() {
        let doc = json!({
            "tools": {"search": {"hits": []}},
            "hitl": {"mode": "silent"},
            "turns": {"m": [{"text": "hi"}]}
        });
        let config = MockConfig::from_json(&doc).unwrap();
        assert_eq!(config.turns["m"].len(), 1);
        assert_eq!(config.tools.respond_to("search", &json!({})), json!({"hits": []}));
    }
}
