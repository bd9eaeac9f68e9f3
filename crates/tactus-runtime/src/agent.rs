//! The agent primitive: one declared agent, its session, and `turn()`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tactus_contract::provider::{Completion, CompletionDelta, FinishReason, ProviderError, Usage};
use tactus_contract::{
    AgentConfig, AgentTurnStage, ErrorKind, EventPayload, ScriptError, SessionMessage,
    ToolCallRequest,
};

use crate::context::InvocationContext;
use crate::session::ContextFilter;

/// Result of one agent turn, as journalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    /// Accumulated model text.
    pub text: String,
    /// Tool calls the model requested this turn.
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    /// Token usage, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Usage>,
}

/// One declared agent bound to its invocation.
pub struct AgentHandle {
    name: String,
    config: AgentConfig,
    filter: Arc<dyn ContextFilter>,
    ctx: Arc<InvocationContext>,
}

impl AgentHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        config: AgentConfig,
        filter: Arc<dyn ContextFilter>,
        ctx: Arc<InvocationContext>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            filter,
            ctx,
        }
    }

    /// The agent's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One round-trip with the model, including any tool calls it requests.
    pub async fn turn(&self) -> Result<TurnResult, ScriptError> {
        let ctx = &self.ctx;
        let step_id = ctx.journal.step_id(&format!("agent:{}:turn", self.name));

        if let Some(turn) = ctx.journal.lookup_as::<TurnResult>(&step_id).await? {
            self.bootstrap_session();
            self.apply_turn_to_session(&turn);
            self.run_tool_calls(&turn).await?;
            ctx.iterations.fetch_add(1, Ordering::SeqCst);
            return Ok(turn);
        }

        ctx.check_cancelled()?;
        self.bootstrap_session();

        let system = render_template(&self.config.system_prompt, &ctx.params, &ctx.state.dump());
        let visible = self.filter.apply(ctx.sessions.history(&self.name));
        let mut messages = Vec::with_capacity(visible.len() + 1);
        if !system.is_empty() {
            messages.push(SessionMessage::system(system));
        }
        messages.extend(visible);
        let tools = ctx.registry.descriptors_for(&self.config.tools);

        ctx.emit(EventPayload::AgentTurn {
            agent: self.name.clone(),
            stage: AgentTurnStage::Started,
            text: None,
        })
        .await;

        let completion = self.complete_with_retry(&messages, &tools).await?;
        let turn = TurnResult {
            text: completion.text,
            tool_calls: completion.tool_calls,
            finish_reason: completion.finish_reason,
            cost: completion.usage,
        };

        ctx.journal.commit(&step_id, &turn).await?;
        ctx.emit(EventPayload::CheckpointWritten { step_id }).await;
        ctx.emit(EventPayload::AgentTurn {
            agent: self.name.clone(),
            stage: AgentTurnStage::Responded,
            text: Some(turn.text.clone()),
        })
        .await;
        if let Some(usage) = &turn.cost {
            ctx.emit(EventPayload::Cost {
                agent: self.name.clone(),
                model: self.config.model.model.clone(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .await;
        }

        self.apply_turn_to_session(&turn);
        self.run_tool_calls(&turn).await?;
        ctx.iterations.fetch_add(1, Ordering::SeqCst);
        Ok(turn)
    }

    /// Inject the rendered initial message on the agent's first turn.
    fn bootstrap_session(&self) {
        if !self.ctx.sessions.is_empty(&self.name) {
            return;
        }
        if let Some(initial) = &self.config.initial_message {
            let rendered = render_template(initial, &self.ctx.params, &self.ctx.state.dump());
            self.ctx
                .sessions
                .append(&self.name, SessionMessage::user(rendered));
        }
    }

    /// Append the assistant message produced by a turn. Emits nothing, so it
    /// is shared by the live and replay paths.
    fn apply_turn_to_session(&self, turn: &TurnResult) {
        self.ctx.sessions.append(
            &self.name,
            SessionMessage::assistant_with_tool_calls(turn.text.clone(), turn.tool_calls.clone()),
        );
    }

    /// Execute (or replay) the tool calls requested by a turn.
    async fn run_tool_calls(&self, turn: &TurnResult) -> Result<(), ScriptError> {
        for call in &turn.tool_calls {
            self.ctx
                .registry
                .invoke(&self.ctx, Some(&self.name), call)
                .await?;
        }
        Ok(())
    }

    /// Call the provider, retrying retryable failures with exponential
    /// backoff. Partial streamed output from a failed attempt is discarded.
    async fn complete_with_retry(
        &self,
        messages: &[SessionMessage],
        tools: &[tactus_contract::ToolDescriptor],
    ) -> Result<Completion, ScriptError> {
        let policy = self.ctx.provider.retry_policy();
        let mut attempt = 1u32;
        loop {
            match self.stream_once(messages, tools).await {
                Ok(completion) => return Ok(completion),
                Err(err) if matches!(err.kind, ErrorKind::Cancelled) => return Err(err),
                Err(err) if err.kind == ErrorKind::ProviderRetryable && attempt < policy.max_attempts =>
                {
                    let backoff = policy.backoff_ms(attempt);
                    tracing::warn!(
                        agent = %self.name,
                        attempt,
                        backoff_ms = backoff,
                        error = %err.message,
                        "retrying provider call"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                        _ = self.ctx.cancel.cancelled() => return Err(ScriptError::cancelled()),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One streaming provider attempt, folded into a completion.
    async fn stream_once(
        &self,
        messages: &[SessionMessage],
        tools: &[tactus_contract::ToolDescriptor],
    ) -> Result<Completion, ScriptError> {
        let mut stream = tokio::select! {
            result = self
                .ctx
                .provider
                .complete_stream(&self.config.model, messages, tools) =>
            {
                result.map_err(provider_error)?
            }
            _ = self.ctx.cancel.cancelled() => return Err(ScriptError::cancelled()),
        };

        let mut text = String::new();
        loop {
            let delta = tokio::select! {
                delta = stream.next() => delta,
                _ = self.ctx.cancel.cancelled() => return Err(ScriptError::cancelled()),
            };
            match delta {
                None => {
                    return Err(ScriptError::new(
                        ErrorKind::ProviderFatal,
                        "provider stream ended without a completion",
                    ))
                }
                Some(Err(err)) => return Err(provider_error(err)),
                Some(Ok(CompletionDelta::Text(fragment))) => text.push_str(&fragment),
                Some(Ok(CompletionDelta::Done(mut completion))) => {
                    if completion.text.is_empty() && !text.is_empty() {
                        completion.text = text;
                    }
                    return Ok(completion);
                }
            }
        }
    }
}

fn provider_error(err: ProviderError) -> ScriptError {
    match err {
        ProviderError::Retryable(msg) => ScriptError::new(ErrorKind::ProviderRetryable, msg),
        ProviderError::Fatal(msg) => ScriptError::new(ErrorKind::ProviderFatal, msg),
    }
}

/// Substitute `{params.key}` and `{state.key}` placeholders in a prompt
/// template against the current parameters and state.
pub fn render_template(
    template: &str,
    params: &Map<String, Value>,
    state: &Map<String, Value>,
) -> String {
    let mut rendered = template.to_string();
    for (scope, map) in [("params", params), ("state", state)] {
        for (key, value) in map {
            let placeholder = format!("{{{scope}.{key}}}");
            if rendered.contains(&placeholder) {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &text);
            }
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_substitutes_params_and_state() {
        let mut params = Map::new();
        params.insert("name".into(), json!("World"));
        let mut state = Map::new();
        state.insert("count".into(), json!(3));
        let out = render_template("Greet {params.name}, count={state.count}", &params, &state);
        assert_eq!(out, "Greet World, count=3");
    }

    #[test]
    fn template_leaves_unknown_placeholders() {
        let out = render_template("{params.missing}", &Map::new(), &Map::new());
        assert_eq!(out, "{params.missing}");
    }

    #[test]
    fn turn_result_round_trips() {
        let turn = TurnResult {
            text: "hi".into(),
            tool_calls: vec![ToolCallRequest::new("c1", "done", json!({"reason": "ok"}))],
            finish_reason: FinishReason::ToolCalls,
            cost: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        };
        let v = serde_json::to_value(&turn).unwrap();
        let back: TurnResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, turn);
    }
}
