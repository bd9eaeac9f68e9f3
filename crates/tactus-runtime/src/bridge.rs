//! Script bridge: the capability surface exposed to procedure scripts.
//!
//! The external script front end compiles a procedure body down to a
//! [`ProcedureScript`]; native procedures implement it directly (usually via
//! [`FnScript`]). Every capability object is bound to one invocation, never
//! to a process-wide singleton, so parallel harness runs cannot interfere.
//!
//! Values cross the boundary as `serde_json::Value`; translation is identity
//! on JSON-compatible shapes (unordered-map key order excepted).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tactus_contract::hitl::HitlKind;
use tactus_contract::storage::StorageBackend;
use tactus_contract::{
    ErrorKind, EventPayload, InvocationStatus, LogLevel, ScriptError, SessionMessage,
    ToolCallRecord,
};

use crate::agent::AgentHandle;
use crate::context::InvocationContext;
use crate::hitl::{self, HitlOptions};
use crate::scheduler::InvocationHandle;
use crate::session::build_chain;

/// A compiled procedure body.
#[async_trait]
pub trait ProcedureScript: Send + Sync {
    /// Run the body to completion, returning the procedure's result value.
    async fn execute(&self, ctx: ScriptContext) -> Result<Value, ScriptError>;
}

/// Adapter exposing an async closure as a [`ProcedureScript`].
pub struct FnScript<F>(F);

#[async_trait]
impl<F, Fut> ProcedureScript for FnScript<F>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ScriptError>> + Send,
{
    async fn execute(&self, ctx: ScriptContext) -> Result<Value, ScriptError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a script.
pub fn script<F, Fut>(f: F) -> Arc<dyn ProcedureScript>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ScriptError>> + Send + 'static,
{
    Arc::new(FnScript(f))
}

/// Per-invocation entry point handed to the script body.
#[derive(Clone)]
pub struct ScriptContext {
    pub(crate) inner: Arc<InvocationContext>,
}

impl ScriptContext {
    pub(crate) fn new(inner: Arc<InvocationContext>) -> Self {
        Self { inner }
    }

    /// The invocation id this script runs under.
    pub fn invocation_id(&self) -> &str {
        &self.inner.id
    }

    /// Capability object for one declared agent.
    pub fn agent(&self, name: &str) -> Result<AgentHandle, ScriptError> {
        let config = self.inner.definition.agents.get(name).ok_or_else(|| {
            ScriptError::validation(format!("undeclared agent '{name}'"))
        })?;
        Ok(AgentHandle::new(
            name,
            config.clone(),
            build_chain(&config.filters),
            self.inner.clone(),
        ))
    }

    /// Tool-call queries.
    pub fn tool(&self) -> ToolQuery {
        ToolQuery {
            inner: self.inner.clone(),
        }
    }

    /// Invocation-scoped key/value state.
    pub fn state(&self) -> StateApi {
        StateApi {
            inner: self.inner.clone(),
        }
    }

    /// Stage transitions.
    pub fn stage(&self) -> StageApi {
        StageApi {
            inner: self.inner.clone(),
        }
    }

    /// Structured logging into the event stream.
    pub fn log(&self) -> LogApi {
        LogApi {
            inner: self.inner.clone(),
        }
    }

    /// Human-in-the-loop requests.
    pub fn human(&self) -> HumanApi {
        HumanApi {
            inner: self.inner.clone(),
        }
    }

    /// Sub-procedure orchestration.
    pub fn procedure(&self) -> ProcedureApi {
        ProcedureApi {
            inner: self.inner.clone(),
        }
    }

    /// Explicit user checkpoints.
    pub fn step(&self) -> StepApi {
        StepApi {
            inner: self.inner.clone(),
        }
    }

    /// Turn budget queries.
    pub fn iterations(&self) -> IterationsApi {
        IterationsApi {
            inner: self.inner.clone(),
        }
    }

    /// Session operations for one agent.
    pub fn session(&self, agent: &str) -> Result<SessionApi, ScriptError> {
        if !self.inner.definition.agents.contains_key(agent) {
            return Err(ScriptError::validation(format!(
                "undeclared agent '{agent}'"
            )));
        }
        Ok(SessionApi {
            agent: agent.to_string(),
            inner: self.inner.clone(),
        })
    }

    /// Resolved procedure parameters.
    pub fn params(&self) -> ParamsApi {
        ParamsApi {
            inner: self.inner.clone(),
        }
    }
}

/// Queries over recorded tool calls.
pub struct ToolQuery {
    inner: Arc<InvocationContext>,
}

impl ToolQuery {
    /// Whether the named tool was called at least once.
    pub fn called(&self, name: &str) -> bool {
        self.inner.tool_calls.called(name)
    }

    /// The most recent call of the named tool.
    pub fn last_call(&self, name: &str) -> Option<ToolCallRecord> {
        self.inner.tool_calls.last_call(name)
    }

    /// Every call of the named tool.
    pub fn calls_of(&self, name: &str) -> Vec<ToolCallRecord> {
        self.inner.tool_calls.calls_of(name)
    }
}

/// Scoped key/value state. Mutations are journalled and emit log events;
/// reads do neither.
pub struct StateApi {
    inner: Arc<InvocationContext>,
}

impl StateApi {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.state.has(key)
    }

    pub fn dump(&self) -> Map<String, Value> {
        self.inner.state.dump()
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), ScriptError> {
        let step_id = self.inner.journal.step_id(&format!("state.set:{key}"));
        if let Some(stored) = self.inner.journal.lookup_as::<Value>(&step_id).await? {
            self.inner.state.set(key, stored);
            return Ok(());
        }
        self.inner.check_cancelled()?;
        self.inner.state.set(key, value.clone());
        self.inner
            .emit(EventPayload::Log {
                level: LogLevel::Debug,
                message: format!("state.set {key}"),
            })
            .await;
        self.inner.journal.commit(&step_id, &value).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Ok(())
    }

    /// Increment a numeric key by `delta`, returning the new value.
    pub async fn incr(&self, key: &str, delta: f64) -> Result<Value, ScriptError> {
        let step_id = self.inner.journal.step_id(&format!("state.incr:{key}"));
        if let Some(stored) = self.inner.journal.lookup_as::<Value>(&step_id).await? {
            self.inner.state.set(key, stored.clone());
            return Ok(stored);
        }
        self.inner.check_cancelled()?;
        let value = self.inner.state.incr(key, delta)?;
        self.inner
            .emit(EventPayload::Log {
                level: LogLevel::Debug,
                message: format!("state.incr {key}"),
            })
            .await;
        self.inner.journal.commit(&step_id, &value).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Ok(value)
    }

    pub async fn clear(&self) -> Result<(), ScriptError> {
        let step_id = self.inner.journal.step_id("state.clear");
        if self.inner.journal.lookup(&step_id).await?.is_some() {
            self.inner.state.clear();
            return Ok(());
        }
        self.inner.check_cancelled()?;
        self.inner.state.clear();
        self.inner
            .emit(EventPayload::Log {
                level: LogLevel::Debug,
                message: "state.clear".into(),
            })
            .await;
        self.inner.journal.commit(&step_id, &Value::Null).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Ok(())
    }
}

/// Stage transitions, validated against the declared stage list.
pub struct StageApi {
    inner: Arc<InvocationContext>,
}

#[derive(Serialize, Deserialize)]
struct StageTransition {
    from: Option<String>,
    to: String,
}

impl StageApi {
    pub fn current(&self) -> Option<String> {
        self.inner.stage.lock().expect("stage lock poisoned").clone()
    }

    pub async fn set(&self, name: &str) -> Result<(), ScriptError> {
        let stages = &self.inner.definition.stages;
        if !stages.is_empty() && !stages.iter().any(|s| s == name) {
            return Err(ScriptError::validation(format!(
                "undeclared stage '{name}'"
            )));
        }

        let step_id = self.inner.journal.step_id("stage.set");
        if let Some(transition) = self
            .inner
            .journal
            .lookup_as::<StageTransition>(&step_id)
            .await?
        {
            *self.inner.stage.lock().expect("stage lock poisoned") = Some(transition.to);
            return Ok(());
        }
        self.inner.check_cancelled()?;

        let from = {
            let mut stage = self.inner.stage.lock().expect("stage lock poisoned");
            std::mem::replace(&mut *stage, Some(name.to_string()))
        };
        self.inner
            .emit(EventPayload::StageChange {
                from: from.clone(),
                to: name.to_string(),
            })
            .await;
        self.inner
            .journal
            .commit(
                &step_id,
                &StageTransition {
                    from,
                    to: name.to_string(),
                },
            )
            .await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Ok(())
    }
}

/// Structured logging. Each call is journalled so replays do not duplicate
/// log events.
pub struct LogApi {
    inner: Arc<InvocationContext>,
}

impl LogApi {
    pub async fn debug(&self, message: impl Into<String>) -> Result<(), ScriptError> {
        self.log(LogLevel::Debug, message.into()).await
    }

    pub async fn info(&self, message: impl Into<String>) -> Result<(), ScriptError> {
        self.log(LogLevel::Info, message.into()).await
    }

    pub async fn warn(&self, message: impl Into<String>) -> Result<(), ScriptError> {
        self.log(LogLevel::Warn, message.into()).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<(), ScriptError> {
        self.log(LogLevel::Error, message.into()).await
    }

    async fn log(&self, level: LogLevel, message: String) -> Result<(), ScriptError> {
        let step_id = self
            .inner
            .journal
            .step_id(&format!("log.{}", level_label(level)));
        if self.inner.journal.lookup(&step_id).await?.is_some() {
            return Ok(());
        }
        self.inner.check_cancelled()?;
        self.inner
            .emit(EventPayload::Log {
                level,
                message: message.clone(),
            })
            .await;
        self.inner.journal.commit(&step_id, &message).await?;
        Ok(())
    }
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Human-in-the-loop requests.
pub struct HumanApi {
    inner: Arc<InvocationContext>,
}

impl HumanApi {
    /// Request a yes/no decision.
    pub async fn approve(&self, opts: HitlOptions) -> Result<Value, ScriptError> {
        hitl::request(&self.inner, HitlKind::Approve, opts).await
    }

    /// Request a free-form value.
    pub async fn input(&self, opts: HitlOptions) -> Result<Value, ScriptError> {
        hitl::request(&self.inner, HitlKind::Input, opts).await
    }

    /// Request a review of produced content.
    pub async fn review(&self, opts: HitlOptions) -> Result<Value, ScriptError> {
        hitl::request(&self.inner, HitlKind::Review, opts).await
    }
}

/// Explicit user checkpoints.
pub struct StepApi {
    inner: Arc<InvocationContext>,
}

impl StepApi {
    /// Run `f` once and journal its result; later calls with the same name
    /// in this invocation return the journalled value without running `f`.
    pub async fn run<F, Fut>(&self, name: &str, f: F) -> Result<Value, ScriptError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ScriptError>> + Send,
    {
        let step_id = self.inner.journal.step_id(&format!("step:{name}"));
        // `Step.run` keys by name, not call site: a re-run of the same name
        // replays even while the journal is live.
        if let Some(value) = self
            .inner
            .storage
            .read_checkpoint(&self.inner.id, &step_id)
            .await
            .map_err(|e| ScriptError::internal(e.to_string()))?
        {
            return Ok(value);
        }
        if let Some(prior) = self.lookup_prior_run(name, &step_id).await? {
            return Ok(prior);
        }
        self.inner.check_cancelled()?;
        let value = f().await?;
        self.inner.journal.commit(&step_id, &value).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Ok(value)
    }

    /// Within one invocation, `Step.run(name, ..)` is idempotent across call
    /// sites: ordinal 0 of the name holds the canonical value.
    async fn lookup_prior_run(
        &self,
        name: &str,
        step_id: &str,
    ) -> Result<Option<Value>, ScriptError> {
        let first = format!("step:{name}:0");
        if first == step_id {
            return Ok(None);
        }
        self.inner
            .storage
            .read_checkpoint(&self.inner.id, &first)
            .await
            .map_err(|e| ScriptError::internal(e.to_string()))
    }
}

/// Turn budget queries.
pub struct IterationsApi {
    inner: Arc<InvocationContext>,
}

impl IterationsApi {
    /// Completed agent turns in this invocation.
    pub fn current(&self) -> u64 {
        self.inner.iteration_count()
    }

    /// Whether the turn budget `n` has been reached. Not a failure: the
    /// script decides how to react.
    pub fn exceeded(&self, n: u64) -> bool {
        self.current() >= n
    }
}

/// Session operations for one agent.
pub struct SessionApi {
    agent: String,
    inner: Arc<InvocationContext>,
}

impl SessionApi {
    /// Full message history, oldest first.
    pub fn history(&self) -> Vec<SessionMessage> {
        self.inner.sessions.history(&self.agent)
    }

    /// Drop every message.
    pub async fn clear(&self) -> Result<(), ScriptError> {
        let step_id = self
            .inner
            .journal
            .step_id(&format!("session.clear:{}", self.agent));
        if self.inner.journal.lookup(&step_id).await?.is_some() {
            self.inner.sessions.clear(&self.agent);
            return Ok(());
        }
        self.inner.check_cancelled()?;
        self.inner.sessions.clear(&self.agent);
        self.inner
            .emit(EventPayload::Log {
                level: LogLevel::Debug,
                message: format!("session.clear {}", self.agent),
            })
            .await;
        self.inner.journal.commit(&step_id, &Value::Null).await?;
        Ok(())
    }

    /// Append an internal system message.
    pub async fn inject_system(&self, text: impl Into<String>) -> Result<(), ScriptError> {
        let text = text.into();
        let step_id = self
            .inner
            .journal
            .step_id(&format!("session.inject:{}", self.agent));
        if let Some(stored) = self.inner.journal.lookup_as::<String>(&step_id).await? {
            self.inner
                .sessions
                .append(&self.agent, SessionMessage::internal_system(stored));
            return Ok(());
        }
        self.inner.check_cancelled()?;
        self.inner
            .sessions
            .append(&self.agent, SessionMessage::internal_system(text.clone()));
        self.inner.journal.commit(&step_id, &text).await?;
        Ok(())
    }

    /// Persist the session into a state key.
    pub async fn save_to(&self, key: &str) -> Result<(), ScriptError> {
        let step_id = self
            .inner
            .journal
            .step_id(&format!("session.save:{}:{key}", self.agent));
        if let Some(stored) = self.inner.journal.lookup_as::<Value>(&step_id).await? {
            self.inner.state.set(key, stored);
            return Ok(());
        }
        self.inner.check_cancelled()?;
        let snapshot = serde_json::to_value(self.history())
            .map_err(|e| ScriptError::internal(format!("unserializable session: {e}")))?;
        self.inner.state.set(key, snapshot.clone());
        self.inner.journal.commit(&step_id, &snapshot).await?;
        Ok(())
    }

    /// Replace the session from a state key written by `save_to`.
    pub async fn load_from(&self, key: &str) -> Result<(), ScriptError> {
        let value = self.inner.state.get(key).ok_or_else(|| {
            ScriptError::validation(format!("no session saved under state key '{key}'"))
        })?;
        let messages: Vec<SessionMessage> = serde_json::from_value(value).map_err(|e| {
            ScriptError::validation(format!("state key '{key}' does not hold a session: {e}"))
        })?;
        self.inner.sessions.replace(&self.agent, messages);
        Ok(())
    }
}

/// Resolved procedure parameters (read-only).
pub struct ParamsApi {
    inner: Arc<InvocationContext>,
}

impl ParamsApi {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.params.get(name).cloned()
    }

    pub fn all(&self) -> Map<String, Value> {
        self.inner.params.clone()
    }
}

/// Opaque handle to a child invocation.
#[derive(Clone)]
pub struct ProcedureHandle {
    pub(crate) handle: InvocationHandle,
}

impl ProcedureHandle {
    /// The child invocation id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }
}

/// Journalled outcome of one wait.
#[derive(Serialize, Deserialize)]
struct WaitOutcome {
    done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ScriptError>,
}

/// Sub-procedure orchestration.
pub struct ProcedureApi {
    inner: Arc<InvocationContext>,
}

impl ProcedureApi {
    /// Synchronous child invocation: spawn and block until it terminates.
    pub async fn run(&self, name: &str, params: Value) -> Result<Value, ScriptError> {
        let handle = self.spawn(name, params).await?;
        match self.wait_internal(&handle, None, true).await? {
            Some(value) => Ok(value),
            None => Err(ScriptError::internal(
                "untimed wait returned without a terminal child",
            )),
        }
    }

    /// Asynchronous child invocation; returns immediately.
    pub async fn spawn(&self, name: &str, params: Value) -> Result<ProcedureHandle, ScriptError> {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ScriptError::validation(format!(
                    "procedure params must be a map, got {other}"
                )))
            }
        };
        if self.inner.ancestors.iter().any(|a| a == name) {
            return Err(ScriptError::new(
                ErrorKind::Internal,
                format!("procedure call cycle detected: '{name}' is already executing"),
            ));
        }

        let step_id = self.inner.journal.step_id(&format!("procedure.spawn:{name}"));
        let scheduler = self.inner.scheduler()?;
        if let Some(child_id) = self.inner.journal.lookup_as::<String>(&step_id).await? {
            let handle = scheduler
                .attach_child(&self.inner, name, params, &child_id)
                .await?;
            return Ok(ProcedureHandle { handle });
        }
        self.inner.check_cancelled()?;

        let child_id = uuid::Uuid::now_v7().simple().to_string();
        // The child id is committed before the child starts so a crash after
        // spawn re-attaches to the same child instead of orphaning it.
        self.inner.journal.commit(&step_id, &child_id).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        let handle = scheduler
            .spawn_child(&self.inner, name, params, &child_id)
            .await?;
        Ok(ProcedureHandle { handle })
    }

    /// Live status snapshot of a child invocation.
    pub fn status(&self, handle: &ProcedureHandle) -> Value {
        let status = handle.handle.status();
        serde_json::json!({
            "status": status.as_str(),
            "waiting_for_human": status == InvocationStatus::WaitingHuman,
            "iterations": handle.handle.iterations(),
        })
    }

    /// Block until the child terminates or the timeout elapses. Returns the
    /// child's result, or `None` on timeout. A failed child re-raises here.
    pub async fn wait(
        &self,
        handle: &ProcedureHandle,
        timeout_secs: Option<f64>,
    ) -> Result<Option<Value>, ScriptError> {
        self.wait_internal(handle, timeout_secs, true).await
    }

    /// Return only when every handle is terminal. Child failures do not
    /// raise here; harvest them with [`result`](Self::result).
    pub async fn wait_all(&self, handles: &[ProcedureHandle]) -> Result<(), ScriptError> {
        for handle in handles {
            self.wait_internal(handle, None, false).await?;
        }
        Ok(())
    }

    /// The child's final result; re-raises its failure with the child id.
    pub async fn result(&self, handle: &ProcedureHandle) -> Result<Value, ScriptError> {
        match self.wait_internal(handle, None, true).await? {
            Some(value) => Ok(value),
            None => Err(ScriptError::internal(
                "untimed wait returned without a terminal child",
            )),
        }
    }

    async fn wait_internal(
        &self,
        handle: &ProcedureHandle,
        timeout_secs: Option<f64>,
        raise: bool,
    ) -> Result<Option<Value>, ScriptError> {
        let step_id = self.inner.journal.step_id("procedure.wait");
        if let Some(outcome) = self.inner.journal.lookup_as::<WaitOutcome>(&step_id).await? {
            return Self::map_outcome(handle, outcome, raise);
        }
        self.inner.check_cancelled()?;

        self.inner
            .set_status(InvocationStatus::WaitingChild)
            .await?;
        let waited = tokio::select! {
            _ = self.inner.cancel.cancelled() => None,
            outcome = wait_with_timeout(&handle.handle, timeout_secs) => Some(outcome),
        };
        let Some(terminal) = waited else {
            return Err(ScriptError::cancelled());
        };
        self.inner.set_status(InvocationStatus::Running).await?;

        let outcome = match terminal {
            None => WaitOutcome {
                done: false,
                result: None,
                error: None,
            },
            Some(Ok(value)) => WaitOutcome {
                done: true,
                result: Some(value),
                error: None,
            },
            Some(Err(error)) => WaitOutcome {
                done: true,
                result: None,
                error: Some(error),
            },
        };
        self.inner.journal.commit(&step_id, &outcome).await?;
        self.inner
            .emit(EventPayload::CheckpointWritten { step_id })
            .await;
        Self::map_outcome(handle, outcome, raise)
    }

    fn map_outcome(
        handle: &ProcedureHandle,
        outcome: WaitOutcome,
        raise: bool,
    ) -> Result<Option<Value>, ScriptError> {
        if !outcome.done {
            return Ok(None);
        }
        match outcome.error {
            Some(error) if raise => Err(error.with_child(handle.id())),
            Some(_) => Ok(Some(Value::Null)),
            None => Ok(outcome.result.or(Some(Value::Null))),
        }
    }
}

/// Await a handle's terminal result, honoring an optional timeout.
/// `Some(timeout) == 0` performs an immediate terminal check.
async fn wait_with_timeout(
    handle: &InvocationHandle,
    timeout_secs: Option<f64>,
) -> Option<Result<Value, ScriptError>> {
    match timeout_secs {
        None => Some(handle.wait_terminal().await),
        Some(secs) => {
            let duration = Duration::from_secs_f64(secs.max(0.0));
            match tokio::time::timeout(duration, handle.wait_terminal()).await {
                Ok(result) => Some(result),
                Err(_) => None,
            }
        }
    }
}
