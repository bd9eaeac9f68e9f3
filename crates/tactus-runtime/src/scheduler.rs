//! The procedure scheduler: invocation tree, spawn/wait/cancel, and resume.
//!
//! Each invocation runs as one tokio task; every primitive call is a
//! suspension point. Parallelism exists only between invocations. On resume,
//! primitives replay the journal and execution continues at the first
//! un-journalled suspension point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use tactus_contract::hitl::HitlHandler;
use tactus_contract::provider::{ModelProvider, ProviderError};
use tactus_contract::storage::StorageBackend;
use tactus_contract::{
    now_ms, EventPayload, EventRecord, ExecutionLifecycle, InvocationStatus, MemoryStorage,
    ScriptError, Tool, ToolCallRecord,
};
use tokio::sync::{broadcast, watch};

use crate::bridge::ScriptContext;
use crate::context::InvocationContext;
use crate::definition::ProcedureDefinition;
use crate::event_log::EventLog;
use crate::hitl::MockHitlHandler;
use crate::journal::Journal;
use crate::mock::MockConfig;
use crate::tools::{MockToolConfig, ToolBinding, ToolRegistry};

/// Everything observable about one finished (or running) invocation,
/// gathered for the harness and the CLI.
#[derive(Clone, Debug)]
pub struct RunArtifacts {
    pub invocation_id: String,
    pub status: InvocationStatus,
    pub result: Option<Value>,
    pub error: Option<ScriptError>,
    /// Final state snapshot, key-ordered.
    pub state: Map<String, Value>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: u64,
    /// Stage names in transition order.
    pub stages: Vec<String>,
    /// The complete event log, including prior runs of this invocation.
    pub events: Vec<EventRecord>,
    pub duration_ms: u64,
}

impl RunArtifacts {
    /// Events of one payload type.
    pub fn events_of_type(&self, type_label: &str) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|e| e.payload.type_label() == type_label)
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct InvocationShared {
    id: String,
    status_rx: watch::Receiver<InvocationStatus>,
    result: OnceLock<Result<Value, ScriptError>>,
    iterations: Arc<AtomicU64>,
    cancel: CancellationToken,
    artifacts: OnceLock<RunArtifacts>,
    events_tx: broadcast::Sender<EventRecord>,
}

/// Handle to one invocation, cloneable and usable from any task.
#[derive(Clone, Debug)]
pub struct InvocationHandle {
    shared: Arc<InvocationShared>,
}

impl InvocationHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current status.
    pub fn status(&self) -> InvocationStatus {
        *self.shared.status_rx.borrow()
    }

    /// Completed agent turns so far.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation of this invocation and its children.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Final result, once terminal.
    pub fn result(&self) -> Option<Result<Value, ScriptError>> {
        self.shared.result.get().cloned()
    }

    /// Artifacts gathered at terminal status.
    pub fn artifacts(&self) -> Option<RunArtifacts> {
        self.shared.artifacts.get().cloned()
    }

    /// Subscribe to this invocation's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.shared.events_tx.subscribe()
    }

    /// Block until terminal and return the final result.
    pub async fn wait_terminal(&self) -> Result<Value, ScriptError> {
        let mut rx = self.shared.status_rx.clone();
        // An error here means the sender dropped, which only happens after
        // the terminal result was stored.
        let _ = rx.wait_for(InvocationStatus::is_terminal).await;
        self.shared.result.get().cloned().unwrap_or_else(|| {
            Err(ScriptError::internal(
                "invocation ended without storing a result",
            ))
        })
    }
}

/// Provider installed when none is configured; every call fails fatally.
struct UnconfiguredProvider;

#[async_trait::async_trait]
impl ModelProvider for UnconfiguredProvider {
    async fn complete(
        &self,
        _config: &tactus_contract::ModelConfig,
        _messages: &[tactus_contract::SessionMessage],
        _tools: &[tactus_contract::ToolDescriptor],
    ) -> Result<tactus_contract::Completion, ProviderError> {
        Err(ProviderError::Fatal(
            "no model provider configured; pass one to SchedulerBuilder or run in mock mode".into(),
        ))
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    storage: Option<Arc<dyn StorageBackend>>,
    provider: Option<Arc<dyn ModelProvider>>,
    hitl: Option<Arc<dyn HitlHandler>>,
    definitions: Vec<Arc<ProcedureDefinition>>,
    tools: Vec<(String, Arc<dyn Tool>)>,
    mock: Option<MockConfig>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            provider: None,
            hitl: None,
            definitions: Vec::new(),
            tools: Vec::new(),
            mock: None,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_hitl(mut self, hitl: Arc<dyn HitlHandler>) -> Self {
        self.hitl = Some(hitl);
        self
    }

    #[must_use]
    pub fn with_definition(mut self, definition: Arc<ProcedureDefinition>) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Register a native tool under its public name.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.tools.push((name.into(), tool));
        self
    }

    /// Enable mock mode: scripted provider, mock HITL, and canned tool
    /// responses. Explicit provider/HITL settings take precedence.
    #[must_use]
    pub fn with_mock(mut self, mock: MockConfig) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn build(self) -> Scheduler {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let (mock_tools, mock_provider, mock_hitl) = match self.mock {
            Some(mock) => {
                let provider: Arc<dyn ModelProvider> = Arc::new(mock.provider());
                let hitl: Arc<dyn HitlHandler> = Arc::new(mock.hitl);
                (Some(mock.tools), Some(provider), Some(hitl))
            }
            None => (None, None, None),
        };
        let provider = self
            .provider
            .or(mock_provider)
            .unwrap_or_else(|| Arc::new(UnconfiguredProvider));
        let hitl = self
            .hitl
            .or(mock_hitl)
            .unwrap_or_else(|| Arc::new(MockHitlHandler::approve()));

        let inner = Arc::new(SchedulerInner {
            storage,
            provider,
            hitl,
            definitions: RwLock::new(
                self.definitions
                    .into_iter()
                    .map(|d| (d.name.clone(), d))
                    .collect(),
            ),
            tools: RwLock::new(self.tools.into_iter().collect()),
            mock_tools,
            invocations: Mutex::new(HashMap::new()),
        });
        Scheduler { inner }
    }
}

pub(crate) struct SchedulerInner {
    pub(crate) storage: Arc<dyn StorageBackend>,
    provider: Arc<dyn ModelProvider>,
    hitl: Arc<dyn HitlHandler>,
    definitions: RwLock<HashMap<String, Arc<ProcedureDefinition>>>,
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    mock_tools: Option<MockToolConfig>,
    invocations: Mutex<HashMap<String, InvocationHandle>>,
}

/// One scheduler per process; invocations are its unit of work.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Register a definition after construction.
    pub fn register(&self, definition: Arc<ProcedureDefinition>) {
        self.inner
            .definitions
            .write()
            .expect("definition lock poisoned")
            .insert(definition.name.clone(), definition);
    }

    /// Register a native tool after construction.
    pub fn register_tool(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.inner
            .tools
            .write()
            .expect("tool lock poisoned")
            .insert(name.into(), tool);
    }

    /// Look up a registered definition.
    pub fn definition(&self, name: &str) -> Option<Arc<ProcedureDefinition>> {
        self.inner.definition(name)
    }

    /// Submit a new invocation of a registered procedure.
    pub async fn submit(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<InvocationHandle, ScriptError> {
        let id = uuid::Uuid::now_v7().simple().to_string();
        self.inner
            .spawn_invocation(name, params, &id, None)
            .await
    }

    /// Submit with an explicit invocation id, resuming any prior state
    /// persisted under that id.
    pub async fn submit_with_id(
        &self,
        name: &str,
        params: Map<String, Value>,
        id: &str,
    ) -> Result<InvocationHandle, ScriptError> {
        self.inner.spawn_invocation(name, params, id, None).await
    }

    /// Submit and block until terminal.
    pub async fn run(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ScriptError> {
        let handle = self.submit(name, params).await?;
        handle.wait_terminal().await
    }

    /// Handle for a live (or retained terminal) invocation.
    pub fn handle(&self, id: &str) -> Option<InvocationHandle> {
        self.inner
            .invocations
            .lock()
            .expect("invocation lock poisoned")
            .get(id)
            .cloned()
    }

    /// Cancel an invocation and, transitively, its children.
    pub fn cancel(&self, id: &str) -> bool {
        match self.handle(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Subscribe to an invocation's event stream.
    pub fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<EventRecord>> {
        self.handle(id).map(|h| h.subscribe())
    }

    /// The storage backend this scheduler persists through.
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        self.inner.storage.clone()
    }
}

impl SchedulerInner {
    fn definition(&self, name: &str) -> Option<Arc<ProcedureDefinition>> {
        self.definitions
            .read()
            .expect("definition lock poisoned")
            .get(name)
            .cloned()
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool lock poisoned")
            .get(name)
            .cloned()
    }

    /// Spawn (or resume) an invocation task and return its handle.
    pub(crate) async fn spawn_invocation(
        self: &Arc<Self>,
        name: &str,
        params: Map<String, Value>,
        id: &str,
        parent: Option<&Arc<InvocationContext>>,
    ) -> Result<InvocationHandle, ScriptError> {
        let definition = self
            .definition(name)
            .ok_or_else(|| ScriptError::validation(format!("unknown procedure '{name}'")))?;
        let resolved = definition.params.resolve(&params)?;

        let prior = self
            .storage
            .load_invocation(id)
            .await
            .map_err(|e| ScriptError::internal(e.to_string()))?;
        let prior_events = self
            .storage
            .read_events(id, 0)
            .await
            .map_err(|e| ScriptError::internal(e.to_string()))?;
        let last_seq = prior_events.last().map(|e| e.seq).unwrap_or(0);
        let prior_output = prior_events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::Output { .. }));
        let was_resume = prior.is_some();
        let created_at = prior.as_ref().map(|r| r.created_at).unwrap_or_else(now_ms);

        let cancel = parent
            .map(|p| p.cancel.child_token())
            .unwrap_or_default();
        let (status_tx, status_rx) = watch::channel(InvocationStatus::Running);
        let iterations = Arc::new(AtomicU64::new(0));

        let mut registry = ToolRegistry::new(self.mock_tools.clone());
        for tool_name in &definition.tools {
            match self.tool(tool_name) {
                Some(tool) => registry.register(tool_name.clone(), ToolBinding::Native(tool)),
                None => tracing::warn!(
                    procedure = %definition.name,
                    tool = %tool_name,
                    "declared tool is not registered"
                ),
            }
        }
        for (tool_name, procedure) in &definition.procedure_tools {
            registry.register(
                tool_name.clone(),
                ToolBinding::Procedure {
                    procedure: procedure.clone(),
                },
            );
        }

        let mut ancestors = parent.map(|p| p.ancestors.clone()).unwrap_or_default();
        ancestors.push(definition.name.clone());

        let event_log = EventLog::new(id, self.storage.clone(), last_seq);
        let journal = Journal::new(id, self.storage.clone(), was_resume);
        let events_tx = event_log.broadcaster();

        let ctx = Arc::new(InvocationContext::new(
            id.to_string(),
            definition,
            resolved,
            event_log,
            journal,
            registry,
            iterations.clone(),
            cancel.clone(),
            self.storage.clone(),
            self.provider.clone(),
            self.hitl.clone(),
            ancestors,
            created_at,
            prior_output,
            Arc::downgrade(self),
            status_tx,
        ));

        let shared = Arc::new(InvocationShared {
            id: id.to_string(),
            status_rx,
            result: OnceLock::new(),
            iterations,
            cancel,
            artifacts: OnceLock::new(),
            events_tx,
        });
        let handle = InvocationHandle {
            shared: shared.clone(),
        };
        self.invocations
            .lock()
            .expect("invocation lock poisoned")
            .insert(id.to_string(), handle.clone());

        tokio::spawn(run_invocation(ctx, shared, was_resume));
        Ok(handle)
    }

    /// Spawn a child invocation below `parent`.
    pub(crate) async fn spawn_child(
        self: &Arc<Self>,
        parent: &Arc<InvocationContext>,
        name: &str,
        params: Map<String, Value>,
        child_id: &str,
    ) -> Result<InvocationHandle, ScriptError> {
        self.spawn_invocation(name, params, child_id, Some(parent))
            .await
    }

    /// Re-attach to a child spawned by a prior run of the parent: reuse the
    /// live handle, adopt the stored terminal result, or resume it.
    pub(crate) async fn attach_child(
        self: &Arc<Self>,
        parent: &Arc<InvocationContext>,
        name: &str,
        params: Map<String, Value>,
        child_id: &str,
    ) -> Result<InvocationHandle, ScriptError> {
        if let Some(handle) = self
            .invocations
            .lock()
            .expect("invocation lock poisoned")
            .get(child_id)
            .cloned()
        {
            return Ok(handle);
        }
        let record = self
            .storage
            .load_invocation(child_id)
            .await
            .map_err(|e| ScriptError::internal(e.to_string()))?;
        match record {
            Some(record) if record.status.is_terminal() => {
                let result = match record.status {
                    InvocationStatus::Completed => {
                        Ok(record.result.unwrap_or(Value::Null))
                    }
                    InvocationStatus::Cancelled => Err(ScriptError::cancelled()),
                    _ => Err(record
                        .error
                        .as_deref()
                        .and_then(|raw| serde_json::from_str::<ScriptError>(raw).ok())
                        .unwrap_or_else(|| {
                            ScriptError::internal(
                                record.error.unwrap_or_else(|| "child failed".into()),
                            )
                        })),
                };
                let handle = terminal_handle(child_id, record.status, result);
                self.invocations
                    .lock()
                    .expect("invocation lock poisoned")
                    .insert(child_id.to_string(), handle.clone());
                Ok(handle)
            }
            _ => {
                // Not terminal (or never persisted): resume it.
                self.spawn_invocation(name, params, child_id, Some(parent))
                    .await
            }
        }
    }

    /// Run a nested procedure exposed as a tool: spawn, block, return its
    /// result.
    pub(crate) async fn run_child(
        self: &Arc<Self>,
        parent: &Arc<InvocationContext>,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ScriptError> {
        if parent.ancestors.iter().any(|a| a == name) {
            return Err(ScriptError::internal(format!(
                "procedure call cycle detected: '{name}' is already executing"
            )));
        }
        let child_id = uuid::Uuid::now_v7().simple().to_string();
        let handle = self
            .spawn_invocation(name, params, &child_id, Some(parent))
            .await?;
        parent.set_status(InvocationStatus::WaitingChild).await?;
        let result = tokio::select! {
            _ = parent.cancel.cancelled() => Err(ScriptError::cancelled()),
            result = handle.wait_terminal() => result,
        };
        if !result.as_ref().err().is_some_and(ScriptError::is_cancelled) {
            parent.set_status(InvocationStatus::Running).await?;
        }
        result.map_err(|e| e.with_child(child_id))
    }
}

/// Build a handle for a child already terminal in storage.
fn terminal_handle(
    id: &str,
    status: InvocationStatus,
    result: Result<Value, ScriptError>,
) -> InvocationHandle {
    let (_status_tx, status_rx) = watch::channel(status);
    let (events_tx, _) = broadcast::channel(1);
    let stored = OnceLock::new();
    let _ = stored.set(result);
    InvocationHandle {
        shared: Arc::new(InvocationShared {
            id: id.to_string(),
            status_rx,
            result: stored,
            iterations: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            artifacts: OnceLock::new(),
            events_tx,
        }),
    }
}

/// Drive one invocation task from start (or resume) to terminal status.
async fn run_invocation(
    ctx: Arc<InvocationContext>,
    shared: Arc<InvocationShared>,
    was_resume: bool,
) {
    let lifecycle = if was_resume {
        ExecutionLifecycle::Resumed
    } else {
        ExecutionLifecycle::Started
    };
    ctx.emit(EventPayload::Execution {
        lifecycle,
        error: None,
    })
    .await;
    if let Err(err) = ctx.set_status(InvocationStatus::Running).await {
        tracing::warn!(invocation = %ctx.id, %err, "failed to persist running status");
    }

    let script = ctx.definition.script.clone();
    let script_ctx = ScriptContext::new(ctx.clone());
    let result = tokio::select! {
        result = script.execute(script_ctx) => result,
        _ = ctx.cancel.cancelled() => Err(ScriptError::cancelled()),
    };

    finalize(&ctx, &shared, result).await;
}

/// Emit terminal events, persist the record, store result and artifacts,
/// and broadcast the final status.
async fn finalize(
    ctx: &Arc<InvocationContext>,
    shared: &Arc<InvocationShared>,
    result: Result<Value, ScriptError>,
) {
    let duration_ms = now_ms().saturating_sub(ctx.started_at);
    let iterations = ctx.iteration_count();
    let tools_used = ctx.tool_calls.names_used();

    let status = match &result {
        Ok(value) => {
            if !ctx.prior_output {
                ctx.emit(EventPayload::Output {
                    result: value.clone(),
                })
                .await;
                ctx.emit(EventPayload::ExecutionSummary {
                    status: InvocationStatus::Completed,
                    iterations,
                    duration_ms,
                    tools_used,
                })
                .await;
            }
            ctx.emit(EventPayload::Execution {
                lifecycle: ExecutionLifecycle::Completed,
                error: None,
            })
            .await;
            InvocationStatus::Completed
        }
        Err(err) if err.is_cancelled() => {
            ctx.emit(EventPayload::Execution {
                lifecycle: ExecutionLifecycle::Cancelled,
                error: None,
            })
            .await;
            InvocationStatus::Cancelled
        }
        Err(err) => {
            ctx.emit(EventPayload::Execution {
                lifecycle: ExecutionLifecycle::Error,
                error: Some(err.to_string()),
            })
            .await;
            ctx.emit(EventPayload::ExecutionSummary {
                status: InvocationStatus::Failed,
                iterations,
                duration_ms,
                tools_used: ctx.tool_calls.names_used(),
            })
            .await;
            InvocationStatus::Failed
        }
    };

    if let Err(err) = ctx
        .persist_record(
            status,
            result.as_ref().ok().cloned(),
            result.as_ref().err(),
        )
        .await
    {
        tracing::warn!(invocation = %ctx.id, %err, "failed to persist terminal record");
    }

    let events = ctx
        .storage
        .read_events(&ctx.id, 0)
        .await
        .unwrap_or_else(|_| ctx.event_log.snapshot());
    let stages = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::StageChange { to, .. } => Some(to.clone()),
            _ => None,
        })
        .collect();
    let artifacts = RunArtifacts {
        invocation_id: ctx.id.clone(),
        status,
        result: result.as_ref().ok().cloned(),
        error: result.as_ref().err().cloned(),
        state: ctx.state.dump(),
        tool_calls: ctx.tool_calls.all(),
        iterations,
        stages,
        events,
        duration_ms,
    };

    let _ = shared.result.set(result);
    let _ = shared.artifacts.set(artifacts);
    ctx.send_status(status);
}
