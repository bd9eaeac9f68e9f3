//! Shared per-invocation runtime state.
//!
//! One `InvocationContext` is owned by exactly one invocation task. All
//! primitives (agents, tools, HITL, state, journal) hang off it; nothing in
//! here is shared across invocations, so parallel harness runs never
//! interfere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use tactus_contract::hitl::HitlHandler;
use tactus_contract::provider::ModelProvider;
use tactus_contract::storage::StorageBackend;
use tactus_contract::{
    now_ms, EventPayload, EventRecord, InvocationRecord, InvocationStatus, ScriptError,
    ToolCallRecord,
};
use tokio::sync::watch;

use crate::definition::ProcedureDefinition;
use crate::event_log::EventLog;
use crate::journal::Journal;
use crate::session::SessionStore;
use crate::state::StateStore;
use crate::tools::ToolRegistry;

/// Queryable record of every tool invocation in one invocation.
#[derive(Default)]
pub struct ToolCallIndex {
    calls: Mutex<Vec<ToolCallRecord>>,
}

impl ToolCallIndex {
    pub fn record(&self, call: ToolCallRecord) {
        self.calls.lock().expect("tool index lock poisoned").push(call);
    }

    /// Whether the named tool was called at least once.
    pub fn called(&self, name: &str) -> bool {
        self.calls
            .lock()
            .expect("tool index lock poisoned")
            .iter()
            .any(|c| c.tool_name == name)
    }

    /// The most recent call of the named tool.
    pub fn last_call(&self, name: &str) -> Option<ToolCallRecord> {
        self.calls
            .lock()
            .expect("tool index lock poisoned")
            .iter()
            .rev()
            .find(|c| c.tool_name == name)
            .cloned()
    }

    /// Every call of the named tool, oldest first.
    pub fn calls_of(&self, name: &str) -> Vec<ToolCallRecord> {
        self.calls
            .lock()
            .expect("tool index lock poisoned")
            .iter()
            .filter(|c| c.tool_name == name)
            .cloned()
            .collect()
    }

    /// All recorded calls.
    pub fn all(&self) -> Vec<ToolCallRecord> {
        self.calls.lock().expect("tool index lock poisoned").clone()
    }

    /// Distinct tool names in first-use order.
    pub fn names_used(&self) -> Vec<String> {
        let calls = self.calls.lock().expect("tool index lock poisoned");
        let mut names = Vec::new();
        for call in calls.iter() {
            if !names.contains(&call.tool_name) {
                names.push(call.tool_name.clone());
            }
        }
        names
    }
}

/// Runtime state owned by one invocation task.
pub struct InvocationContext {
    pub id: String,
    pub definition: Arc<ProcedureDefinition>,
    /// Parameters resolved against the definition's schema.
    pub params: Map<String, Value>,
    pub event_log: EventLog,
    pub state: StateStore,
    pub journal: Journal,
    pub sessions: SessionStore,
    pub tool_calls: ToolCallIndex,
    pub registry: ToolRegistry,
    /// Counts every agent turn in this invocation.
    pub iterations: Arc<AtomicU64>,
    pub stage: Mutex<Option<String>>,
    pub cancel: CancellationToken,
    pub storage: Arc<dyn StorageBackend>,
    pub provider: Arc<dyn ModelProvider>,
    pub hitl: Arc<dyn HitlHandler>,
    /// Definition names from the root down to (and including) this invocation,
    /// used to detect procedure-as-tool cycles.
    pub ancestors: Vec<String>,
    pub created_at: u64,
    pub started_at: u64,
    /// Whether a prior run of this invocation already logged its output.
    pub prior_output: bool,
    pub(crate) scheduler: Weak<crate::scheduler::SchedulerInner>,
    status_tx: watch::Sender<InvocationStatus>,
}

impl InvocationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        definition: Arc<ProcedureDefinition>,
        params: Map<String, Value>,
        event_log: EventLog,
        journal: Journal,
        registry: ToolRegistry,
        iterations: Arc<AtomicU64>,
        cancel: CancellationToken,
        storage: Arc<dyn StorageBackend>,
        provider: Arc<dyn ModelProvider>,
        hitl: Arc<dyn HitlHandler>,
        ancestors: Vec<String>,
        created_at: u64,
        prior_output: bool,
        scheduler: Weak<crate::scheduler::SchedulerInner>,
        status_tx: watch::Sender<InvocationStatus>,
    ) -> Self {
        Self {
            id,
            definition,
            params,
            event_log,
            state: StateStore::new(),
            journal,
            sessions: SessionStore::new(),
            tool_calls: ToolCallIndex::default(),
            registry,
            iterations,
            stage: Mutex::new(None),
            cancel,
            storage,
            provider,
            hitl,
            ancestors,
            created_at,
            started_at: now_ms(),
            prior_output,
            scheduler,
            status_tx,
        }
    }

    /// Append one event to the invocation's log.
    pub async fn emit(&self, payload: EventPayload) -> EventRecord {
        self.event_log.append(payload).await
    }

    /// Raise `Cancelled` if the invocation's token has been cancelled.
    /// Every primitive calls this at its suspension point.
    pub fn check_cancelled(&self) -> Result<(), ScriptError> {
        if self.cancel.is_cancelled() {
            Err(ScriptError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Current status as observed by handles.
    pub fn status(&self) -> InvocationStatus {
        *self.status_tx.borrow()
    }

    /// Transition status, persisting the invocation record.
    pub async fn set_status(&self, status: InvocationStatus) -> Result<(), ScriptError> {
        let _ = self.status_tx.send(status);
        self.persist_record(status, None, None).await
    }

    /// Broadcast a status without persisting (the caller persists separately,
    /// e.g. with a terminal result attached).
    pub(crate) fn send_status(&self, status: InvocationStatus) {
        let _ = self.status_tx.send(status);
    }

    /// Persist the invocation record with the given terminal payload.
    pub async fn persist_record(
        &self,
        status: InvocationStatus,
        result: Option<Value>,
        error: Option<&ScriptError>,
    ) -> Result<(), ScriptError> {
        let record = InvocationRecord {
            id: self.id.clone(),
            definition_ref: self.definition.definition_ref(),
            params: Value::Object(self.params.clone()),
            status,
            created_at: self.created_at,
            completed_at: status.is_terminal().then(now_ms),
            result,
            error: error.map(|e| serde_json::to_string(e).unwrap_or_else(|_| e.to_string())),
        };
        self.storage
            .save_invocation(&record)
            .await
            .map_err(|e| ScriptError::internal(format!("failed to persist invocation: {e}")))
    }

    /// Current iteration count (completed agent turns).
    pub fn iteration_count(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    pub(crate) fn scheduler(&self) -> Result<Arc<crate::scheduler::SchedulerInner>, ScriptError> {
        self.scheduler
            .upgrade()
            .ok_or_else(|| ScriptError::internal("scheduler dropped while invocation running"))
    }
}
