//! Shared contracts for the Tactus procedure runtime: error taxonomy, event
//! model, session messages, tool/provider/HITL/storage interfaces, and the
//! pure-data procedure model.

pub mod error;
pub mod event;
pub mod hitl;
pub mod procedure;
pub mod provider;
pub mod session;
pub mod storage;
pub mod tool;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// error
pub use error::{ErrorKind, ScriptError};

// event
pub use event::{
    now_ms, AgentTurnStage, EvaluationStage, EventPayload, EventRecord, ExecutionLifecycle,
    LogLevel, ScenarioStage,
};

// session
pub use session::{
    gen_message_id, Role, SessionMessage, ToolCallRecord, ToolCallRequest, VisibilityClass,
};

// tool
pub use tool::{Tool, ToolDescriptor, ToolError};

// provider
pub use provider::{
    Completion, CompletionDelta, CompletionStream, FinishReason, ModelConfig, ModelProvider,
    ProviderError, RetryPolicy, Usage,
};

// hitl
pub use hitl::{HitlHandler, HitlKind, HitlOutcome, HitlRequest};

// procedure
pub use procedure::{
    AgentConfig, EvaluationConfig, FilterSpec, InvocationRecord, InvocationStatus, ParamField,
    ParamSchema, ParamType,
};

// storage
pub use storage::{MemoryStorage, StorageBackend, StorageError};
