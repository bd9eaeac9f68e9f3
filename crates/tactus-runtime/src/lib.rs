//! The Tactus procedure runtime.
//!
//! Executes agentic-workflow procedures: deterministic orchestration scripts
//! interleaved with LLM agent turns, checkpointed for resume, observable
//! through a typed event log, and suspendable on human-in-the-loop requests.

pub mod agent;
pub mod bridge;
pub mod context;
pub mod definition;
pub mod event_log;
pub mod hitl;
pub mod journal;
pub mod mock;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod tools;

// agent
pub use agent::{render_template, AgentHandle, TurnResult};

// bridge
pub use bridge::{
    script, FnScript, HumanApi, IterationsApi, LogApi, ParamsApi, ProcedureApi, ProcedureHandle,
    ProcedureScript, ScriptContext, SessionApi, StageApi, StateApi, StepApi, ToolQuery,
};

// definition
pub use definition::{CustomStep, ProcedureBuilder, ProcedureDefinition, StepCheckFn};

// scheduler
pub use scheduler::{InvocationHandle, RunArtifacts, Scheduler, SchedulerBuilder};

// primitives
pub use event_log::EventLog;
pub use hitl::{HitlOptions, MockHitlHandler, MockHitlMode};
pub use journal::Journal;
pub use mock::{MockConfig, MockProvider, MockToolCall, MockTurn};
pub use session::{
    build_chain, Composed, ContextFilter, HideClass, LimitToolResults, SessionStore, TokenBudget,
};
pub use state::StateStore;
pub use tools::{fingerprint, BuiltinTool, MockToolConfig, ToolBinding, ToolOutcome, ToolRegistry};
