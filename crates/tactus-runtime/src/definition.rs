//! Procedure definitions: the named, versioned unit the scheduler executes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tactus_contract::{AgentConfig, EvaluationConfig, ParamSchema};

use crate::bridge::ProcedureScript;
use crate::scheduler::RunArtifacts;

/// Signature of a user-defined harness step check.
///
/// Receives the run artifacts and the regex capture groups (full match
/// first); returns `Err` with a human-readable reason on failure.
pub type StepCheckFn = dyn Fn(&RunArtifacts, &[String]) -> Result<(), String> + Send + Sync;

/// A user-defined Gherkin step bundled with a procedure definition.
#[derive(Clone)]
pub struct CustomStep {
    /// Regex pattern matched against the step text.
    pub pattern: String,
    pub check: Arc<StepCheckFn>,
}

impl CustomStep {
    pub fn new(
        pattern: impl Into<String>,
        check: impl Fn(&RunArtifacts, &[String]) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            check: Arc::new(check),
        }
    }
}

/// A named, versioned procedure definition. Immutable once built.
pub struct ProcedureDefinition {
    pub name: String,
    pub version: String,
    pub params: ParamSchema,
    /// Declared agents, keyed by name.
    pub agents: BTreeMap<String, AgentConfig>,
    /// Ordered stage names (optional; empty means free-form stages).
    pub stages: Vec<String>,
    /// Names of registered native tools this procedure uses.
    pub tools: Vec<String>,
    /// Nested procedures exposed as tools: tool name → procedure name.
    pub procedure_tools: BTreeMap<String, String>,
    /// The orchestration script.
    pub script: Arc<dyn ProcedureScript>,
    /// Gherkin specifications, when present.
    pub specifications: Option<String>,
    /// User-defined harness steps.
    pub custom_steps: Vec<CustomStep>,
    /// Evaluation settings.
    pub evaluation: Option<EvaluationConfig>,
}

impl ProcedureDefinition {
    /// Start building a definition.
    pub fn builder(name: impl Into<String>, script: Arc<dyn ProcedureScript>) -> ProcedureBuilder {
        ProcedureBuilder {
            name: name.into(),
            version: "0.1.0".into(),
            params: ParamSchema::default(),
            agents: BTreeMap::new(),
            stages: Vec::new(),
            tools: Vec::new(),
            procedure_tools: BTreeMap::new(),
            script,
            specifications: None,
            custom_steps: Vec::new(),
            evaluation: None,
        }
    }

    /// `name@version` reference used in invocation records.
    pub fn definition_ref(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Builder for [`ProcedureDefinition`].
pub struct ProcedureBuilder {
    name: String,
    version: String,
    params: ParamSchema,
    agents: BTreeMap<String, AgentConfig>,
    stages: Vec<String>,
    tools: Vec<String>,
    procedure_tools: BTreeMap<String, String>,
    script: Arc<dyn ProcedureScript>,
    specifications: Option<String>,
    custom_steps: Vec<CustomStep>,
    evaluation: Option<EvaluationConfig>,
}

impl ProcedureBuilder {
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: ParamSchema) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_agent(mut self, name: impl Into<String>, config: AgentConfig) -> Self {
        self.agents.insert(name.into(), config);
        self
    }

    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    /// Expose a nested procedure as a tool under `tool_name`.
    #[must_use]
    pub fn with_procedure_tool(
        mut self,
        tool_name: impl Into<String>,
        procedure: impl Into<String>,
    ) -> Self {
        self.procedure_tools.insert(tool_name.into(), procedure.into());
        self
    }

    #[must_use]
    pub fn with_specifications(mut self, gherkin: impl Into<String>) -> Self {
        self.specifications = Some(gherkin.into());
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: CustomStep) -> Self {
        self.custom_steps.push(step);
        self
    }

    #[must_use]
    pub fn with_evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    pub fn build(self) -> Arc<ProcedureDefinition> {
        Arc::new(ProcedureDefinition {
            name: self.name,
            version: self.version,
            params: self.params,
            agents: self.agents,
            stages: self.stages,
            tools: self.tools,
            procedure_tools: self.procedure_tools,
            script: self.script,
            specifications: self.specifications,
            custom_steps: self.custom_steps,
            evaluation: self.evaluation,
        })
    }
}
