//! Gherkin-based test and evaluation harness for Tactus procedures.
//!
//! Three operations over a procedure definition: `parse` reads the Gherkin
//! from its `specifications` block; `test` runs each scenario once in mock
//! mode and evaluates its assertion steps; `evaluate` runs each scenario N
//! times and scores success rate, duration statistics, and consistency.

pub mod evaluate;
pub mod gherkin;
pub mod runner;
pub mod steps;

use std::sync::Arc;

use thiserror::Error;

use tactus_runtime::{MockConfig, ProcedureDefinition};

pub use evaluate::{
    DurationStats, EvaluateOptions, EvaluationReport, ScenarioEvaluation,
};
pub use gherkin::{Feature, GherkinDocument, ParseError, Scenario, Step, StepKeyword};
pub use runner::{ScenarioResult, TestOptions, TestReport, DEFAULT_WORKERS};
pub use steps::{parse_value, ScenarioSetup, StepDef, StepHandler, StepLibrary};

use runner::ScenarioRunner;

/// Harness failures.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("procedure '{0}' has no specifications block")]
    NoSpecifications(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no scenarios matched")]
    NoScenarios,

    #[error("invalid custom step: {0}")]
    CustomStep(String),

    #[error("worker failed: {0}")]
    Worker(String),
}

/// Test/evaluation harness bound to one procedure under test.
pub struct Harness {
    target: Arc<ProcedureDefinition>,
    definitions: Vec<Arc<ProcedureDefinition>>,
    base_mock: MockConfig,
}

impl Harness {
    /// Create a harness for one procedure definition.
    pub fn new(definition: Arc<ProcedureDefinition>) -> Self {
        Self {
            definitions: vec![definition.clone()],
            target: definition,
            base_mock: MockConfig::new(),
        }
    }

    /// Register an additional definition (e.g. a nested procedure the target
    /// spawns).
    #[must_use]
    pub fn with_definition(mut self, definition: Arc<ProcedureDefinition>) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Use a base mock configuration (from `--mock-config`); `Given` steps
    /// layer on top of it per scenario.
    #[must_use]
    pub fn with_mock(mut self, mock: MockConfig) -> Self {
        self.base_mock = mock;
        self
    }

    /// Parse the target's Gherkin specifications.
    pub fn parse(&self) -> Result<GherkinDocument, HarnessError> {
        let text = self
            .target
            .specifications
            .as_deref()
            .ok_or_else(|| HarnessError::NoSpecifications(self.target.name.clone()))?;
        Ok(gherkin::parse(text)?)
    }

    fn scenario_runner(&self) -> Result<Arc<ScenarioRunner>, HarnessError> {
        let library = StepLibrary::builtin()
            .with_custom_steps(&self.target)
            .map_err(HarnessError::CustomStep)?;
        Ok(Arc::new(ScenarioRunner {
            definitions: self.definitions.clone(),
            target: self.target.name.clone(),
            base_mock: self.base_mock.clone(),
            library,
        }))
    }

    /// Run every (matching) scenario once and evaluate its assertions.
    pub async fn test(&self, options: &TestOptions) -> Result<TestReport, HarnessError> {
        let document = self.parse()?;
        let scenarios: Vec<Scenario> = document.scenarios().cloned().collect();
        runner::run_test(self.scenario_runner()?, scenarios, options).await
    }

    /// Run every (matching) scenario N times and score consistency.
    pub async fn evaluate(
        &self,
        options: &EvaluateOptions,
    ) -> Result<EvaluationReport, HarnessError> {
        let document = self.parse()?;
        let scenarios: Vec<Scenario> = document.scenarios().cloned().collect();
        evaluate::run_evaluate(self.scenario_runner()?, scenarios, options).await
    }
}
