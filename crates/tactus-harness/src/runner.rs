//! Scenario execution: fresh mock-mode invocation per scenario, assertion
//! evaluation, and parallel workers.

use std::sync::Arc;

use tactus_contract::{now_ms, EventPayload, EventRecord, ScenarioStage, StorageBackend};
use tactus_runtime::{MockConfig, ProcedureDefinition, RunArtifacts, Scheduler, StepCheckFn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::gherkin::Scenario;
use crate::steps::{ScenarioSetup, StepHandler, StepLibrary};
use crate::HarnessError;

/// Default parallel worker cap for scenarios and evaluation runs.
pub const DEFAULT_WORKERS: usize = 4;

/// Options for the `test` operation.
#[derive(Debug, Clone)]
pub struct TestOptions {
    /// Run only scenarios whose name contains this needle.
    pub scenario_filter: Option<String>,
    /// Run scenarios in parallel workers.
    pub parallel: bool,
    /// Worker cap when parallel.
    pub workers: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            scenario_filter: None,
            parallel: true,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    /// Step texts that passed.
    pub passed: Vec<String>,
    /// Step texts that failed, with reasons.
    pub failed: Vec<(String, String)>,
    /// Harness-level error (unmatched step, submission failure).
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    fn errored(name: &str, started: u64, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: Vec::new(),
            failed: Vec::new(),
            error: Some(error),
            duration_ms: now_ms().saturating_sub(started),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

/// Report for one `test` run over a procedure's specifications.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub procedure: String,
    pub scenarios: Vec<ScenarioResult>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioResult::is_passed)
    }
}

/// Everything needed to run one scenario in isolation.
pub(crate) struct ScenarioRunner {
    pub definitions: Vec<Arc<ProcedureDefinition>>,
    pub target: String,
    pub base_mock: MockConfig,
    pub library: StepLibrary,
}

pub(crate) struct ScenarioRun {
    pub result: ScenarioResult,
    pub artifacts: Option<RunArtifacts>,
    /// Storage of the run's scheduler, for post-hoc harness events.
    pub storage: Option<Arc<dyn tactus_contract::StorageBackend>>,
}

impl ScenarioRun {
    fn errored(result: ScenarioResult) -> Self {
        Self {
            result,
            artifacts: None,
            storage: None,
        }
    }
}

impl ScenarioRunner {
    /// Execute one scenario end to end against a fresh scheduler.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioRun {
        let started = now_ms();
        let mut setup = ScenarioSetup::new(self.base_mock.clone());
        let mut checks: Vec<(String, Arc<StepCheckFn>, Vec<String>)> = Vec::new();

        for step in &scenario.steps {
            let Some((handler, caps)) = self.library.resolve(&step.text) else {
                return ScenarioRun::errored(ScenarioResult::errored(
                    &scenario.name,
                    started,
                    format!("no step definition matches '{}'", step.text),
                ));
            };
            match handler {
                StepHandler::Setup(apply) => {
                    if let Err(reason) = apply(&mut setup, &caps) {
                        return ScenarioRun::errored(ScenarioResult::errored(
                            &scenario.name,
                            started,
                            format!("setup step '{}' failed: {reason}", step.text),
                        ));
                    }
                }
                StepHandler::Check(check) => checks.push((step.text.clone(), check, caps)),
            }
        }

        // Fresh scheduler per scenario: registries and mocks are bound to
        // this run only, so parallel scenarios cannot interfere.
        let mut builder = Scheduler::builder().with_mock(setup.mock);
        for definition in &self.definitions {
            builder = builder.with_definition(definition.clone());
        }
        let scheduler = builder.build();

        let handle = match scheduler.submit(&self.target, setup.params).await {
            Ok(handle) => handle,
            Err(err) => {
                return ScenarioRun::errored(ScenarioResult::errored(
                    &scenario.name,
                    started,
                    format!("submission failed: {err}"),
                ))
            }
        };
        // A failed invocation is not a harness error: assertions may expect
        // it. The outcome is observed through the artifacts.
        let _ = handle.wait_terminal().await;
        let Some(artifacts) = handle.artifacts() else {
            return ScenarioRun::errored(ScenarioResult::errored(
                &scenario.name,
                started,
                "invocation produced no artifacts".into(),
            ));
        };

        let mut passed = Vec::new();
        let mut failed = Vec::new();
        for (text, check, caps) in checks {
            match check(&artifacts, &caps) {
                Ok(()) => passed.push(text),
                Err(reason) => failed.push((text, reason)),
            }
        }

        let result = ScenarioResult {
            name: scenario.name.clone(),
            passed,
            failed,
            error: None,
            duration_ms: now_ms().saturating_sub(started),
        };
        record_scenario_event(&scheduler, &artifacts, &result).await;
        ScenarioRun {
            result,
            artifacts: Some(artifacts),
            storage: Some(scheduler.storage()),
        }
    }
}

/// Append the terminal `test_scenario` event to the scenario's log. The
/// invocation task has already finished, so this goes through storage.
async fn record_scenario_event(
    scheduler: &Scheduler,
    artifacts: &RunArtifacts,
    result: &ScenarioResult,
) {
    let stage = if result.is_passed() {
        ScenarioStage::Passed
    } else {
        ScenarioStage::Failed
    };
    let detail = result
        .failed
        .first()
        .map(|(text, reason)| format!("{text}: {reason}"));
    let seq = artifacts.events.last().map(|e| e.seq).unwrap_or(0) + 1;
    let event = EventRecord::new(
        artifacts.invocation_id.clone(),
        seq,
        EventPayload::TestScenario {
            scenario: result.name.clone(),
            stage,
            detail,
        },
    );
    if let Err(err) = scheduler
        .storage()
        .append_event(&artifacts.invocation_id, &event)
        .await
    {
        tracing::warn!(invocation = %artifacts.invocation_id, %err, "failed to record scenario event");
    }
}

/// Run the `test` operation over parsed scenarios.
pub(crate) async fn run_test(
    runner: Arc<ScenarioRunner>,
    scenarios: Vec<Scenario>,
    options: &TestOptions,
) -> Result<TestReport, HarnessError> {
    let selected: Vec<Scenario> = scenarios
        .into_iter()
        .filter(|s| match &options.scenario_filter {
            Some(needle) => s.name.contains(needle.as_str()),
            None => true,
        })
        .collect();
    if selected.is_empty() {
        return Err(HarnessError::NoScenarios);
    }

    let mut results: Vec<(usize, ScenarioResult)> = Vec::with_capacity(selected.len());
    if options.parallel && selected.len() > 1 {
        let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
        let mut set = JoinSet::new();
        for (idx, scenario) in selected.into_iter().enumerate() {
            let runner = runner.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                (idx, runner.run_scenario(&scenario).await.result)
            });
        }
        while let Some(joined) = set.join_next().await {
            let (idx, result) = joined.map_err(|e| HarnessError::Worker(e.to_string()))?;
            results.push((idx, result));
        }
    } else {
        for (idx, scenario) in selected.iter().enumerate() {
            results.push((idx, runner.run_scenario(scenario).await.result));
        }
    }
    results.sort_by_key(|(idx, _)| *idx);

    Ok(TestReport {
        procedure: runner.target.clone(),
        scenarios: results.into_iter().map(|(_, r)| r).collect(),
    })
}
