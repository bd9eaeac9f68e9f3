//! Evaluation: run each scenario N times and score the consistency of its
//! observable outcomes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tactus_contract::{EvaluationStage, EventPayload, EventRecord, StorageBackend};
use tactus_runtime::RunArtifacts;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::gherkin::Scenario;
use crate::runner::{ScenarioRunner, DEFAULT_WORKERS};
use crate::HarnessError;

/// Options for the `evaluate` operation.
#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    /// Runs per scenario.
    pub runs: usize,
    /// Parallel worker cap.
    pub workers: usize,
    /// Run only scenarios whose name contains this needle.
    pub scenario_filter: Option<String>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            runs: 10,
            workers: DEFAULT_WORKERS,
            scenario_filter: None,
        }
    }
}

/// Duration statistics over one scenario's runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationStats {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub stddev_ms: f64,
}

/// Aggregated evaluation of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioEvaluation {
    pub name: String,
    pub runs: usize,
    /// Fraction of runs whose assertions all passed.
    pub success_rate: f64,
    pub durations: DurationStats,
    /// Fraction of runs sharing the modal observable outcome.
    pub consistency_score: f64,
    /// Number of distinct observable outcomes seen.
    pub distinct_outcomes: usize,
}

/// Report for one `evaluate` run.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub procedure: String,
    pub scenarios: Vec<ScenarioEvaluation>,
}

impl EvaluationReport {
    /// Whether every scenario hit full success and consistency.
    pub fn is_fully_consistent(&self) -> bool {
        self.scenarios
            .iter()
            .all(|s| s.success_rate == 1.0 && s.consistency_score == 1.0)
    }
}

/// Two runs are "identical" iff their `(tool calls, finish status, final
/// state keys)` triple matches.
fn outcome_key(artifacts: &RunArtifacts) -> String {
    let tools: BTreeSet<&str> = artifacts
        .tool_calls
        .iter()
        .map(|c| c.tool_name.as_str())
        .collect();
    let state_keys: BTreeSet<&String> = artifacts.state.keys().collect();
    format!(
        "{:?}|{}|{:?}",
        tools,
        artifacts.status.as_str(),
        state_keys
    )
}

fn duration_stats(mut durations: Vec<f64>) -> DurationStats {
    if durations.is_empty() {
        return DurationStats::default();
    }
    durations.sort_by(|a, b| a.total_cmp(b));
    let n = durations.len() as f64;
    let mean = durations.iter().sum::<f64>() / n;
    let median = if durations.len() % 2 == 1 {
        durations[durations.len() / 2]
    } else {
        let hi = durations.len() / 2;
        (durations[hi - 1] + durations[hi]) / 2.0
    };
    let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    DurationStats {
        mean_ms: mean,
        median_ms: median,
        stddev_ms: variance.sqrt(),
    }
}

/// Run the `evaluate` operation over parsed scenarios.
pub(crate) async fn run_evaluate(
    runner: Arc<ScenarioRunner>,
    scenarios: Vec<Scenario>,
    options: &EvaluateOptions,
) -> Result<EvaluationReport, HarnessError> {
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
    let runs = options.runs.max(1);

    let mut evaluations = Vec::with_capacity(selected.len());
    for scenario in selected {
        let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
        let mut set = JoinSet::new();
        for _ in 0..runs {
            let runner = runner.clone();
            let scenario = scenario.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                runner.run_scenario(&scenario).await
            });
        }

        let mut successes = 0usize;
        let mut durations = Vec::with_capacity(runs);
        let mut outcomes: HashMap<String, usize> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            let run = joined.map_err(|e| HarnessError::Worker(e.to_string()))?;
            if run.result.is_passed() {
                successes += 1;
            }
            durations.push(run.result.duration_ms as f64);
            if let Some(artifacts) = &run.artifacts {
                *outcomes.entry(outcome_key(artifacts)).or_default() += 1;
                if let Some(storage) = &run.storage {
                    record_run_event(storage.as_ref(), artifacts, &scenario.name).await;
                }
            } else {
                *outcomes.entry("<no artifacts>".to_string()).or_default() += 1;
            }
        }

        let modal = outcomes.values().copied().max().unwrap_or(0);
        evaluations.push(ScenarioEvaluation {
            name: scenario.name.clone(),
            runs,
            success_rate: successes as f64 / runs as f64,
            durations: duration_stats(durations),
            consistency_score: modal as f64 / runs as f64,
            distinct_outcomes: outcomes.len(),
        });
    }

    Ok(EvaluationReport {
        procedure: runner.target.clone(),
        scenarios: evaluations,
    })
}

/// Append an `evaluation` run-completed event to the run's log.
async fn record_run_event(
    storage: &dyn tactus_contract::StorageBackend,
    artifacts: &RunArtifacts,
    scenario: &str,
) {
    // The scenario runner may have appended its own harness event after the
    // artifacts snapshot; read the real tail for a dense sequence.
    let seq = storage
        .read_events(&artifacts.invocation_id, 0)
        .await
        .ok()
        .and_then(|events| events.last().map(|e| e.seq))
        .unwrap_or(0)
        + 1;
    let event = EventRecord::new(
        artifacts.invocation_id.clone(),
        seq,
        EventPayload::Evaluation {
            scenario: scenario.to_string(),
            stage: EvaluationStage::RunCompleted,
            detail: None,
        },
    );
    if let Err(err) = storage.append_event(&artifacts.invocation_id, &event).await {
        tracing::debug!(invocation = %artifacts.invocation_id, scenario, %err, "failed to record evaluation event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_stats_mean_median_stddev() {
        let stats = duration_stats(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.mean_ms - 5.0).abs() < 1e-9);
        assert!((stats.median_ms - 4.5).abs() < 1e-9);
        assert!((stats.stddev_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_durations_are_zeroed() {
        let stats = duration_stats(Vec::new());
        assert_eq!(stats.mean_ms, 0.0);
        assert_eq!(stats.median_ms, 0.0);
        assert_eq!(stats.stddev_ms, 0.0);
    }
}
