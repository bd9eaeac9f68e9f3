//! Step library: built-in patterns plus user-defined steps.
//!
//! `Given` steps configure the scenario (parameters, mock responses); `Then`
//! steps assert over the finished invocation's artifacts.

use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use tactus_contract::InvocationStatus;
use tactus_runtime::{MockConfig, ProcedureDefinition, RunArtifacts};

/// Mutable scenario configuration assembled by `Given` steps.
pub struct ScenarioSetup {
    pub params: Map<String, Value>,
    pub mock: MockConfig,
}

impl ScenarioSetup {
    pub fn new(base: MockConfig) -> Self {
        Self {
            params: Map::new(),
            mock: base,
        }
    }
}

type SetupFn = dyn Fn(&mut ScenarioSetup, &[String]) -> Result<(), String> + Send + Sync;
type CheckFn = dyn Fn(&RunArtifacts, &[String]) -> Result<(), String> + Send + Sync;

/// How a matched step participates in a scenario.
#[derive(Clone)]
pub enum StepHandler {
    /// Runs before the invocation (mock/parameter configuration).
    Setup(Arc<SetupFn>),
    /// Asserts over the finished invocation.
    Check(Arc<CheckFn>),
}

/// One step definition.
#[derive(Clone)]
pub struct StepDef {
    pub pattern: Regex,
    pub handler: StepHandler,
}

/// Ordered step definitions; first match wins.
#[derive(Clone, Default)]
pub struct StepLibrary {
    defs: Vec<StepDef>,
}

/// Parse a step argument: JSON when it parses, bare string otherwise.
pub fn parse_value(text: &str) -> Value {
    let trimmed = text.trim().trim_matches('"');
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn setup(
    pattern: &str,
    f: impl Fn(&mut ScenarioSetup, &[String]) -> Result<(), String> + Send + Sync + 'static,
) -> StepDef {
    StepDef {
        pattern: Regex::new(pattern).expect("invalid built-in step pattern"),
        handler: StepHandler::Setup(Arc::new(f)),
    }
}

fn check(
    pattern: &str,
    f: impl Fn(&RunArtifacts, &[String]) -> Result<(), String> + Send + Sync + 'static,
) -> StepDef {
    StepDef {
        pattern: Regex::new(pattern).expect("invalid built-in step pattern"),
        handler: StepHandler::Check(Arc::new(f)),
    }
}

/// Stop reason of a run: the `done` tool's reason, falling back to a
/// `reason` field on the result.
fn stop_reason(artifacts: &RunArtifacts) -> String {
    let from_done = artifacts
        .tool_calls
        .iter()
        .rev()
        .find(|c| c.tool_name == "done")
        .and_then(|c| c.arguments.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string);
    from_done
        .or_else(|| {
            artifacts
                .result
                .as_ref()
                .and_then(|r| r.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

impl StepLibrary {
    /// The built-in step patterns.
    pub fn builtin() -> Self {
        let defs = vec![
            // -- Given: configuration ---------------------------------------
            setup(
                r#"^the "?([\w.-]+)"? parameter is (.+)$"#,
                |scenario, caps| {
                    scenario
                        .params
                        .insert(caps[1].clone(), parse_value(&caps[2]));
                    Ok(())
                },
            ),
            setup(
                r#"^the "?([\w.-]+)"? dependency returns '(.+)'$"#,
                |scenario, caps| {
                    let response: Value = serde_json::from_str(&caps[2])
                        .map_err(|e| format!("mock response is not JSON: {e}"))?;
                    scenario.mock.tools = scenario.mock.tools.clone().with_response(&caps[1], response);
                    Ok(())
                },
            ),
            setup(
                r#"^Human\.(approve|input|review) will return (.+)$"#,
                |scenario, caps| {
                    scenario.mock.hitl = scenario
                        .mock
                        .hitl
                        .clone()
                        .with_fixed_response(parse_value(&caps[2]));
                    Ok(())
                },
            ),
            // -- When: execution marker -------------------------------------
            setup(r"^the procedure (?:runs|is run|executes)$", |_, _| Ok(())),
            // -- Then: tool calls -------------------------------------------
            check(
                r#"^the "?([\w.-]+)"? tool should be called at least (\d+) times?$"#,
                |artifacts, caps| {
                    let want: usize = caps[2].parse().map_err(|_| "bad count".to_string())?;
                    let got = artifacts
                        .tool_calls
                        .iter()
                        .filter(|c| c.tool_name == caps[1])
                        .count();
                    if got >= want {
                        Ok(())
                    } else {
                        Err(format!("tool '{}' called {got} times, wanted >= {want}", caps[1]))
                    }
                },
            ),
            check(
                r#"^the "?([\w.-]+)"? tool should be called$"#,
                |artifacts, caps| {
                    if artifacts.tool_calls.iter().any(|c| c.tool_name == caps[1]) {
                        Ok(())
                    } else {
                        Err(format!("tool '{}' was never called", caps[1]))
                    }
                },
            ),
            // -- Then: stages ------------------------------------------------
            check(
                r#"^the stage should be "?([\w.-]+)"?$"#,
                |artifacts, caps| match artifacts.stages.last() {
                    Some(stage) if *stage == caps[1] => Ok(()),
                    Some(stage) => Err(format!("stage is '{stage}', wanted '{}'", caps[1])),
                    None => Err("no stage was ever set".into()),
                },
            ),
            check(
                r#"^the procedure should transition from "?([\w.-]+)"? to "?([\w.-]+)"?$"#,
                |artifacts, caps| {
                    let found = artifacts
                        .stages
                        .windows(2)
                        .any(|pair| pair[0] == caps[1] && pair[1] == caps[2]);
                    if found {
                        Ok(())
                    } else {
                        Err(format!(
                            "no transition {} -> {} in {:?}",
                            caps[1], caps[2], artifacts.stages
                        ))
                    }
                },
            ),
            // -- Then: state -------------------------------------------------
            check(
                r#"^the state "?([\w.-]+)"? should exist$"#,
                |artifacts, caps| {
                    if artifacts.state.contains_key(&caps[1]) {
                        Ok(())
                    } else {
                        Err(format!("state key '{}' does not exist", caps[1]))
                    }
                },
            ),
            check(
                r#"^the state "?([\w.-]+)"? should be (.+)$"#,
                |artifacts, caps| {
                    let want = parse_value(&caps[2]);
                    match artifacts.state.get(&caps[1]) {
                        Some(got) if *got == want => Ok(()),
                        Some(got) => {
                            Err(format!("state '{}' is {got}, wanted {want}", caps[1]))
                        }
                        None => Err(format!("state key '{}' does not exist", caps[1])),
                    }
                },
            ),
            // -- Then: completion -------------------------------------------
            check(r"^the procedure should complete successfully$", |artifacts, _| {
                if artifacts.status == InvocationStatus::Completed {
                    Ok(())
                } else {
                    Err(format!(
                        "status is {}, error: {}",
                        artifacts.status.as_str(),
                        artifacts
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default()
                    ))
                }
            }),
            check(
                r#"^the stop reason should contain "(.+)"$"#,
                |artifacts, caps| {
                    let reason = stop_reason(artifacts);
                    if reason.contains(caps[1].as_str()) {
                        Ok(())
                    } else {
                        Err(format!("stop reason '{reason}' does not contain '{}'", caps[1]))
                    }
                },
            ),
            // -- Then: iterations -------------------------------------------
            check(
                r"^iterations should be less than (\d+)$",
                |artifacts, caps| {
                    let limit: u64 = caps[1].parse().map_err(|_| "bad limit".to_string())?;
                    if artifacts.iterations < limit {
                        Ok(())
                    } else {
                        Err(format!(
                            "{} iterations, wanted < {limit}",
                            artifacts.iterations
                        ))
                    }
                },
            ),
            check(
                r"^iterations should be between (\d+) and (\d+)$",
                |artifacts, caps| {
                    let low: u64 = caps[1].parse().map_err(|_| "bad bound".to_string())?;
                    let high: u64 = caps[2].parse().map_err(|_| "bad bound".to_string())?;
                    if (low..=high).contains(&artifacts.iterations) {
                        Ok(())
                    } else {
                        Err(format!(
                            "{} iterations, wanted {low}..={high}",
                            artifacts.iterations
                        ))
                    }
                },
            ),
            // -- Then: result -----------------------------------------------
            check(
                r#"^the result "?([\w.-]+)"? should be (.+)$"#,
                |artifacts, caps| {
                    let want = parse_value(&caps[2]);
                    let got = artifacts
                        .result
                        .as_ref()
                        .and_then(|r| r.get(&caps[1]))
                        .cloned();
                    match got {
                        Some(got) if got == want => Ok(()),
                        Some(got) => Err(format!("result '{}' is {got}, wanted {want}", caps[1])),
                        None => Err(format!("result has no field '{}'", caps[1])),
                    }
                },
            ),
        ];
        Self { defs }
    }

    /// Extend with the user steps bundled in a definition.
    #[must_use]
    pub fn with_custom_steps(mut self, definition: &ProcedureDefinition) -> Result<Self, String> {
        for custom in &definition.custom_steps {
            let pattern = Regex::new(&custom.pattern)
                .map_err(|e| format!("invalid step pattern '{}': {e}", custom.pattern))?;
            let check = custom.check.clone();
            // User steps take precedence over built-ins.
            self.defs.insert(
                0,
                StepDef {
                    pattern,
                    handler: StepHandler::Check(Arc::new(move |artifacts, caps| {
                        check(artifacts, caps)
                    })),
                },
            );
        }
        Ok(self)
    }

    /// Match a step text; returns the handler and its capture groups (full
    /// match first).
    pub fn resolve(&self, text: &str) -> Option<(StepHandler, Vec<String>)> {
        for def in &self.defs {
            if let Some(caps) = def.pattern.captures(text) {
                let groups = caps
                    .iter()
                    .map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                return Some((def.handler.clone(), groups));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> RunArtifacts {
        RunArtifacts {
            invocation_id: "inv".into(),
            status: InvocationStatus::Completed,
            result: Some(serde_json::json!({"reason": "all done"})),
            error: None,
            state: {
                let mut m = Map::new();
                m.insert("n".into(), serde_json::json!(3));
                m
            },
            tool_calls: vec![tactus_contract::ToolCallRecord {
                tool_name: "done".into(),
                arguments: serde_json::json!({"reason": "all done"}),
                result: Some(serde_json::json!({"ok": true})),
                error: None,
                timestamp_ms: 0,
                agent_name: Some("greeter".into()),
            }],
            iterations: 2,
            stages: vec!["start".into(), "done".into()],
            events: Vec::new(),
            duration_ms: 5,
        }
    }

    fn run_check(text: &str) -> Result<(), String> {
        let library = StepLibrary::builtin();
        let (handler, caps) = library.resolve(text).expect("step should match");
        match handler {
            StepHandler::Check(f) => f(&artifacts(), &caps),
            StepHandler::Setup(_) => panic!("expected a check step"),
        }
    }

    #[test]
    fn tool_call_steps_match() {
        assert!(run_check("the done tool should be called").is_ok());
        assert!(run_check("the done tool should be called at least 1 time").is_ok());
        assert!(run_check("the missing tool should be called").is_err());
    }

    #[test]
    fn stage_and_state_steps_match() {
        assert!(run_check("the stage should be done").is_ok());
        assert!(run_check("the procedure should transition from start to done").is_ok());
        assert!(run_check("the state n should be 3").is_ok());
        assert!(run_check("the state n should exist").is_ok());
        assert!(run_check("the state missing should exist").is_err());
    }

    #[test]
    fn completion_and_iteration_steps_match() {
        assert!(run_check("the procedure should complete successfully").is_ok());
        assert!(run_check(r#"the stop reason should contain "done""#).is_ok());
        assert!(run_check("iterations should be less than 5").is_ok());
        assert!(run_check("iterations should be between 1 and 3").is_ok());
        assert!(run_check("iterations should be less than 2").is_err());
    }

    #[test]
    fn given_steps_configure_the_setup() {
        let library = StepLibrary::builtin();
        let mut scenario = ScenarioSetup::new(MockConfig::new());

        let (handler, caps) = library.resolve(r#"the name parameter is "World""#).unwrap();
        match handler {
            StepHandler::Setup(f) => f(&mut scenario, &caps).unwrap(),
            StepHandler::Check(_) => panic!("expected a setup step"),
        }
        assert_eq!(scenario.params["name"], serde_json::json!("World"));

        let (handler, caps) = library
            .resolve(r#"the search dependency returns '{"hits": []}'"#)
            .unwrap();
        match handler {
            StepHandler::Setup(f) => f(&mut scenario, &caps).unwrap(),
            StepHandler::Check(_) => panic!("expected a setup step"),
        }
        assert_eq!(
            scenario.mock.tools.respond_to("search", &serde_json::json!({})),
            serde_json::json!({"hits": []})
        );
    }

    #[test]
    fn parse_value_prefers_json() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("3"), serde_json::json!(3));
        assert_eq!(parse_value("\"quoted\""), Value::String("quoted".into()));
        assert_eq!(parse_value("bare word"), Value::String("bare word".into()));
    }
}
