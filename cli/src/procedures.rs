//! Built-in demo procedures.
//!
//! The script front end that compiles procedure files is an external
//! collaborator; this binary ships a small registry of native procedures so
//! every subcommand can be exercised end to end. A procedure file argument
//! resolves to a registry entry by file stem.

use std::sync::Arc;

use serde_json::{json, Value};

use tactus_contract::{AgentConfig, ModelConfig, ParamField, ParamSchema, ParamType};
use tactus_runtime::{script, HitlOptions, ProcedureDefinition, ScriptContext};

const GREETER_SPECS: &str = r#"
Feature: Greeter

  Scenario: greets and completes
    Given the name parameter is "World"
    When the procedure runs
    Then the done tool should be called
    And the procedure should complete successfully
    And iterations should be less than 5
"#;

/// One agent loops until it signals `done`, then the script returns the
/// reason as the greeting.
fn greeter() -> Arc<ProcedureDefinition> {
    let body = script(|ctx: ScriptContext| async move {
        let greeter = ctx.agent("greeter")?;
        while !ctx.tool().called("done") && !ctx.iterations().exceeded(10) {
            greeter.turn().await?;
        }
        let greeting = ctx
            .tool()
            .last_call("done")
            .and_then(|call| call.arguments.get("reason").cloned())
            .unwrap_or(Value::Null);
        Ok(json!({"completed": true, "greeting": greeting}))
    });
    ProcedureDefinition::builder("greeter", body)
        .with_params(ParamSchema::default().with_field(
            "name",
            ParamField::with_default(ParamType::String, json!("World")),
        ))
        .with_agent(
            "greeter",
            AgentConfig {
                model: ModelConfig::new("openai", "gpt-4o-mini"),
                system_prompt: "You are a friendly greeter. Greet {params.name}, then call \
                                the done tool with your greeting as the reason."
                    .into(),
                tools: vec!["done".into()],
                ..AgentConfig::default()
            },
        )
        .with_specifications(GREETER_SPECS)
        .build()
}

const TRIAGE_SPECS: &str = r#"
Feature: Ticket triage

  Scenario: auto-approves in mock mode and finishes triaged
    Given Human.approve will return true
    When the procedure runs
    Then the procedure should transition from classify to done
    And the state approved should be true
    And the procedure should complete successfully
"#;

/// Stages, state, and a human approval gate; no agents.
fn triage() -> Arc<ProcedureDefinition> {
    let body = script(|ctx: ScriptContext| async move {
        ctx.stage().set("classify").await?;
        ctx.state().set("queue", json!([])).await?;
        let approved = ctx
            .human()
            .approve(
                HitlOptions::new("Publish the triage report?")
                    .with_timeout(60.0)
                    .with_default(json!(false)),
            )
            .await?;
        ctx.state().set("approved", approved.clone()).await?;
        ctx.stage().set("done").await?;
        Ok(json!({"approved": approved}))
    });
    ProcedureDefinition::builder("triage", body)
        .with_stages(vec!["classify".into(), "done".into()])
        .with_specifications(TRIAGE_SPECS)
        .build()
}

/// All built-in demo procedures.
pub fn registry() -> Vec<Arc<ProcedureDefinition>> {
    vec![greeter(), triage()]
}

/// Resolve a procedure file argument to a registry entry by file stem.
pub fn resolve(path: &std::path::Path) -> Option<Arc<ProcedureDefinition>> {
    let stem = path.file_stem()?.to_str()?;
    registry().into_iter().find(|d| d.name == stem)
}
