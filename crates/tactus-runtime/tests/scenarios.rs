//! End-to-end scenarios for the procedure runtime, all in mock mode.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use tactus_contract::testing::{assert_dense_seqs, comparable_payloads};
use tactus_contract::{
    AgentConfig, ErrorKind, EventPayload, InvocationStatus, MemoryStorage, ModelConfig,
    ParamField, ParamSchema, ParamType, ScriptError, StorageBackend,
};
use tactus_runtime::{
    script, HitlOptions, MockConfig, MockHitlHandler, ProcedureDefinition, Scheduler,
    ScriptContext,
};

fn mock_agent(model: &str, system_prompt: &str, tools: &[&str]) -> AgentConfig {
    AgentConfig {
        model: ModelConfig::new("mock", model),
        system_prompt: system_prompt.into(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        ..AgentConfig::default()
    }
}

fn greeter_definition() -> Arc<ProcedureDefinition> {
    let body = script(|ctx: ScriptContext| async move {
        let greeter = ctx.agent("greeter")?;
        while !ctx.tool().called("done") {
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
        .with_agent("greeter", mock_agent("greeter-model", "Greet {params.name}.", &["done"]))
        .build()
}

fn counter_definition() -> Arc<ProcedureDefinition> {
    let body = script(|ctx: ScriptContext| async move {
        ctx.stage().set("start").await?;
        ctx.state().set("n", json!(0)).await?;
        for _ in 0..3 {
            ctx.state().incr("n", 1.0).await?;
        }
        ctx.stage().set("done").await?;
        Ok(json!({"n": ctx.state().get("n")}))
    });
    ProcedureDefinition::builder("counter", body)
        .with_stages(vec!["start".into(), "done".into()])
        .build()
}

fn mock_scheduler(definitions: &[Arc<ProcedureDefinition>]) -> Scheduler {
    let mut builder = Scheduler::builder().with_mock(MockConfig::new());
    for definition in definitions {
        builder = builder.with_definition(definition.clone());
    }
    builder.build()
}

// One agent loops until it calls `done`.
#[tokio::test]
async fn greeter_completes_after_done_tool_call() {
    let scheduler = mock_scheduler(&[greeter_definition()]);
    let handle = scheduler.submit("greeter", Map::new()).await.unwrap();
    let result = handle.wait_terminal().await.unwrap();

    assert_eq!(result["completed"], json!(true));
    assert_eq!(result["greeting"], json!("task complete"));
    assert_eq!(handle.status(), InvocationStatus::Completed);

    let artifacts = handle.artifacts().unwrap();
    assert!(!artifacts.events_of_type("agent_turn").is_empty());
    let tool_calls = artifacts.events_of_type("tool_call");
    assert_eq!(tool_calls.len(), 1);
    assert!(matches!(
        &tool_calls[0].payload,
        EventPayload::ToolCall { tool, .. } if tool == "done"
    ));
    assert_dense_seqs(&artifacts.events);
}

// Stages and state with no agents.
#[tokio::test]
async fn counter_tracks_state_and_stages() {
    let scheduler = mock_scheduler(&[counter_definition()]);
    let handle = scheduler.submit("counter", Map::new()).await.unwrap();
    let result = handle.wait_terminal().await.unwrap();

    assert_eq!(result, json!({"n": 3}));
    let artifacts = handle.artifacts().unwrap();
    assert_eq!(artifacts.stages, vec!["start", "done"]);
    assert_eq!(artifacts.state.get("n"), Some(&json!(3)));
    assert_eq!(artifacts.events_of_type("stage_change").len(), 2);
}

// A HITL timeout returns the default and leaves no resolution event.
#[tokio::test]
async fn hitl_timeout_returns_default() {
    let body = script(|ctx: ScriptContext| async move {
        let approved = ctx
            .human()
            .approve(
                HitlOptions::new("go?")
                    .with_timeout(0.2)
                    .with_default(json!(false)),
            )
            .await?;
        Ok(json!({"approved": approved}))
    });
    let definition = ProcedureDefinition::builder("gate", body).build();

    let mock = MockConfig {
        hitl: MockHitlHandler::silent(),
        ..MockConfig::new()
    };
    let scheduler = Scheduler::builder()
        .with_mock(mock)
        .with_definition(definition)
        .build();

    let handle = scheduler.submit("gate", Map::new()).await.unwrap();
    let result = handle.wait_terminal().await.unwrap();

    assert_eq!(result, json!({"approved": false}));
    let artifacts = handle.artifacts().unwrap();
    assert_eq!(artifacts.events_of_type("hitl_request").len(), 1);
    assert!(artifacts.events_of_type("hitl_resolved").is_empty());
}

// A parent spawns three children and sums their results.
#[tokio::test]
async fn parallel_children_results_are_summed() {
    let child_body = script(|ctx: ScriptContext| async move {
        let i = ctx
            .params()
            .get("i")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        Ok(json!({"value": i * 10}))
    });
    let child = ProcedureDefinition::builder("leaf", child_body)
        .with_params(ParamSchema::default().with_field("i", ParamField::required(ParamType::Number)))
        .build();

    let parent_body = script(|ctx: ScriptContext| async move {
        let procedures = ctx.procedure();
        let mut handles = Vec::new();
        for i in 1..=3 {
            handles.push(procedures.spawn("leaf", json!({"i": i})).await?);
        }
        procedures.wait_all(&handles).await?;
        let mut sum = 0i64;
        for handle in &handles {
            let result = procedures.result(handle).await?;
            sum += result["value"].as_i64().unwrap_or_default();
        }
        Ok(json!({"sum": sum}))
    });
    let parent = ProcedureDefinition::builder("fanout", parent_body).build();

    let scheduler = mock_scheduler(&[child, parent]);
    let result = scheduler.run("fanout", Map::new()).await.unwrap();
    assert_eq!(result, json!({"sum": 60}));
}

// Re-running a completed invocation replays the journal verbatim.
#[tokio::test]
async fn resume_replays_journal_and_appends_lifecycle_pair() {
    let storage = Arc::new(MemoryStorage::new());
    let scheduler = Scheduler::builder()
        .with_storage(storage.clone())
        .with_mock(MockConfig::new())
        .with_definition(counter_definition())
        .build();

    let first = scheduler
        .submit_with_id("counter", Map::new(), "inv-resume")
        .await
        .unwrap();
    let first_result = first.wait_terminal().await.unwrap();
    let before = storage.read_events("inv-resume", 0).await.unwrap();

    let second = scheduler
        .submit_with_id("counter", Map::new(), "inv-resume")
        .await
        .unwrap();
    let second_result = second.wait_terminal().await.unwrap();
    assert_eq!(first_result, second_result);

    let after = storage.read_events("inv-resume", 0).await.unwrap();
    let appended: Vec<_> = after.iter().skip(before.len()).collect();
    assert_eq!(appended.len(), 2, "resume appends exactly the lifecycle pair");
    assert!(matches!(
        &appended[0].payload,
        EventPayload::Execution { lifecycle, .. }
            if *lifecycle == tactus_contract::ExecutionLifecycle::Resumed
    ));
    assert!(matches!(
        &appended[1].payload,
        EventPayload::Execution { lifecycle, .. }
            if *lifecycle == tactus_contract::ExecutionLifecycle::Completed
    ));
    assert_dense_seqs(&after);
}

// Mock runs with identical inputs produce identical logs modulo
// timestamps.
#[tokio::test]
async fn mock_runs_are_deterministic() {
    let mut logs = Vec::new();
    for _ in 0..2 {
        let scheduler = mock_scheduler(&[greeter_definition()]);
        let handle = scheduler.submit("greeter", Map::new()).await.unwrap();
        handle.wait_terminal().await.unwrap();
        logs.push(comparable_payloads(&handle.artifacts().unwrap().events));
    }
    assert_eq!(logs[0], logs[1]);
}

// The iteration counter equals the count of responded turn events.
#[tokio::test]
async fn iterations_match_responded_events() {
    let scheduler = mock_scheduler(&[greeter_definition()]);
    let handle = scheduler.submit("greeter", Map::new()).await.unwrap();
    handle.wait_terminal().await.unwrap();

    let artifacts = handle.artifacts().unwrap();
    let responded = artifacts
        .events
        .iter()
        .filter(|e| {
            matches!(
                &e.payload,
                EventPayload::AgentTurn { stage, .. }
                    if *stage == tactus_contract::AgentTurnStage::Responded
            )
        })
        .count() as u64;
    assert_eq!(artifacts.iterations, responded);
    assert_eq!(handle.iterations(), responded);
}

// Step.run calls its body exactly once per name.
#[tokio::test]
async fn step_run_is_idempotent_per_name() {
    let body = script(|ctx: ScriptContext| async move {
        let step = ctx.step();
        let first = step.run("pick", || async { Ok(json!(41)) }).await?;
        let second = step.run("pick", || async { Ok(json!(99)) }).await?;
        Ok(json!({"first": first, "second": second}))
    });
    let definition = ProcedureDefinition::builder("steps", body).build();
    let scheduler = mock_scheduler(&[definition]);
    let result = scheduler.run("steps", Map::new()).await.unwrap();
    assert_eq!(result, json!({"first": 41, "second": 41}));
}

// Zero-turn procedures complete; nil scripts complete with a null result.
#[tokio::test]
async fn zero_turn_and_null_results_complete() {
    let body = script(|_ctx: ScriptContext| async move { Ok(Value::Null) });
    let definition = ProcedureDefinition::builder("noop", body).build();
    let scheduler = mock_scheduler(&[definition]);
    let handle = scheduler.submit("noop", Map::new()).await.unwrap();
    assert_eq!(handle.wait_terminal().await.unwrap(), Value::Null);
    assert_eq!(handle.status(), InvocationStatus::Completed);
}

// A wait with a zero timeout is a pure terminal check.
#[tokio::test]
async fn zero_timeout_wait_returns_nil_for_running_child() {
    let child_body = script(|ctx: ScriptContext| async move {
        ctx.human()
            .approve(HitlOptions::new("hold").with_timeout(0.3).with_default(json!(true)))
            .await?;
        Ok(json!("late"))
    });
    let child = ProcedureDefinition::builder("slow", child_body).build();

    let parent_body = script(|ctx: ScriptContext| async move {
        let procedures = ctx.procedure();
        let handle = procedures.spawn("slow", Value::Null).await?;
        let immediate = procedures.wait(&handle, Some(0.0)).await?;
        let settled = procedures.wait(&handle, None).await?;
        Ok(json!({"immediate": immediate, "settled": settled}))
    });
    let parent = ProcedureDefinition::builder("checker", parent_body).build();

    let mock = MockConfig {
        hitl: MockHitlHandler::silent(),
        ..MockConfig::new()
    };
    let scheduler = Scheduler::builder()
        .with_mock(mock)
        .with_definition(child)
        .with_definition(parent)
        .build();
    let result = scheduler.run("checker", Map::new()).await.unwrap();
    assert_eq!(result["immediate"], Value::Null);
    assert_eq!(result["settled"], json!("late"));
}

// Cancelling a parent drives every live descendant to `cancelled`.
#[tokio::test]
async fn cancellation_propagates_to_children() {
    let child_body = script(|ctx: ScriptContext| async move {
        ctx.human().approve(HitlOptions::new("wait forever")).await?;
        Ok(Value::Null)
    });
    let child = ProcedureDefinition::builder("pending-child", child_body).build();

    let parent_body = script(|ctx: ScriptContext| async move {
        let handle = ctx.procedure().spawn("pending-child", Value::Null).await?;
        ctx.state().set("child_id", json!(handle.id())).await?;
        ctx.human().approve(HitlOptions::new("also forever")).await?;
        Ok(Value::Null)
    });
    let parent = ProcedureDefinition::builder("pending-parent", parent_body).build();

    let mock = MockConfig {
        hitl: MockHitlHandler::silent(),
        ..MockConfig::new()
    };
    let scheduler = Scheduler::builder()
        .with_mock(mock)
        .with_definition(child)
        .with_definition(parent)
        .build();

    let handle = scheduler.submit("pending-parent", Map::new()).await.unwrap();
    // Wait until the parent has suspended on its own approval.
    while handle.status() != InvocationStatus::WaitingHuman {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    handle.cancel();
    let err = handle.wait_terminal().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(handle.status(), InvocationStatus::Cancelled);

    let child_id = handle.artifacts().unwrap().state["child_id"]
        .as_str()
        .unwrap()
        .to_string();
    let child_handle = scheduler.handle(&child_id).unwrap();
    let child_err = child_handle.wait_terminal().await.unwrap_err();
    assert_eq!(child_err.kind, ErrorKind::Cancelled);
    assert_eq!(child_handle.status(), InvocationStatus::Cancelled);
}

// Uncaught script errors terminate the invocation as `failed`.
#[tokio::test]
async fn script_errors_fail_the_invocation() {
    let body = script(|_ctx: ScriptContext| async move {
        Err::<Value, _>(ScriptError::tool("simulated tool failure"))
    });
    let definition = ProcedureDefinition::builder("broken", body).build();
    let scheduler = mock_scheduler(&[definition]);
    let handle = scheduler.submit("broken", Map::new()).await.unwrap();
    let err = handle.wait_terminal().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Tool);
    assert_eq!(handle.status(), InvocationStatus::Failed);

    let artifacts = handle.artifacts().unwrap();
    assert!(artifacts.events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Execution { lifecycle, error: Some(_) }
            if *lifecycle == tactus_contract::ExecutionLifecycle::Error
    )));
}

// Child failures re-raise at the parent with the child id attached.
#[tokio::test]
async fn child_failure_surfaces_at_wait() {
    let child_body = script(|_ctx: ScriptContext| async move {
        Err::<Value, _>(ScriptError::validation("bad child"))
    });
    let child = ProcedureDefinition::builder("failing", child_body).build();

    let parent_body = script(|ctx: ScriptContext| async move {
        ctx.procedure().run("failing", Value::Null).await
    });
    let parent = ProcedureDefinition::builder("caller", parent_body).build();

    let scheduler = mock_scheduler(&[child, parent]);
    let err = scheduler.run("caller", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.child_id.is_some());
}

// Procedure-as-tool cycles are detected and fail with `internal`.
#[tokio::test]
async fn procedure_cycles_are_detected() {
    let body = script(|ctx: ScriptContext| async move {
        ctx.procedure().run("ouroboros", Value::Null).await
    });
    let definition = ProcedureDefinition::builder("ouroboros", body).build();
    let scheduler = mock_scheduler(&[definition]);
    let err = scheduler.run("ouroboros", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(err.message.contains("cycle"));
}

// save_to followed by load_from is identity on sessions.
#[tokio::test]
async fn session_save_and_load_round_trips() {
    let body = script(|ctx: ScriptContext| async move {
        let session = ctx.session("scribe")?;
        session.inject_system("remember the context").await?;
        session.save_to("stash").await?;
        let before = session.history();
        session.clear().await?;
        assert!(session.history().is_empty());
        session.load_from("stash").await?;
        let after = session.history();
        Ok(json!({"identical": before == after, "len": after.len()}))
    });
    let definition = ProcedureDefinition::builder("scribe-proc", body)
        .with_agent("scribe", mock_agent("scribe-model", "", &[]))
        .build();
    let scheduler = mock_scheduler(&[definition]);
    let result = scheduler.run("scribe-proc", Map::new()).await.unwrap();
    assert_eq!(result, json!({"identical": true, "len": 1}));
}

// The todo builtin manipulates its queue through invocation state.
#[tokio::test]
async fn todo_builtin_manages_its_queue() {
    use tactus_runtime::{MockProvider, MockToolCall, MockTurn};

    let provider = MockProvider::new().with_turns(
        "planner-model",
        vec![
            MockTurn {
                tool_calls: vec![
                    MockToolCall {
                        name: "todo".into(),
                        arguments: json!({"action": "add", "item": "write report"}),
                    },
                    MockToolCall {
                        name: "todo".into(),
                        arguments: json!({"action": "add", "item": "send report"}),
                    },
                ],
                ..MockTurn::default()
            },
            MockTurn {
                tool_calls: vec![
                    MockToolCall {
                        name: "todo".into(),
                        arguments: json!({"action": "complete", "item": "write report"}),
                    },
                    MockToolCall {
                        name: "done".into(),
                        arguments: json!({"reason": "planned"}),
                    },
                ],
                ..MockTurn::default()
            },
        ],
    );

    let body = script(|ctx: ScriptContext| async move {
        let planner = ctx.agent("planner")?;
        while !ctx.tool().called("done") && !ctx.iterations().exceeded(5) {
            planner.turn().await?;
        }
        Ok(json!({"todos": ctx.state().get("__todos")}))
    });
    let definition = ProcedureDefinition::builder("planner-proc", body)
        .with_agent("planner", mock_agent("planner-model", "", &["todo", "done"]))
        .build();

    // A real (non-mock) tool registry with a scripted provider, so the
    // builtins execute instead of the mock lookup.
    let scheduler = Scheduler::builder()
        .with_provider(Arc::new(provider))
        .with_hitl(Arc::new(MockHitlHandler::approve()))
        .with_definition(definition)
        .build();

    let result = scheduler.run("planner-proc", Map::new()).await.unwrap();
    assert_eq!(result, json!({"todos": ["send report"]}));
}

// A resumed invocation rebuilds the todo queue from journalled outcomes.
#[tokio::test]
async fn todo_state_survives_replay() {
    use tactus_runtime::{MockProvider, MockToolCall, MockTurn};

    fn planner_turns() -> Vec<MockTurn> {
        vec![MockTurn {
            tool_calls: vec![
                MockToolCall {
                    name: "todo".into(),
                    arguments: json!({"action": "add", "item": "write report"}),
                },
                MockToolCall {
                    name: "todo".into(),
                    arguments: json!({"action": "add", "item": "send report"}),
                },
                MockToolCall {
                    name: "done".into(),
                    arguments: json!({"reason": "planned"}),
                },
            ],
            ..MockTurn::default()
        }]
    }

    fn planner_definition() -> Arc<ProcedureDefinition> {
        let body = script(|ctx: ScriptContext| async move {
            let planner = ctx.agent("planner")?;
            while !ctx.tool().called("done") && !ctx.iterations().exceeded(5) {
                planner.turn().await?;
            }
            Ok(json!({"todos": ctx.state().get("__todos")}))
        });
        ProcedureDefinition::builder("planner-proc", body)
            .with_agent("planner", mock_agent("planner-model", "", &["todo", "done"]))
            .build()
    }

    let storage = Arc::new(MemoryStorage::new());
    let scheduler = Scheduler::builder()
        .with_storage(storage.clone())
        .with_provider(Arc::new(
            MockProvider::new().with_turns("planner-model", planner_turns()),
        ))
        .with_hitl(Arc::new(MockHitlHandler::approve()))
        .with_definition(planner_definition())
        .build();
    let first = scheduler
        .submit_with_id("planner-proc", Map::new(), "inv-todo")
        .await
        .unwrap();
    let first_result = first.wait_terminal().await.unwrap();
    assert_eq!(first_result, json!({"todos": ["write report", "send report"]}));

    // Replay against the same storage: every turn and tool outcome comes
    // from the journal, and the state map must be reconstructed from them.
    let scheduler = Scheduler::builder()
        .with_storage(storage)
        .with_provider(Arc::new(
            MockProvider::new().with_turns("planner-model", planner_turns()),
        ))
        .with_hitl(Arc::new(MockHitlHandler::approve()))
        .with_definition(planner_definition())
        .build();
    let second = scheduler
        .submit_with_id("planner-proc", Map::new(), "inv-todo")
        .await
        .unwrap();
    let second_result = second.wait_terminal().await.unwrap();
    assert_eq!(second_result, first_result);
    let state = second.artifacts().unwrap().state;
    assert_eq!(state.get("__todos"), Some(&json!(["write report", "send report"])));
}

// Transient provider failures retry; fatal failures surface.
#[tokio::test]
async fn provider_errors_follow_the_retry_taxonomy() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use tactus_contract::provider::{Completion, FinishReason, ModelProvider, ProviderError};
    use tactus_contract::{SessionMessage, ToolDescriptor};

    struct FlakyProvider {
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ModelProvider for FlakyProvider {
        async fn complete(
            &self,
            config: &ModelConfig,
            _messages: &[SessionMessage],
            _tools: &[ToolDescriptor],
        ) -> Result<Completion, ProviderError> {
            if config.model == "always-fatal" {
                return Err(ProviderError::Fatal("no such model".into()));
            }
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProviderError::Retryable("rate limited".into()));
            }
            Ok(Completion {
                text: "recovered".into(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                usage: None,
            })
        }

        fn retry_policy(&self) -> tactus_contract::RetryPolicy {
            tactus_contract::RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    let body = script(|ctx: ScriptContext| async move {
        let turn = ctx.agent("worker")?.turn().await?;
        Ok(json!({"text": turn.text}))
    });
    let definition = ProcedureDefinition::builder("retrying", body)
        .with_agent("worker", mock_agent("flaky-model", "", &[]))
        .build();
    let scheduler = Scheduler::builder()
        .with_provider(Arc::new(FlakyProvider {
            attempts: AtomicU32::new(0),
        }))
        .with_hitl(Arc::new(MockHitlHandler::approve()))
        .with_definition(definition)
        .build();
    let result = scheduler.run("retrying", Map::new()).await.unwrap();
    assert_eq!(result, json!({"text": "recovered"}));

    let body = script(|ctx: ScriptContext| async move {
        let turn = ctx.agent("worker")?.turn().await?;
        Ok(json!({"text": turn.text}))
    });
    let definition = ProcedureDefinition::builder("fatal", body)
        .with_agent("worker", mock_agent("always-fatal", "", &[]))
        .build();
    let scheduler = Scheduler::builder()
        .with_provider(Arc::new(FlakyProvider {
            attempts: AtomicU32::new(0),
        }))
        .with_hitl(Arc::new(MockHitlHandler::approve()))
        .with_definition(definition)
        .build();
    let err = scheduler.run("fatal", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProviderFatal);
}

// Cost events carry the provider's reported usage.
#[tokio::test]
async fn turns_emit_cost_events() {
    let scheduler = mock_scheduler(&[greeter_definition()]);
    let handle = scheduler.submit("greeter", Map::new()).await.unwrap();
    handle.wait_terminal().await.unwrap();
    let artifacts = handle.artifacts().unwrap();
    let costs = artifacts.events_of_type("cost");
    assert_eq!(costs.len(), 1);
    assert!(matches!(
        &costs[0].payload,
        EventPayload::Cost { total_tokens: 15, .. }
    ));
}

// Unknown parameters and missing required parameters are rejected up front.
#[tokio::test]
async fn parameter_validation_rejects_bad_submissions() {
    let body = script(|_ctx: ScriptContext| async move { Ok(Value::Null) });
    let definition = ProcedureDefinition::builder("typed", body)
        .with_params(
            ParamSchema::default().with_field("count", ParamField::required(ParamType::Number)),
        )
        .build();
    let scheduler = mock_scheduler(&[definition]);

    let err = scheduler.submit("typed", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let mut params = Map::new();
    params.insert("count".into(), json!("three"));
    let err = scheduler.submit("typed", params).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}
