mod hitl;
mod procedures;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use tactus_contract::StorageBackend;
use tactus_harness::{EvaluateOptions, Harness, TestOptions, DEFAULT_WORKERS};
use tactus_runtime::{MockConfig, ProcedureDefinition, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "tactus", about = "Tactus, a runtime for agentic workflows", version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a procedure, streaming its events to stdout.
    Run {
        /// Procedure file.
        file: PathBuf,
        /// Parameters as key=value (repeatable).
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Run in mock mode (mock tools, HITL, and provider).
        #[arg(long)]
        mock: bool,
        /// Mock configuration JSON file (implies --mock).
        #[arg(long, value_name = "FILE")]
        mock_config: Option<PathBuf>,
        /// Storage backend. Only "memory" ships with the CLI; other
        /// backends plug in through the storage interface.
        #[arg(long, default_value = "memory")]
        storage: String,
    },
    /// Parse and statically check a procedure file.
    Validate {
        /// Procedure file.
        file: PathBuf,
    },
    /// Run the procedure's Gherkin scenarios in mock mode.
    Test {
        /// Procedure file.
        file: PathBuf,
        /// Run only scenarios whose name contains this text.
        #[arg(long)]
        scenario: Option<String>,
        /// Mock configuration JSON file.
        #[arg(long, value_name = "FILE")]
        mock_config: Option<PathBuf>,
        /// Mock mode (always on for tests; accepted for compatibility).
        #[arg(long)]
        mock: bool,
        /// Disable parallel scenario execution.
        #[arg(long)]
        no_parallel: bool,
    },
    /// Run scenarios repeatedly and score their consistency.
    Evaluate {
        /// Procedure file.
        file: PathBuf,
        /// Runs per scenario.
        #[arg(long, default_value_t = 10)]
        runs: usize,
        /// Parallel worker cap.
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
        /// Run only scenarios whose name contains this text.
        #[arg(long)]
        scenario: Option<String>,
        /// Mock mode (always on for evaluation; accepted for compatibility).
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Run {
            file,
            params,
            mock,
            mock_config,
            storage,
        } => {
            if storage != "memory" {
                return fail(&format!(
                    "unknown storage backend '{storage}' (only 'memory' ships with the CLI)"
                ));
            }
            run(&file, &params, mock, mock_config.as_deref()).await
        }
        Command::Validate { file } => validate(&file),
        Command::Test {
            file,
            scenario,
            mock_config,
            mock: _,
            no_parallel,
        } => test(&file, scenario, mock_config.as_deref(), no_parallel).await,
        Command::Evaluate {
            file,
            runs,
            workers,
            scenario,
            mock: _,
        } => evaluate(&file, runs, workers, scenario).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_definition(file: &Path) -> Result<Arc<ProcedureDefinition>, String> {
    procedures::resolve(file).ok_or_else(|| {
        let known: Vec<String> = procedures::registry()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        format!(
            "unknown procedure '{}' (built-in procedures: {})",
            file.display(),
            known.join(", ")
        )
    })
}

fn parse_params(raw: &[String]) -> Result<Map<String, Value>, String> {
    let mut params = Map::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid parameter '{entry}' (expected key=value)"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn load_mock_config(path: Option<&Path>) -> Result<MockConfig, String> {
    match path {
        None => Ok(MockConfig::new()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let doc: Value = serde_json::from_str(&text)
                .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
            MockConfig::from_json(&doc).map_err(|e| e.to_string())
        }
    }
}

async fn run(
    file: &Path,
    raw_params: &[String],
    mock: bool,
    mock_config: Option<&Path>,
) -> ExitCode {
    let (definition, params, mock_cfg) =
        match prepare_run(file, raw_params, mock, mock_config) {
            Ok(prepared) => prepared,
            Err(message) => return fail(&message),
        };

    let mut builder = Scheduler::builder();
    for other in procedures::registry() {
        builder = builder.with_definition(other);
    }
    builder = builder.with_definition(definition.clone());
    builder = match mock_cfg {
        Some(mock) => builder.with_mock(mock),
        None => builder.with_hitl(Arc::new(hitl::TerminalHitlHandler::new())),
    };
    let scheduler = builder.build();

    let handle = match scheduler.submit(&definition.name, params).await {
        Ok(handle) => handle,
        Err(err) => return fail(&format!("submission failed: {err}")),
    };
    eprintln!("running procedure '{}' as invocation {}", definition.name, handle.id());

    // Catch up from storage first, then stream; seq numbers dedupe the seam.
    let printed_seq = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let mut events = handle.subscribe();
    for event in scheduler
        .storage()
        .read_events(handle.id(), 0)
        .await
        .unwrap_or_default()
    {
        print_event_line(&event, &printed_seq);
    }
    let printer = {
        let printed_seq = printed_seq.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event_line(&event, &printed_seq);
            }
        })
    };

    let result = handle.wait_terminal().await;
    printer.abort();
    // Flush anything the printer missed.
    let missed_from = printed_seq.load(std::sync::atomic::Ordering::SeqCst);
    for event in scheduler
        .storage()
        .read_events(handle.id(), missed_from)
        .await
        .unwrap_or_default()
    {
        print_event_line(&event, &printed_seq);
    }

    match result {
        Ok(value) => {
            eprintln!("procedure completed");
            println!("{}", serde_json::json!({"result": value}));
            ExitCode::SUCCESS
        }
        Err(err) => fail(&format!("procedure failed: {err}")),
    }
}

type PreparedRun = (Arc<ProcedureDefinition>, Map<String, Value>, Option<MockConfig>);

fn prepare_run(
    file: &Path,
    raw_params: &[String],
    mock: bool,
    mock_config: Option<&Path>,
) -> Result<PreparedRun, String> {
    let definition = load_definition(file)?;
    let params = parse_params(raw_params)?;
    let mock_cfg = if mock || mock_config.is_some() {
        Some(load_mock_config(mock_config)?)
    } else {
        None
    };
    Ok((definition, params, mock_cfg))
}

fn print_event_line(
    event: &tactus_contract::EventRecord,
    printed_seq: &std::sync::atomic::AtomicU64,
) {
    use std::sync::atomic::Ordering;
    let prior = printed_seq.fetch_max(event.seq, Ordering::SeqCst);
    if event.seq <= prior {
        return;
    }
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(%err, "unprintable event"),
    }
}

fn validate(file: &Path) -> ExitCode {
    let definition = match load_definition(file) {
        Ok(definition) => definition,
        Err(message) => return fail(&message),
    };

    println!("procedure: {}", definition.definition_ref());
    if !definition.params.fields.is_empty() {
        println!("parameters:");
        for (name, field) in &definition.params.fields {
            println!(
                "  {name}{}{}",
                if field.required { " (required)" } else { "" },
                field
                    .default
                    .as_ref()
                    .map(|d| format!(" [default: {d}]"))
                    .unwrap_or_default()
            );
        }
    }
    if !definition.agents.is_empty() {
        println!("agents:");
        for (name, agent) in &definition.agents {
            println!("  {name} ({}/{})", agent.model.provider, agent.model.model);
        }
    }
    if !definition.stages.is_empty() {
        println!("stages: {}", definition.stages.join(" -> "));
    }

    match definition.specifications.as_deref() {
        None => println!("specifications: none"),
        Some(_) => match Harness::new(definition.clone()).parse() {
            Ok(document) => {
                println!(
                    "specifications: {} feature(s), {} scenario(s), {} step(s)",
                    document.features.len(),
                    document.scenarios().count(),
                    document.step_count()
                );
            }
            Err(err) => return fail(&format!("invalid specifications: {err}")),
        },
    }
    println!("ok");
    ExitCode::SUCCESS
}

async fn test(
    file: &Path,
    scenario: Option<String>,
    mock_config: Option<&Path>,
    no_parallel: bool,
) -> ExitCode {
    let definition = match load_definition(file) {
        Ok(definition) => definition,
        Err(message) => return fail(&message),
    };
    let mock = match load_mock_config(mock_config) {
        Ok(mock) => mock,
        Err(message) => return fail(&message),
    };

    let mut harness = Harness::new(definition.clone()).with_mock(mock);
    for other in procedures::registry() {
        if other.name != definition.name {
            harness = harness.with_definition(other);
        }
    }
    let options = TestOptions {
        scenario_filter: scenario,
        parallel: !no_parallel,
        workers: DEFAULT_WORKERS,
    };
    let report = match harness.test(&options).await {
        Ok(report) => report,
        Err(err) => return fail(&err.to_string()),
    };

    for scenario in &report.scenarios {
        let marker = if scenario.is_passed() { "PASS" } else { "FAIL" };
        println!("{marker} {} ({} ms)", scenario.name, scenario.duration_ms);
        for step in &scenario.passed {
            println!("  ok   {step}");
        }
        for (step, reason) in &scenario.failed {
            println!("  fail {step}: {reason}");
        }
        if let Some(error) = &scenario.error {
            println!("  error {error}");
        }
    }
    if report.all_passed() {
        println!("all scenarios passed");
        ExitCode::SUCCESS
    } else {
        fail("some scenarios failed")
    }
}

async fn evaluate(
    file: &Path,
    runs: usize,
    workers: usize,
    scenario: Option<String>,
) -> ExitCode {
    let definition = match load_definition(file) {
        Ok(definition) => definition,
        Err(message) => return fail(&message),
    };
    let mut harness = Harness::new(definition.clone());
    for other in procedures::registry() {
        if other.name != definition.name {
            harness = harness.with_definition(other);
        }
    }
    let options = EvaluateOptions {
        runs,
        workers,
        scenario_filter: scenario,
    };
    let report = match harness.evaluate(&options).await {
        Ok(report) => report,
        Err(err) => return fail(&err.to_string()),
    };

    for evaluation in &report.scenarios {
        println!(
            "{}: success {:.0}%, consistency {:.0}%, duration {:.1}ms mean / {:.1}ms median / {:.1}ms stddev ({} runs)",
            evaluation.name,
            evaluation.success_rate * 100.0,
            evaluation.consistency_score * 100.0,
            evaluation.durations.mean_ms,
            evaluation.durations.median_ms,
            evaluation.durations.stddev_ms,
            evaluation.runs,
        );
    }
    if report.is_fully_consistent() {
        ExitCode::SUCCESS
    } else {
        fail("evaluation found inconsistent or failing scenarios")
    }
}

fn fail(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::FAILURE
}
