//! FlowRunner CLI Entry Point
//!
//! Provides command-line interface for workflow validation and execution.
//!
//! # Usage
//!
//! ```bash
//! # Check a workflow for errors and warnings
//! flowrunner validate workflow.yaml
//!
//! # Show workflow metadata and complexity
//! flowrunner info workflow.yaml
//!
//! # Execute a workflow with inputs
//! flowrunner run workflow.yaml --input name=world --env REGION=eu
//!
//! # Dry run mode (validate step configs only)
//! flowrunner run workflow.yaml --dry-run
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;

use flowrunner::execution::{ExecutionOptions, WorkflowExecutionResult, WorkflowExecutor};
use flowrunner::monitoring::{ProgressEvent, ProgressEventKind, ProgressReporter, TimelineRecorder};
use flowrunner::workflow::{FlowParser, ParseOptions, ParsedWorkflow, SubstitutionContext};
use flowrunner::{APP_NAME, VERSION};

/// What the CLI was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Validate,
    Info,
    Run,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "validate" => Some(Self::Validate),
            "info" => Some(Self::Info),
            "run" => Some(Self::Run),
            _ => None,
        }
    }
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    workflow_path: String,
    inputs: Vec<(String, Value)>,
    env: Vec<(String, String)>,
    dry_run: bool,
    continue_on_error: bool,
    strict: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("YAML Workflow Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner <COMMAND> <WORKFLOW_FILE> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  validate            Check the workflow and report errors and warnings");
    println!("  info                Show workflow metadata and complexity");
    println!("  run                 Execute the workflow");
    println!();
    println!("Options:");
    println!("  --input KEY=VALUE   Workflow input (JSON values accepted, repeatable)");
    println!("  --env KEY=VALUE     Environment variable override (repeatable)");
    println!("  --dry-run           Validate step configurations without running steps");
    println!("  --continue-on-error Keep running after a step fails");
    println!("  --strict            Fail on unresolved ${{...}} expressions");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner validate pipeline.yaml");
    println!("  flowrunner run pipeline.yaml --input name=world");
    println!("  flowrunner run pipeline.yaml --dry-run --env REGION=eu");
}

/// Splits `KEY=VALUE`.
fn key_value(option: &str, arg: Option<&String>) -> Result<(String, String), String> {
    let arg = arg.ok_or_else(|| format!("{} requires a KEY=VALUE argument", option))?;
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid {} value '{}': expected KEY=VALUE", option, arg)),
    }
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut command = None;
    let mut workflow_path = None;
    let mut config = Config {
        command: Command::Validate,
        workflow_path: String::new(),
        inputs: Vec::new(),
        env: Vec::new(),
        dry_run: false,
        continue_on_error: false,
        strict: false,
        verbose: false,
    };
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => config.dry_run = true,
            "--continue-on-error" => config.continue_on_error = true,
            "--strict" => config.strict = true,
            "--verbose" | "-v" => config.verbose = true,
            "--input" | "-i" => {
                i += 1;
                let (key, raw) = key_value(arg, args.get(i))?;
                // Numbers, booleans and JSON literals keep their type.
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                config.inputs.push((key, value));
            }
            "--env" | "-e" => {
                i += 1;
                config.env.push(key_value(arg, args.get(i))?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if command.is_none() {
                    command = Some(Command::parse(arg).ok_or_else(|| format!("Unknown command: {}", arg))?);
                } else if workflow_path.is_none() {
                    workflow_path = Some(arg.clone());
                } else {
                    return Err(format!("Unexpected argument: {}", arg));
                }
            }
        }
        i += 1;
    }

    config.command = command.ok_or("Missing command")?;
    config.workflow_path = workflow_path.ok_or("Missing workflow file")?;
    Ok(config)
}

fn print_diagnostics(parsed: &ParsedWorkflow) {
    for diagnostic in &parsed.errors {
        println!("  {} {}", "error".red().bold(), diagnostic);
    }
    for diagnostic in &parsed.warnings {
        println!("  {} {}", "warning".yellow().bold(), diagnostic);
    }
}

fn print_progress(event: &ProgressEvent) {
    let step = event.step_id.as_deref().unwrap_or_default();
    match event.kind {
        ProgressEventKind::WorkflowStarted => println!("{} {}", "▶".cyan(), event.message),
        ProgressEventKind::StepStarted => println!(
            "  {} {} ({})",
            "→".dimmed(),
            step,
            event.step_type.as_deref().unwrap_or_default()
        ),
        ProgressEventKind::StepCompleted => {
            println!("  {} {} [{:.0}%]", "✓".green(), step, event.progress)
        }
        ProgressEventKind::StepFailed => println!("  {} {}", "✗".red(), event.message),
        ProgressEventKind::WorkflowCompleted => println!("{} {}", "✓".green().bold(), event.message),
        ProgressEventKind::WorkflowFailed => println!("{} {}", "✗".red().bold(), event.message),
    }
}

fn print_summary(result: &WorkflowExecutionResult) {
    println!();
    let status = if result.cancelled {
        "CANCELLED".yellow().bold()
    } else if result.success {
        "SUCCESS".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!(
        "{} in {} ms ({} of {} steps completed, {} failed)",
        status,
        result.metadata.duration_ms,
        result.metadata.completed_steps,
        result.metadata.total_steps,
        result.metadata.failed_steps
    );
    for error in &result.errors {
        println!("  {} {}", "error".red().bold(), error);
    }
    if !result.workflow_outputs.is_empty() {
        match serde_json::to_string_pretty(&result.workflow_outputs) {
            Ok(json) => println!("\nOutputs:\n{}", json),
            Err(e) => warn!("Could not render outputs: {}", e),
        }
    }
}

/// Validates or describes a workflow, returning whether it is valid.
fn inspect(config: &Config) -> Result<bool, Box<dyn std::error::Error>> {
    let parser = FlowParser::new();
    let parsed = parser.parse_from_file(&config.workflow_path, &ParseOptions::new());
    print_diagnostics(&parsed);

    if config.command == Command::Info {
        if let Some(info) = &parsed.info {
            println!("{}", serde_json::to_string_pretty(info)?);
        }
    } else if parsed.success {
        println!(
            "{} {} is valid ({} warning(s))",
            "✓".green(),
            config.workflow_path,
            parsed.warnings.len()
        );
    }
    Ok(parsed.success)
}

/// Parses, substitutes and executes a workflow.
async fn execute(config: &Config) -> Result<bool, Box<dyn std::error::Error>> {
    let mut context = SubstitutionContext::from_process_env();
    for (key, value) in &config.env {
        context = context.with_env(key, value);
    }
    for (key, value) in &config.inputs {
        context = context.with_input(key, value.clone());
    }

    let options = ParseOptions::new().with_context(context).strict(config.strict);
    let parsed = FlowParser::new().parse_from_file(&config.workflow_path, &options);
    print_diagnostics(&parsed);
    let workflow = parsed.into_result()?;

    info!("Workflow loaded: {} top-level steps", workflow.len());
    if config.dry_run {
        println!("Mode: DRY RUN (steps will not execute)");
        println!();
    }

    let recorder = Arc::new(TimelineRecorder::new());
    let timeline = Arc::clone(&recorder);
    let mut options = ExecutionOptions::new()
        .dry_run(config.dry_run)
        .continue_on_error(config.continue_on_error)
        .on_progress(move |event: &ProgressEvent| {
            print_progress(event);
            timeline.report(event);
        });
    options.environment = config.env.iter().cloned().collect();
    options.inputs = config.inputs.iter().cloned().collect();

    let executor = WorkflowExecutor::with_builtins();
    let handle = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling after the current step");
            handle.cancel();
        }
    });

    let result = executor.execute_workflow(&workflow, options).await;

    print!("{}", recorder.timeline().gantt_chart());
    print_summary(&result);
    Ok(result.success)
}

/// Main application entry point.
async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    match config.command {
        Command::Validate | Command::Info => inspect(&config),
        Command::Run => execute(&config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
