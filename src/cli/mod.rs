//! Command-line interface for execflow.
//!
//! Provides commands for running pipelines, checking status, listing and
//! resuming runs, and deciding on approval requests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::actions::ActionOutcome;
use crate::config;
use crate::core::{ApprovalGate, EventStore, Orchestrator, PipelineRegistry, RunResult};
use crate::domain::{ApprovalRequest, RunStatus};
use crate::pipelines;

/// execflow - durable step pipelines with human approval gates
#[derive(Parser, Debug)]
#[command(name = "execflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a registered pipeline
    Run {
        /// Pipeline name
        pipeline_name: String,

        /// Input as a JSON object
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the JSON input from a file
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Only runs in this status
        #[arg(short, long)]
        status: Option<RunStatus>,

        /// Maximum number of runs to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Resume a failed or paused run
    Resume {
        /// Run ID to resume
        run_id: String,
    },

    /// List registered pipelines
    Pipelines,

    /// List pending approval requests
    Approvals,

    /// Approve a pending request
    Approve {
        id: i64,

        /// Name recorded as the decider
        #[arg(long)]
        by: Option<String>,

        /// Execute the action right after approving
        #[arg(long)]
        execute: bool,
    },

    /// Reject a pending request
    Reject {
        id: i64,

        /// Name recorded as the decider
        #[arg(long)]
        by: Option<String>,
    },

    /// Execute the action of an approved request
    Execute { id: i64 },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                pipeline_name,
                input,
                input_file,
            } => run_pipeline(&pipeline_name, input, input_file).await,
            Commands::Status { run_id } => show_status(&run_id),
            Commands::Runs { status, limit } => list_runs(status, limit),
            Commands::Resume { run_id } => resume_run(&run_id).await,
            Commands::Pipelines => list_pipelines(),
            Commands::Approvals => list_approvals(),
            Commands::Approve { id, by, execute } => approve(id, by, execute),
            Commands::Reject { id, by } => reject(id, by),
            Commands::Execute { id } => execute_approved(id),
            Commands::Config => show_config(),
        }
    }
}

/// Open the configured store and register the built-in pipelines
fn orchestrator() -> Result<Orchestrator> {
    let cfg = config::config()?;
    let store = EventStore::open_default()?;

    let registry = Arc::new(PipelineRegistry::new());
    pipelines::register_builtin(&registry)?;

    let mut gate = ApprovalGate::new(store.clone());
    if let Some(name) = &cfg.decided_by {
        gate = gate.with_decider(name.clone());
    }

    Ok(Orchestrator::with_registry(store, registry).with_gate(gate))
}

fn parse_run_id(run_id: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id).with_context(|| format!("Invalid run ID: {}", run_id))
}

/// Parse the run input from the flag, the file, or default to `{}`
fn read_input(input: Option<String>, input_file: Option<PathBuf>) -> Result<serde_json::Value> {
    let raw = match (input, input_file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
    };

    serde_json::from_str(&raw).context("Input is not valid JSON")
}

/// Run a pipeline with the given input
async fn run_pipeline(
    pipeline_name: &str,
    input: Option<String>,
    input_file: Option<PathBuf>,
) -> Result<()> {
    let input = read_input(input, input_file)?;
    let orchestrator = orchestrator()?;
    let result = orchestrator.run(pipeline_name, input).await?;
    report_result(&result, "completed")
}

/// Resume a failed or paused run
async fn resume_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let orchestrator = orchestrator()?;
    let result = orchestrator.resume(run_id).await?;
    report_result(&result, "resumed and completed")
}

fn report_result(result: &RunResult, completed: &str) -> Result<()> {
    match result.status {
        RunStatus::Completed => {
            if let Some(output) = &result.output {
                println!("{}", serde_json::to_string_pretty(output)?);
            }
            eprintln!("\n[Run {} {} successfully]", result.run_id, completed);
        }
        RunStatus::WaitingApproval => {
            match result.pending_approval_id {
                Some(id) => eprintln!(
                    "\n[Run {} waiting for approval of request {}]",
                    result.run_id, id
                ),
                None => eprintln!("\n[Run {} waiting for approval]", result.run_id),
            }
        }
        RunStatus::Failed => {
            eprintln!(
                "\n[Run {} failed: {}]",
                result.run_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        other => {
            eprintln!("\n[Run {} in state: {}]", result.run_id, other);
        }
    }

    Ok(())
}

/// Show the status of a run
fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let info = orchestrator()?.status(run_id)?;

    println!("Run ID: {}", info.run_id);
    println!("Pipeline: {}", info.pipeline_name);
    println!("Status: {}", info.status);
    println!("Correlation: {}", info.correlation_id);
    println!("Started: {}", info.created_at);
    println!("Updated: {}", info.updated_at);
    if let Some(error) = &info.error {
        println!("Error: {}", error);
    }
    println!("\nSteps:");
    for event in &info.events {
        let duration = event
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<20} {:<17} attempt {} ({})",
            event.step_name, event.status, event.attempt, duration
        );
        if let Some(error) = &event.error {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

/// List recent runs
fn list_runs(status: Option<RunStatus>, limit: Option<usize>) -> Result<()> {
    let limit = match limit {
        Some(limit) => limit,
        None => config::config()?.list_limit,
    };
    let runs = orchestrator()?.list_runs(status, limit)?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<17} {:<25}", "RUN ID", "PIPELINE", "STATUS", "UPDATED");
    println!("{}", "-".repeat(100));

    for run in runs {
        println!(
            "{:<38} {:<20} {:<17} {:<25}",
            run.run_id,
            run.pipeline_name,
            run.status,
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn list_pipelines() -> Result<()> {
    let orchestrator = orchestrator()?;
    for name in orchestrator.registry().names() {
        let steps = orchestrator
            .registry()
            .get(&name)
            .map(|p| {
                p.steps
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            })
            .unwrap_or_default();
        println!("{:<20} {}", name, steps);
    }
    Ok(())
}

/// List pending approval requests, oldest first
fn list_approvals() -> Result<()> {
    let pending = orchestrator()?.gate().list_pending()?;

    if pending.is_empty() {
        println!("No pending approvals");
        return Ok(());
    }

    println!("{:<6} {:<16} {:<38} {:<18} PAYLOAD", "ID", "ACTION", "RUN", "STEP");
    println!("{}", "-".repeat(100));
    for request in pending {
        print_request_row(&request)?;
    }
    Ok(())
}

fn print_request_row(request: &ApprovalRequest) -> Result<()> {
    println!(
        "{:<6} {:<16} {:<38} {:<18} {}",
        request.id,
        request.action_type,
        request
            .pipeline_run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        request.step_name.as_deref().unwrap_or("-"),
        serde_json::to_string(&request.action_payload)?
    );
    Ok(())
}

fn approve(id: i64, by: Option<String>, execute: bool) -> Result<()> {
    let orchestrator = orchestrator()?;
    let gate = orchestrator.gate();

    let request = match by.as_deref() {
        Some(name) => gate.approve_as(id, name)?,
        None => gate.approve(id)?,
    };
    println!("Request {} {}", request.id, request.status);

    if execute {
        print_outcome(id, &gate.execute_approved(id)?)?;
    }
    Ok(())
}

fn reject(id: i64, by: Option<String>) -> Result<()> {
    let orchestrator = orchestrator()?;
    let gate = orchestrator.gate();

    let request = match by.as_deref() {
        Some(name) => gate.reject_as(id, name)?,
        None => gate.reject(id)?,
    };
    println!("Request {} {}", request.id, request.status);
    Ok(())
}

fn execute_approved(id: i64) -> Result<()> {
    let outcome = orchestrator()?.gate().execute_approved(id)?;
    print_outcome(id, &outcome)
}

fn print_outcome(id: i64, outcome: &ActionOutcome) -> Result<()> {
    eprintln!("[Request {} executed]", id);
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("execflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Engine:");
    println!("  List limit: {}", cfg.list_limit);
    println!("  Log filter: {}", cfg.log_filter.as_deref().unwrap_or("(default)"));
    println!();
    println!("Approvals:");
    println!("  Decided by: {}", cfg.decided_by.as_deref().unwrap_or("(unset)"));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_runs_with_status() {
        let cli = Cli::try_parse_from(["execflow", "runs", "--status", "waiting_approval", "-l", "3"])
            .unwrap();
        match cli.command {
            Commands::Runs { status, limit } => {
                assert_eq!(status, Some(RunStatus::WaitingApproval));
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_input_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "execflow", "run", "capture", "--input", "{}", "--input-file", "in.json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_read_input_sources() {
        assert_eq!(read_input(None, None).unwrap(), serde_json::json!({}));
        assert_eq!(
            read_input(Some(r#"{"text":"hi"}"#.to_string()), None).unwrap()["text"],
            "hi"
        );

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"n": 2}}"#).unwrap();
        assert_eq!(
            read_input(None, Some(file.path().to_path_buf())).unwrap()["n"],
            2
        );

        assert!(read_input(Some("not json".to_string()), None).is_err());
    }
}
