//! execflow - durable step pipelines with human approval gates
//!
//! Pipelines are ordered lists of code-defined steps. Every step execution
//! is recorded in SQLite under an idempotency key derived from the run, the
//! step and a hash of the accumulated state, so a failed or paused run can be
//! resumed without re-running steps that already resolved.
//!
//! # Architecture
//!
//! - A Run is created per `run` call and is never deleted (the audit trail)
//! - Each step has exactly one Event row, updated in place across attempts
//! - Steps that need sign-off pause the run on an ApprovalRequest; the
//!   approved action is executed separately, at most once
//!
//! # Modules
//!
//! - `core`: Orchestrator, EventStore, ApprovalGate, pipeline definitions
//! - `domain`: Data structures (Run, Event, ApprovalRequest)
//! - `actions`: Side effects behind approvals (create_task, add_busy_block)
//! - `pipelines`: Built-in pipelines
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! execflow run capture --input '{"text": "call the plumber"}'
//!
//! # Decide on the approval it raised, then continue
//! execflow approve 1 --execute
//! execflow resume <run-id>
//! ```

pub mod actions;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod pipelines;

// Re-export main types at crate root for convenience
pub use core::{
    ApprovalGate, EngineError, EventStore, Orchestrator, PipelineDefinition, PipelineRegistry,
    RunInfo, RunResult, StepContext, StepDefinition, StepHandler, StepResult,
};
pub use domain::{ApprovalRequest, ApprovalStatus, Event, EventStatus, Run, RunStatus, State};
