//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: SQLite persistence for runs, events and approvals
//! - Pipeline: step and pipeline definitions, retry policy
//! - Registry: process-wide pipeline name lookup
//! - ApprovalGate: human sign-off for side-effecting actions
//! - Orchestrator: Main execution engine

pub mod approval_gate;
pub mod error;
pub mod event_store;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;

// Re-export commonly used types
pub use approval_gate::{ApprovalGate, Decision};
pub use error::EngineError;
pub use event_store::{generate_idempotency_key, hash_input, hash_state, EventStore, StoreError};
pub use orchestrator::{Orchestrator, RunInfo, RunResult};
pub use pipeline::{
    FnHandler, PipelineDefinition, RetryPolicy, StepContext, StepDefinition, StepHandler,
    StepResult, StepType,
};
pub use registry::PipelineRegistry;
