//! Domain types for the execflow engine.
//!
//! This module contains the core data structures:
//! - Run: Pipeline execution state
//! - Event: Per-step execution record
//! - ApprovalRequest: Actions queued for a human decision

pub mod approval;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use approval::{ApprovalDraft, ApprovalRequest, ApprovalStatus};
pub use events::{Event, EventStatus, EventSummary, NewEvent};
pub use run::{Run, RunStatus};

/// Accumulated pipeline state: a JSON object threaded through the steps
pub type State = serde_json::Map<String, serde_json::Value>;
