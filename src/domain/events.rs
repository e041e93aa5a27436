//! Per-step execution records.
//!
//! There is one Event per (run, step), not per attempt. It is created on the
//! first attempt and updated in place on every retry or resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persisted, cumulative execution record of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Row id (insertion order)
    pub id: i64,

    /// The run this event belongs to
    pub run_id: Uuid,

    pub step_name: String,

    /// Informational tag copied from the step definition
    pub step_type: String,

    /// Current status of the step
    pub status: EventStatus,

    /// Hash of the accumulated state the step ran against
    pub input_hash: String,

    /// Hash of the step output, once it produced one
    pub output_hash: Option<String>,

    /// Globally unique, derived from (run, step, input_hash)
    pub idempotency_key: String,

    /// Attempt number (1-indexed)
    pub attempt: u32,

    /// Error message from the last failed attempt
    pub error: Option<String>,

    /// Time taken by the last attempt in milliseconds
    pub duration_ms: Option<u64>,

    pub created_at: DateTime<Utc>,
}

/// Fields needed to create an Event on a step's first attempt
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub run_id: Uuid,
    pub step_name: String,
    pub step_type: String,
    pub input_hash: String,
    pub idempotency_key: String,
}

impl Event {
    /// A step whose handler must not run again for this input
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            EventStatus::Completed | EventStatus::Approved | EventStatus::Rejected
        )
    }

    /// Compact view used by status queries
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            step_name: self.step_name.clone(),
            step_type: self.step_type.clone(),
            status: self.status,
            attempt: self.attempt,
            duration_ms: self.duration_ms,
            error: self.error.clone(),
        }
    }
}

/// Per-step line in a run status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub step_name: String,
    pub step_type: String,
    pub status: EventStatus,
    pub attempt: u32,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Status of a step execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// An attempt is in flight
    Running,

    /// Last attempt failed, another one is scheduled
    Retrying,

    Completed,

    /// Attempts exhausted
    Failed,

    /// Handler asked for a human decision
    WaitingApproval,

    Approved,
    Rejected,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::WaitingApproval => "waiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: EventStatus) -> Event {
        Event {
            id: 1,
            run_id: Uuid::new_v4(),
            step_name: "summarize".to_string(),
            step_type: "deterministic".to_string(),
            status,
            input_hash: "abc".to_string(),
            output_hash: None,
            idempotency_key: "key".to_string(),
            attempt: 2,
            error: Some("Connection timeout".to_string()),
            duration_ms: Some(1500),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolved_statuses() {
        assert!(event(EventStatus::Completed).is_resolved());
        assert!(event(EventStatus::Approved).is_resolved());
        assert!(event(EventStatus::Rejected).is_resolved());
        assert!(!event(EventStatus::WaitingApproval).is_resolved());
        assert!(!event(EventStatus::Retrying).is_resolved());
        assert!(!event(EventStatus::Failed).is_resolved());
    }

    #[test]
    fn test_summary_carries_attempt_and_error() {
        let summary = event(EventStatus::Failed).summary();
        assert_eq!(summary.step_name, "summarize");
        assert_eq!(summary.attempt, 2);
        assert_eq!(summary.duration_ms, Some(1500));
        assert_eq!(summary.error.as_deref(), Some("Connection timeout"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EventStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
        assert_eq!(
            "waiting_approval".parse::<EventStatus>().unwrap(),
            EventStatus::WaitingApproval
        );
    }
}
