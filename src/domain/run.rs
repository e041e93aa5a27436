//! Run state for a single pipeline execution.
//!
//! A Run is created once per `run` call and mutated in place by the
//! orchestrator. Runs are never deleted; they are the audit trail.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::State;

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    /// Current status of the run
    pub status: RunStatus,

    /// Hash of the initial input
    pub input_hash: String,

    /// Opaque trace identifier, unique per run
    pub correlation_id: String,

    /// Input provided to the pipeline
    pub input: State,

    /// Cached output of every resolved step, keyed by step name
    pub step_outputs: BTreeMap<String, State>,

    /// Final accumulated state (set on completion)
    pub output: Option<State>,

    /// Last handler error (set on failure)
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a new run in the `running` state
    pub fn new(pipeline_name: String, input: State, input_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_name,
            status: RunStatus::Running,
            input_hash,
            correlation_id: Uuid::new_v4().simple().to_string(),
            input,
            step_outputs: BTreeMap::new(),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Cached output for a step, if it resolved earlier in this run
    pub fn step_output(&self, step_name: &str) -> Option<&State> {
        self.step_outputs.get(step_name)
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Only paused or failed runs can be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::WaitingApproval | Self::Failed)
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creation() {
        let run = Run::new("hello".to_string(), State::new(), "abc".to_string());

        assert_eq!(run.pipeline_name, "hello");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.correlation_id.len(), 32);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = Run::new("p".to_string(), State::new(), "h".to_string());
        let b = Run::new("p".to_string(), State::new(), "h".to_string());
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::WaitingApproval,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(RunStatus::WaitingApproval.is_resumable());
        assert!(RunStatus::Failed.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
        assert!(!RunStatus::Running.is_resumable());
    }
}
