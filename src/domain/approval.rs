//! Approval requests queued for a human decision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A side-effecting action waiting for (or past) a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: i64,

    /// Stored as given; validated only when the action is executed
    pub action_type: String,

    pub action_payload: Value,

    /// Optional reviewer context (why the step asked)
    pub context: Option<Value>,

    pub status: ApprovalStatus,

    /// Back-reference to the run that raised the request (not ownership)
    pub pipeline_run_id: Option<Uuid>,
    pub step_name: Option<String>,

    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,

    /// Set once the approved action has been dispatched
    pub executed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// What a step handler hands to the gate when it needs approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDraft {
    pub action_type: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ApprovalDraft {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Decision state of an approval request.
///
/// Transitions exactly once: pending -> approved | rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown approval status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draft_builder() {
        let draft = ApprovalDraft::new("create_task", json!({"title": "X"}))
            .with_context(json!({"reason": "low confidence"}));

        assert_eq!(draft.action_type, "create_task");
        assert_eq!(draft.payload["title"], "X");
        assert_eq!(draft.context.unwrap()["reason"], "low confidence");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("approved".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Approved);
        assert!("executed".parse::<ApprovalStatus>().is_err());
    }
}
