//! Errors raised to callers of the engine and the approval gate.
//!
//! Handler failures are not in here: they are captured as Run/Event state
//! and reported through the returned status.

use thiserror::Error;
use uuid::Uuid;

use super::event_store::StoreError;
use crate::actions::ActionError;
use crate::domain::{ApprovalStatus, RunStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Pipeline '{0}' not registered")]
    NotRegistered(String),

    #[error("Pipeline '{name}' is invalid: {reason}")]
    InvalidPipeline { name: String, reason: String },

    #[error("Pipeline run {0} not found")]
    RunNotFound(Uuid),

    #[error("Pipeline run {run_id} is '{status}', cannot resume")]
    NotResumable { run_id: Uuid, status: RunStatus },

    #[error("Pipeline input must be a JSON object")]
    InvalidInput,

    #[error("Approval request {0} not found")]
    ApprovalNotFound(i64),

    #[error("Request {id} is '{actual}', expected '{expected}'")]
    InvalidApprovalState {
        id: i64,
        actual: ApprovalStatus,
        expected: ApprovalStatus,
    },

    #[error("Request {0} was already executed")]
    AlreadyExecuted(i64),

    #[error("Unknown action_type: {0}")]
    UnknownActionType(String),

    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Misconfiguration: the pipeline is unknown or its definition is invalid
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotRegistered(_) | Self::InvalidPipeline { .. })
    }

    /// Operation not allowed in the current run or request state
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::RunNotFound(_)
                | Self::NotResumable { .. }
                | Self::ApprovalNotFound(_)
                | Self::InvalidApprovalState { .. }
                | Self::AlreadyExecuted(_)
        )
    }
}
