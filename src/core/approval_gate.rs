//! Human-in-the-loop gate for side-effecting actions.
//!
//! Requests are queued as `pending`, decided exactly once, and an approved
//! request's action is dispatched at most once: the dispatcher's writes and
//! the `executed_at` stamp commit in the same transaction.

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::EngineError;
use super::event_store::{decide_approval, load_approval, mark_executed, EventStore};
use crate::actions::{ActionKind, ActionOutcome};
use crate::domain::{ApprovalDraft, ApprovalRequest, ApprovalStatus};

/// A human decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

#[derive(Clone)]
pub struct ApprovalGate {
    store: EventStore,
    default_decider: Option<String>,
}

impl ApprovalGate {
    pub fn new(store: EventStore) -> Self {
        Self {
            store,
            default_decider: None,
        }
    }

    /// Name recorded as `decided_by` by `approve`/`reject`
    pub fn with_decider(mut self, name: impl Into<String>) -> Self {
        self.default_decider = Some(name.into());
        self
    }

    /// Queue an action for review. `action_type` is not checked here so
    /// requests for actions this build cannot execute are still kept.
    #[instrument(skip(self, draft), fields(action_type = %draft.action_type))]
    pub fn request_approval(
        &self,
        run_id: Option<Uuid>,
        step_name: Option<&str>,
        draft: &ApprovalDraft,
    ) -> Result<i64, EngineError> {
        let id = self.store.insert_approval(run_id, step_name, draft)?;
        info!(request_id = id, "Approval requested");
        Ok(id)
    }

    pub fn approve(&self, id: i64) -> Result<ApprovalRequest, EngineError> {
        self.decide(id, Decision::Approve, self.default_decider.as_deref())
    }

    pub fn reject(&self, id: i64) -> Result<ApprovalRequest, EngineError> {
        self.decide(id, Decision::Reject, self.default_decider.as_deref())
    }

    pub fn approve_as(&self, id: i64, decided_by: &str) -> Result<ApprovalRequest, EngineError> {
        self.decide(id, Decision::Approve, Some(decided_by))
    }

    pub fn reject_as(&self, id: i64, decided_by: &str) -> Result<ApprovalRequest, EngineError> {
        self.decide(id, Decision::Reject, Some(decided_by))
    }

    /// Move a pending request to approved or rejected
    #[instrument(skip(self))]
    pub fn decide(
        &self,
        id: i64,
        decision: Decision,
        decided_by: Option<&str>,
    ) -> Result<ApprovalRequest, EngineError> {
        let request = self.store.transaction(|tx| {
            let current = load_approval(tx, id)?.ok_or(EngineError::ApprovalNotFound(id))?;
            if current.status != ApprovalStatus::Pending {
                return Err(EngineError::InvalidApprovalState {
                    id,
                    actual: current.status,
                    expected: ApprovalStatus::Pending,
                });
            }

            if !decide_approval(tx, id, decision.status(), decided_by, &Utc::now())? {
                let actual = load_approval(tx, id)?
                    .map(|r| r.status)
                    .unwrap_or(current.status);
                return Err(EngineError::InvalidApprovalState {
                    id,
                    actual,
                    expected: ApprovalStatus::Pending,
                });
            }

            load_approval(tx, id)?.ok_or(EngineError::ApprovalNotFound(id))
        })?;

        info!(request_id = id, status = %request.status, "Approval decided");
        Ok(request)
    }

    pub fn get(&self, id: i64) -> Result<ApprovalRequest, EngineError> {
        self.store
            .get_approval(id)?
            .ok_or(EngineError::ApprovalNotFound(id))
    }

    /// Pending requests, oldest first
    pub fn list_pending(&self) -> Result<Vec<ApprovalRequest>, EngineError> {
        Ok(self.store.list_pending_approvals()?)
    }

    /// Latest request raised by a step of a run
    pub fn decision_for(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<ApprovalRequest>, EngineError> {
        Ok(self.store.latest_approval_for_step(run_id, step_name)?)
    }

    /// Dispatch the action of an approved request and return what it created
    #[instrument(skip(self))]
    pub fn execute_approved(&self, id: i64) -> Result<ActionOutcome, EngineError> {
        let result = self.store.transaction(|tx| {
            let request = load_approval(tx, id)?.ok_or(EngineError::ApprovalNotFound(id))?;
            if request.status != ApprovalStatus::Approved {
                return Err(EngineError::InvalidApprovalState {
                    id,
                    actual: request.status,
                    expected: ApprovalStatus::Approved,
                });
            }
            if request.executed_at.is_some() {
                return Err(EngineError::AlreadyExecuted(id));
            }

            let kind = ActionKind::from_action_type(&request.action_type)
                .ok_or_else(|| EngineError::UnknownActionType(request.action_type.clone()))?;
            let outcome = kind.dispatch(tx, &request.action_payload)?;

            if !mark_executed(tx, id, &Utc::now())? {
                return Err(EngineError::AlreadyExecuted(id));
            }
            Ok((kind, outcome))
        });

        match result {
            Ok((kind, outcome)) => {
                info!(request_id = id, action = kind.as_str(), "Approved action executed");
                Ok(outcome)
            }
            Err(e) => {
                warn!(request_id = id, error = %e, "Approved action not executed");
                Err(e)
            }
        }
    }

    /// Approve, then execute immediately
    pub fn approve_and_execute(&self, id: i64) -> Result<ActionOutcome, EngineError> {
        self.approve(id)?;
        self.execute_approved(id)
    }
}
