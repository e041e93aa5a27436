//! Side-effecting actions the approval gate can execute.
//!
//! The set of actions is closed: each `ActionKind` variant owns a typed
//! payload and exactly one dispatcher. Adding an action means adding a
//! variant; the `match` in `dispatch` keeps the table exhaustive.

pub mod busy;
pub mod tasks;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::event_store::StoreError;

pub use busy::{BusyBlock, NewBusyBlock};
pub use tasks::{NewTask, Task, TaskPriority, TaskStatus};

/// Errors raised while executing an approved action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Invalid {action} payload: {source}")]
    InvalidPayload {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for ActionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.into())
    }
}

/// Kinds of action that can sit behind an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    AddBusyBlock,
}

impl ActionKind {
    pub const ALL: [ActionKind; 2] = [ActionKind::CreateTask, ActionKind::AddBusyBlock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::AddBusyBlock => "add_busy_block",
        }
    }

    /// Resolve a stored `action_type` string
    pub fn from_action_type(action_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == action_type)
    }

    /// Perform the action's side effect on `conn`
    pub fn dispatch(&self, conn: &Connection, payload: &Value) -> Result<ActionOutcome, ActionError> {
        match self {
            Self::CreateTask => {
                let new_task: NewTask = parse_payload(*self, payload)?;
                tasks::create_task(conn, new_task).map(ActionOutcome::Task)
            }
            Self::AddBusyBlock => {
                let new_block: NewBusyBlock = parse_payload(*self, payload)?;
                busy::add_busy_block(conn, new_block).map(ActionOutcome::BusyBlock)
            }
        }
    }
}

/// The resource an executed action created
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    Task(Task),
    BusyBlock(BusyBlock),
}

fn parse_payload<T: DeserializeOwned>(kind: ActionKind, payload: &Value) -> Result<T, ActionError> {
    T::deserialize(payload).map_err(|source| ActionError::InvalidPayload {
        action: kind.as_str(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventStore;
    use serde_json::json;

    #[test]
    fn test_action_type_lookup() {
        assert_eq!(ActionKind::from_action_type("create_task"), Some(ActionKind::CreateTask));
        assert_eq!(
            ActionKind::from_action_type("add_busy_block"),
            Some(ActionKind::AddBusyBlock)
        );
        assert_eq!(ActionKind::from_action_type("send_email"), None);
    }

    #[test]
    fn test_dispatch_create_task() {
        let store = EventStore::open_in_memory().unwrap();
        let outcome = store
            .with_connection(|conn| ActionKind::CreateTask.dispatch(conn, &json!({"title": "X"})))
            .unwrap();

        match outcome {
            ActionOutcome::Task(task) => {
                assert_eq!(task.title, "X");
                assert_eq!(task.status, TaskStatus::Next);
                assert_eq!(task.priority, TaskPriority::P2);
                assert_eq!(task.estimate_min, 30);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_rejects_bad_payload() {
        let store = EventStore::open_in_memory().unwrap();
        let err = store
            .with_connection(|conn| ActionKind::CreateTask.dispatch(conn, &json!({"nope": 1})))
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidPayload { action: "create_task", .. }));
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let store = EventStore::open_in_memory().unwrap();
        let outcome = store
            .with_connection(|conn| ActionKind::CreateTask.dispatch(conn, &json!({"title": "Tag"})))
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "task");
        assert_eq!(json["title"], "Tag");
    }
}
