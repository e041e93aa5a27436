//! `create_task` action: insert a task row.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::ActionError;
use crate::core::event_store::format_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Inbox,
    Next,
    Waiting,
    Someday,
    Done,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Next => "NEXT",
            Self::Waiting => "WAITING",
            Self::Someday => "SOMEDAY",
            Self::Done => "DONE",
            Self::Canceled => "CANCELED",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    P1,
    P2,
    P3,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::P2
    }
}

/// `create_task` payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default = "default_estimate_min")]
    pub estimate_min: i64,

    #[serde(default)]
    pub due_date: Option<NaiveDate>,

    /// Who the task waits on (required for WAITING)
    #[serde(default)]
    pub waiting_on: Option<String>,

    /// When to follow up (required for WAITING)
    #[serde(default)]
    pub ping_at: Option<String>,

    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub area_id: Option<i64>,
}

fn default_estimate_min() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub estimate_min: i64,
    pub due_date: Option<NaiveDate>,
    pub waiting_on: Option<String>,
    pub ping_at: Option<String>,
    pub project_id: Option<i64>,
    pub area_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Validate and insert a task
pub fn create_task(conn: &Connection, new: NewTask) -> Result<Task, ActionError> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(ActionError::Validation(
            "Task title must not be empty".to_string(),
        ));
    }
    if new.estimate_min <= 0 {
        return Err(ActionError::Validation(
            "Task estimate must be > 0".to_string(),
        ));
    }

    let waiting_on = new
        .waiting_on
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string);
    if new.status == TaskStatus::Waiting && (waiting_on.is_none() || new.ping_at.is_none()) {
        return Err(ActionError::Validation(
            "WAITING task requires waiting_on and ping_at".to_string(),
        ));
    }

    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO tasks
         (title, status, priority, estimate_min, due_date, waiting_on, ping_at,
          project_id, area_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            title,
            new.status.as_str(),
            new.priority.as_str(),
            new.estimate_min,
            new.due_date.map(|d| d.to_string()),
            waiting_on,
            new.ping_at,
            new.project_id,
            new.area_id,
            format_ts(&created_at),
        ],
    )?;

    Ok(Task {
        id: conn.last_insert_rowid(),
        title,
        status: new.status,
        priority: new.priority,
        estimate_min: new.estimate_min,
        due_date: new.due_date,
        waiting_on,
        ping_at: new.ping_at,
        project_id: new.project_id,
        area_id: new.area_id,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventStore;
    use serde_json::json;

    fn new_task(value: serde_json::Value) -> NewTask {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_task_with_defaults() {
        let store = EventStore::open_in_memory().unwrap();
        let task = store
            .with_connection(|conn| create_task(conn, new_task(json!({"title": "  Call Bob  "}))))
            .unwrap();

        assert_eq!(task.title, "Call Bob");
        assert_eq!(task.status, TaskStatus::Next);
        assert_eq!(task.priority, TaskPriority::P2);

        let count: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
                    .map_err(crate::core::event_store::StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_create_task_full_payload() {
        let store = EventStore::open_in_memory().unwrap();
        let task = store
            .with_connection(|conn| {
                create_task(
                    conn,
                    new_task(json!({
                        "title": "Review contract",
                        "status": "WAITING",
                        "priority": "P1",
                        "estimate_min": 45,
                        "due_date": "2026-03-01",
                        "waiting_on": "legal",
                        "ping_at": "2026-02-20T09:00:00+00:00"
                    })),
                )
            })
            .unwrap();

        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.priority, TaskPriority::P1);
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(task.waiting_on.as_deref(), Some("legal"));
    }

    #[test]
    fn test_create_task_validation() {
        let store = EventStore::open_in_memory().unwrap();
        let cases = [
            json!({"title": "   "}),
            json!({"title": "x", "estimate_min": 0}),
            json!({"title": "x", "status": "WAITING", "waiting_on": "bob"}),
            json!({"title": "x", "status": "WAITING", "waiting_on": " ", "ping_at": "soon"}),
        ];

        for case in cases {
            let err = store
                .with_connection(|conn| create_task(conn, new_task(case.clone())))
                .unwrap_err();
            assert!(matches!(err, ActionError::Validation(_)), "case {case}");
        }
    }
}
