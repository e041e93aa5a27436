//! SQLite-backed store for runs, step events and approval requests.
//!
//! One connection is the single persistence session shared by the engine,
//! the approval gate and step handlers. Every write is committed before the
//! call returns, so a resolved step is visible to any racing `resume`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ApprovalDraft, ApprovalRequest, ApprovalStatus, Event, NewEvent, Run, RunStatus, State,
};

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another writer already claimed this step execution
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Corrupt {table} row: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id TEXT PRIMARY KEY,
    pipeline_name TEXT NOT NULL,
    status TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    correlation_id TEXT NOT NULL UNIQUE,
    input_json TEXT NOT NULL,
    step_outputs_json TEXT NOT NULL,
    output_json TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipeline_runs_created ON pipeline_runs (created_at);

CREATE TABLE IF NOT EXISTS pipeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    step_type TEXT NOT NULL,
    status TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    output_hash TEXT,
    idempotency_key TEXT NOT NULL UNIQUE,
    attempt INTEGER NOT NULL,
    error TEXT,
    duration_ms INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_run ON pipeline_events (run_id, id);

CREATE TABLE IF NOT EXISTS approval_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_run_id TEXT,
    step_name TEXT,
    action_type TEXT NOT NULL,
    action_payload_json TEXT NOT NULL,
    context_json TEXT,
    status TEXT NOT NULL,
    decided_at TEXT,
    decided_by TEXT,
    executed_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_approval_requests_status
    ON approval_requests (status, created_at, id);
CREATE INDEX IF NOT EXISTS idx_approval_requests_step
    ON approval_requests (pipeline_run_id, step_name);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    estimate_min INTEGER NOT NULL CHECK (estimate_min > 0),
    due_date TEXT,
    waiting_on TEXT,
    ping_at TEXT,
    project_id INTEGER,
    area_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS busy_blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    calendar_id INTEGER NOT NULL,
    start_dt TEXT NOT NULL,
    end_dt TEXT NOT NULL,
    title TEXT,
    source TEXT NOT NULL,
    external_id TEXT
);
";

const RUN_COLUMNS: &str = "id, pipeline_name, status, input_hash, correlation_id, input_json, \
     step_outputs_json, output_json, error, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, run_id, step_name, step_type, status, input_hash, output_hash, \
     idempotency_key, attempt, error, duration_ms, created_at";

const APPROVAL_COLUMNS: &str = "id, pipeline_run_id, step_name, action_type, action_payload_json, \
     context_json, status, decided_at, decided_by, executed_at, created_at";

/// SQLite store shared by the orchestrator, the approval gate and handlers.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl EventStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    /// Open the database configured for this process
    pub fn open_default() -> anyhow::Result<Self> {
        let path = crate::config::database_path()?;
        Self::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run `f` against the shared connection.
    ///
    /// The lock is held for the duration of `f`; do not call back into the
    /// store from inside it.
    pub fn with_connection<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` in a transaction: committed on `Ok`, rolled back on `Err`.
    pub fn transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO pipeline_runs ({RUN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                run.id.to_string(),
                run.pipeline_name,
                run.status.as_str(),
                run.input_hash,
                run.correlation_id,
                serde_json::to_string(&run.input)?,
                serde_json::to_string(&run.step_outputs)?,
                run.output.as_ref().map(serde_json::to_string).transpose()?,
                run.error,
                format_ts(&run.created_at),
                format_ts(&run.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable part of a run
    pub fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pipeline_runs
             SET status = ?1, step_outputs_json = ?2, output_json = ?3, error = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                run.status.as_str(),
                serde_json::to_string(&run.step_outputs)?,
                run.output.as_ref().map(serde_json::to_string).transpose()?,
                run.error,
                format_ts(&run.updated_at),
                run.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Move a paused or failed run back to `running`.
    ///
    /// Returns false when the run is missing or another caller already
    /// claimed it.
    pub fn claim_resume(&self, run_id: Uuid, now: &DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE pipeline_runs SET status = 'running', updated_at = ?1
             WHERE id = ?2 AND status IN ('waiting_approval', 'failed')",
            params![format_ts(now), run_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = ?1"),
                params![run_id.to_string()],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::into_run).transpose()
    }

    /// Runs newest first, optionally filtered by status
    pub fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM pipeline_runs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            RawRun::from_row,
        )?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.into_run()?);
        }
        Ok(runs)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Claim a step execution by inserting its Event (status `running`,
    /// attempt 1). Fails with `DuplicateIdempotencyKey` if the key exists.
    pub fn insert_event(&self, new: &NewEvent) -> Result<Event, StoreError> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        let inserted = conn.execute(
            "INSERT INTO pipeline_events
             (run_id, step_name, step_type, status, input_hash, idempotency_key, attempt, created_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5, 1, ?6)",
            params![
                new.run_id.to_string(),
                new.step_name,
                new.step_type,
                new.input_hash,
                new.idempotency_key,
                format_ts(&created_at),
            ],
        );
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(StoreError::DuplicateIdempotencyKey(new.idempotency_key.clone()));
            }
            return Err(err.into());
        }

        Ok(Event {
            id: conn.last_insert_rowid(),
            run_id: new.run_id,
            step_name: new.step_name.clone(),
            step_type: new.step_type.clone(),
            status: crate::domain::EventStatus::Running,
            input_hash: new.input_hash.clone(),
            output_hash: None,
            idempotency_key: new.idempotency_key.clone(),
            attempt: 1,
            error: None,
            duration_ms: None,
            created_at,
        })
    }

    /// Persist the mutable part of an event
    pub fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pipeline_events
             SET status = ?1, output_hash = ?2, attempt = ?3, error = ?4, duration_ms = ?5
             WHERE id = ?6",
            params![
                event.status.as_str(),
                event.output_hash,
                event.attempt,
                event.error,
                event.duration_ms.map(|d| d as i64),
                event.id,
            ],
        )?;
        Ok(())
    }

    /// Point lookup by idempotency key
    pub fn find_event(&self, idempotency_key: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE idempotency_key = ?1"),
                params![idempotency_key],
                RawEvent::from_row,
            )
            .optional()?;
        raw.map(RawEvent::into_event).transpose()
    }

    /// All events of a run in insertion order
    pub fn events_for_run(&self, run_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE run_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![run_id.to_string()], RawEvent::from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Approval requests
    // ------------------------------------------------------------------

    pub fn insert_approval(
        &self,
        run_id: Option<Uuid>,
        step_name: Option<&str>,
        draft: &ApprovalDraft,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        insert_approval(&conn, run_id, step_name, draft)
    }

    pub fn get_approval(&self, id: i64) -> Result<Option<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        load_approval(&conn, id)
    }

    /// Pending requests, oldest first
    pub fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests
             WHERE status = 'pending'
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], RawApproval::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.into_request()?);
        }
        Ok(requests)
    }

    /// Most recent request raised by a given step of a run
    pub fn latest_approval_for_step(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approval_requests
                     WHERE pipeline_run_id = ?1 AND step_name = ?2
                     ORDER BY id DESC LIMIT 1"
                ),
                params![run_id.to_string(), step_name],
                RawApproval::from_row,
            )
            .optional()?;
        raw.map(RawApproval::into_request).transpose()
    }
}

pub(crate) fn insert_approval(
    conn: &Connection,
    run_id: Option<Uuid>,
    step_name: Option<&str>,
    draft: &ApprovalDraft,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO approval_requests
         (pipeline_run_id, step_name, action_type, action_payload_json, context_json, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
        params![
            run_id.map(|id| id.to_string()),
            step_name,
            draft.action_type,
            serde_json::to_string(&draft.payload)?,
            draft.context.as_ref().map(serde_json::to_string).transpose()?,
            format_ts(&Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn load_approval(
    conn: &Connection,
    id: i64,
) -> Result<Option<ApprovalRequest>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = ?1"),
            params![id],
            RawApproval::from_row,
        )
        .optional()?;
    raw.map(RawApproval::into_request).transpose()
}

/// Move a pending request to `status`. Returns false if it was not pending.
pub(crate) fn decide_approval(
    conn: &Connection,
    id: i64,
    status: ApprovalStatus,
    decided_by: Option<&str>,
    decided_at: &DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE approval_requests
         SET status = ?1, decided_by = ?2, decided_at = ?3
         WHERE id = ?4 AND status = 'pending'",
        params![status.as_str(), decided_by, format_ts(decided_at), id],
    )?;
    Ok(changed == 1)
}

/// Stamp an approved request as executed. Returns false if already stamped.
pub(crate) fn mark_executed(
    conn: &Connection,
    id: i64,
    executed_at: &DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE approval_requests SET executed_at = ?1
         WHERE id = ?2 AND status = 'approved' AND executed_at IS NULL",
        params![format_ts(executed_at), id],
    )?;
    Ok(changed == 1)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Timestamps are stored as RFC 3339 UTC with microseconds so that text
/// order matches time order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("bad timestamp '{raw}': {e}"),
        })
}

fn parse_uuid(table: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad uuid '{raw}': {e}"),
    })
}

fn parse_enum<T>(table: &'static str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse()
        .map_err(|detail| StoreError::Corrupt { table, detail })
}

struct RawRun {
    id: String,
    pipeline_name: String,
    status: String,
    input_hash: String,
    correlation_id: String,
    input_json: String,
    step_outputs_json: String,
    output_json: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline_name: row.get(1)?,
            status: row.get(2)?,
            input_hash: row.get(3)?,
            correlation_id: row.get(4)?,
            input_json: row.get(5)?,
            step_outputs_json: row.get(6)?,
            output_json: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        const TABLE: &str = "pipeline_runs";
        Ok(Run {
            id: parse_uuid(TABLE, &self.id)?,
            pipeline_name: self.pipeline_name,
            status: parse_enum(TABLE, &self.status)?,
            input_hash: self.input_hash,
            correlation_id: self.correlation_id,
            input: serde_json::from_str(&self.input_json)?,
            step_outputs: serde_json::from_str(&self.step_outputs_json)?,
            output: self
                .output_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error: self.error,
            created_at: parse_ts(TABLE, &self.created_at)?,
            updated_at: parse_ts(TABLE, &self.updated_at)?,
        })
    }
}

struct RawEvent {
    id: i64,
    run_id: String,
    step_name: String,
    step_type: String,
    status: String,
    input_hash: String,
    output_hash: Option<String>,
    idempotency_key: String,
    attempt: u32,
    error: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            step_name: row.get(2)?,
            step_type: row.get(3)?,
            status: row.get(4)?,
            input_hash: row.get(5)?,
            output_hash: row.get(6)?,
            idempotency_key: row.get(7)?,
            attempt: row.get(8)?,
            error: row.get(9)?,
            duration_ms: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_event(self) -> Result<Event, StoreError> {
        const TABLE: &str = "pipeline_events";
        Ok(Event {
            id: self.id,
            run_id: parse_uuid(TABLE, &self.run_id)?,
            step_name: self.step_name,
            step_type: self.step_type,
            status: parse_enum(TABLE, &self.status)?,
            input_hash: self.input_hash,
            output_hash: self.output_hash,
            idempotency_key: self.idempotency_key,
            attempt: self.attempt,
            error: self.error,
            duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
            created_at: parse_ts(TABLE, &self.created_at)?,
        })
    }
}

struct RawApproval {
    id: i64,
    pipeline_run_id: Option<String>,
    step_name: Option<String>,
    action_type: String,
    action_payload_json: String,
    context_json: Option<String>,
    status: String,
    decided_at: Option<String>,
    decided_by: Option<String>,
    executed_at: Option<String>,
    created_at: String,
}

impl RawApproval {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline_run_id: row.get(1)?,
            step_name: row.get(2)?,
            action_type: row.get(3)?,
            action_payload_json: row.get(4)?,
            context_json: row.get(5)?,
            status: row.get(6)?,
            decided_at: row.get(7)?,
            decided_by: row.get(8)?,
            executed_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_request(self) -> Result<ApprovalRequest, StoreError> {
        const TABLE: &str = "approval_requests";
        Ok(ApprovalRequest {
            id: self.id,
            action_type: self.action_type,
            action_payload: serde_json::from_str(&self.action_payload_json)?,
            context: self
                .context_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            status: parse_enum(TABLE, &self.status)?,
            pipeline_run_id: self
                .pipeline_run_id
                .as_deref()
                .map(|raw| parse_uuid(TABLE, raw))
                .transpose()?,
            step_name: self.step_name,
            decided_at: self
                .decided_at
                .as_deref()
                .map(|raw| parse_ts(TABLE, raw))
                .transpose()?,
            decided_by: self.decided_by,
            executed_at: self
                .executed_at
                .as_deref()
                .map(|raw| parse_ts(TABLE, raw))
                .transpose()?,
            created_at: parse_ts(TABLE, &self.created_at)?,
        })
    }
}

// ----------------------------------------------------------------------
// Hashing
// ----------------------------------------------------------------------

/// Generate the idempotency key for a step execution.
///
/// First 32 hex chars of SHA-256 over `"{run_id}:{step}:{input_hash}"`.
pub fn generate_idempotency_key(run_id: Uuid, step_name: &str, input_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", run_id, step_name, input_hash).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

/// Hash a state map over a key-sorted serialization, so the same content
/// always hashes the same regardless of insertion order.
pub fn hash_state(state: &State) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&CanonicalMap(state))?;
    Ok(hash_bytes(&bytes))
}

fn hash_bytes(bytes: &[u8]) -> String {
    let result = Sha256::digest(bytes);
    hex::encode(&result[..8])
}

struct CanonicalMap<'a>(&'a State);

struct CanonicalValue<'a>(&'a Value);

impl Serialize for CanonicalMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&String, &Value)> = self.0.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, &CanonicalValue(value))?;
        }
        map.end()
    }
}

impl Serialize for CanonicalValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => CanonicalMap(map).serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&CanonicalValue(item))?;
                }
                seq.end()
            }
            other => other.serialize(serializer),
        }
    }
}
