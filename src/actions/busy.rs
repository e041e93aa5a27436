//! `add_busy_block` action: reserve a slot on a calendar.

use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::ActionError;

/// `add_busy_block` payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewBusyBlock {
    pub calendar_id: i64,
    pub start_dt: DateTime<FixedOffset>,
    pub end_dt: DateTime<FixedOffset>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default)]
    pub external_id: Option<String>,
}

fn default_source() -> String {
    "manual".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct BusyBlock {
    pub id: i64,
    pub calendar_id: i64,
    pub start_dt: DateTime<FixedOffset>,
    pub end_dt: DateTime<FixedOffset>,
    pub title: Option<String>,
    pub source: String,
    pub external_id: Option<String>,
}

pub fn add_busy_block(conn: &Connection, new: NewBusyBlock) -> Result<BusyBlock, ActionError> {
    if new.end_dt <= new.start_dt {
        return Err(ActionError::Validation(format!(
            "Busy block must end after it starts ({} .. {})",
            new.start_dt, new.end_dt
        )));
    }

    conn.execute(
        "INSERT INTO busy_blocks (calendar_id, start_dt, end_dt, title, source, external_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.calendar_id,
            new.start_dt.to_rfc3339(),
            new.end_dt.to_rfc3339(),
            new.title,
            new.source,
            new.external_id,
        ],
    )?;

    Ok(BusyBlock {
        id: conn.last_insert_rowid(),
        calendar_id: new.calendar_id,
        start_dt: new.start_dt,
        end_dt: new.end_dt,
        title: new.title,
        source: new.source,
        external_id: new.external_id,
    })
}
