//! Durable tool-event queue.
//!
//! The queue is a table with a status lifecycle used as a lease: claiming a
//! batch flips rows from `pending` to `summarizing` inside one transaction,
//! which is what guarantees at-most-one active claim per row. Crash recovery
//! is stall-based: a `summarizing` row older than a threshold is presumed
//! abandoned and released back to `pending` without touching its retry count.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::truncate::{self, RESPONSE_BYTE_CAP};

/// Retry budget: a row that fails this many times lands terminally in `failed`.
pub const MAX_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Summarizing,
    Completed,
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "summarizing" => Ok(Self::Summarizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Per-queue status counts for the stats surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub summarizing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A raw tool invocation captured verbatim from a hook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawToolEvent {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub tool_name: String,
    pub tool_input: String,
    pub tool_response: String,
    pub cwd: String,
    pub prompt_number: i64,
    pub project: String,
    pub status: EventStatus,
    pub retry_count: u32,
    pub created_at_epoch: i64,
    pub summarized_at_epoch: Option<i64>,
    pub observation_id: Option<i64>,
    pub error_message: Option<String>,
}

/// Insert payload for [`ToolEventQueue::insert_raw`].
#[derive(Clone, Debug, Default)]
pub struct NewToolEvent {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub tool_name: String,
    pub tool_input: String,
    pub tool_response: String,
    pub cwd: String,
    pub prompt_number: i64,
    pub project: String,
}

#[derive(Clone)]
pub struct ToolEventQueue {
    db: Database,
}

const EVENT_COLUMNS: &str = "id, session_db_id, content_session_id, tool_name, tool_input, \
     tool_response, cwd, prompt_number, project, status, retry_count, created_at_epoch, \
     summarized_at_epoch, observation_id, error_message";

impl ToolEventQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a raw event. Single transactional write, no network I/O.
    /// Oversized `tool_response` is capped with a truncation marker.
    #[instrument(skip(self, new), fields(session_db_id = new.session_db_id, tool_name = %new.tool_name))]
    pub fn insert_raw(&self, new: &NewToolEvent) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let response = truncate::truncate_response(&new.tool_response, RESPONSE_BYTE_CAP);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO raw_tool_events
                     (session_db_id, content_session_id, tool_name, tool_input, tool_response,
                      cwd, prompt_number, project, status, retry_count, created_at_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9)",
                rusqlite::params![
                    new.session_db_id,
                    new.content_session_id,
                    new.tool_name,
                    new.tool_input,
                    response,
                    new.cwd,
                    new.prompt_number,
                    new.project,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Atomically claim up to `limit` pending events, oldest first.
    /// The select and the status flip share one transaction, so two
    /// concurrent claims never return overlapping rows.
    #[instrument(skip(self))]
    pub fn claim_batch(&self, limit: u32) -> Result<Vec<RawToolEvent>, StoreError> {
        self.db.with_tx(|tx| {
            let mut events = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM raw_tool_events
                     WHERE status = 'pending'
                     ORDER BY created_at_epoch ASC, id ASC
                     LIMIT ?1"
                ))?;
                let mut rows = stmt.query([limit])?;
                let mut events = Vec::new();
                while let Some(row) = rows.next()? {
                    events.push(row_to_event(row)?);
                }
                events
            };

            for event in &mut events {
                tx.execute(
                    "UPDATE raw_tool_events SET status = 'summarizing' WHERE id = ?1",
                    [event.id],
                )?;
                event.status = EventStatus::Summarizing;
            }
            Ok(events)
        })
    }

    /// Mark an event materialized. `observation_id` 0 means the model
    /// intentionally produced no observation.
    #[instrument(skip(self))]
    pub fn mark_completed(&self, id: i64, observation_id: i64) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE raw_tool_events
                 SET status = 'completed', summarized_at_epoch = ?1, observation_id = ?2
                 WHERE id = ?3",
                rusqlite::params![now, observation_id, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("tool event {id}")));
            }
            Ok(())
        })
    }

    /// Record a processing failure. Reverts to `pending` until the retry
    /// budget is spent, then lands terminally in `failed`.
    #[instrument(skip(self, error_message))]
    pub fn mark_failed(&self, id: i64, error_message: &str) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let retry_count: u32 = tx
                .query_row(
                    "SELECT retry_count FROM raw_tool_events WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("tool event {id}"))
                    }
                    other => StoreError::Database(other),
                })?;

            let next = retry_count + 1;
            let status = if next >= MAX_RETRIES {
                EventStatus::Failed
            } else {
                EventStatus::Pending
            };
            tx.execute(
                "UPDATE raw_tool_events
                 SET status = ?1, retry_count = ?2, error_message = ?3
                 WHERE id = ?4",
                rusqlite::params![status.to_string(), next, error_message, id],
            )?;
            Ok(())
        })
    }

    /// Crash recovery: revert `summarizing` rows older than the threshold
    /// back to `pending`. Retry counts are untouched — a stalled claim is a
    /// crash, not a failure.
    #[instrument(skip(self))]
    pub fn release_stuck(&self, older_than_ms: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now().timestamp_millis() - older_than_ms;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE raw_tool_events SET status = 'pending'
                 WHERE status = 'summarizing' AND created_at_epoch <= ?1",
                [cutoff],
            )?;
            Ok(changed)
        })
    }

    /// Garbage-collect completed rows past the retention window.
    #[instrument(skip(self))]
    pub fn delete_completed(&self, older_than_epoch: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM raw_tool_events
                 WHERE status = 'completed' AND summarized_at_epoch < ?1",
                [older_than_epoch],
            )?;
            Ok(changed)
        })
    }

    /// Status counts for monitoring.
    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        self.db
            .with_conn(|conn| table_stats(conn, "raw_tool_events"))
    }

    /// Fetch a single event by id.
    pub fn get(&self, id: i64) -> Result<RawToolEvent, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM raw_tool_events WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_event(row),
                None => Err(StoreError::NotFound(format!("tool event {id}"))),
            }
        })
    }
}

pub(crate) fn table_stats(
    conn: &rusqlite::Connection,
    table: &str,
) -> Result<QueueStats, StoreError> {
    let mut stats = QueueStats::default();
    let mut stmt = conn.prepare(&format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        let count: u64 = row.get(1)?;
        match status.as_str() {
            "pending" => stats.pending = count,
            "summarizing" => stats.summarizing = count,
            "completed" => stats.completed = count,
            "failed" => stats.failed = count,
            _ => {}
        }
    }
    Ok(stats)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<RawToolEvent, StoreError> {
    let status_str: String = row_helpers::get(row, 9, "raw_tool_events", "status")?;

    Ok(RawToolEvent {
        id: row_helpers::get(row, 0, "raw_tool_events", "id")?,
        session_db_id: row_helpers::get(row, 1, "raw_tool_events", "session_db_id")?,
        content_session_id: row_helpers::get(row, 2, "raw_tool_events", "content_session_id")?,
        tool_name: row_helpers::get(row, 3, "raw_tool_events", "tool_name")?,
        tool_input: row_helpers::get(row, 4, "raw_tool_events", "tool_input")?,
        tool_response: row_helpers::get(row, 5, "raw_tool_events", "tool_response")?,
        cwd: row_helpers::get(row, 6, "raw_tool_events", "cwd")?,
        prompt_number: row_helpers::get(row, 7, "raw_tool_events", "prompt_number")?,
        project: row_helpers::get(row, 8, "raw_tool_events", "project")?,
        status: row_helpers::parse_enum(&status_str, "raw_tool_events", "status")?,
        retry_count: row_helpers::get(row, 10, "raw_tool_events", "retry_count")?,
        created_at_epoch: row_helpers::get(row, 11, "raw_tool_events", "created_at_epoch")?,
        summarized_at_epoch: row_helpers::get_opt(row, 12, "raw_tool_events", "summarized_at_epoch")?,
        observation_id: row_helpers::get_opt(row, 13, "raw_tool_events", "observation_id")?,
        error_message: row_helpers::get_opt(row, 14, "raw_tool_events", "error_message")?,
    })
}
