//! Durable queue of end-of-turn summary requests.
//!
//! Same lease-as-status design as the tool-event queue, with one extra
//! invariant enforced at insert time: a session can have at most one request
//! in `{pending, summarizing}` at any moment. The check and the insert share
//! a transaction so concurrent inserts cannot both pass.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::queue::{table_stats, EventStatus, QueueStats, MAX_RETRIES};
use crate::row_helpers;

/// An end-of-turn summary request captured from a hook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawSummaryRequest {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    /// Denormalized copy; may be stale. Materialization always re-reads the
    /// authoritative session record.
    pub memory_session_id: Option<String>,
    pub project: String,
    pub user_prompt: String,
    pub last_assistant_message: String,
    pub status: EventStatus,
    pub retry_count: u32,
    pub created_at_epoch: i64,
    pub summarized_at_epoch: Option<i64>,
    pub summary_id: Option<i64>,
    pub error_message: Option<String>,
}

/// Insert payload for [`SummaryRequestQueue::insert_raw`].
#[derive(Clone, Debug, Default)]
pub struct NewSummaryRequest {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub user_prompt: String,
    pub last_assistant_message: String,
}

#[derive(Clone)]
pub struct SummaryRequestQueue {
    db: Database,
}

const REQUEST_COLUMNS: &str = "id, session_db_id, content_session_id, memory_session_id, project, \
     user_prompt, last_assistant_message, status, retry_count, created_at_epoch, \
     summarized_at_epoch, summary_id, error_message";

impl SummaryRequestQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a summary request. Rejected with `DuplicateSummaryPending` when
    /// the session already has an unfinished request.
    #[instrument(skip(self, new), fields(session_db_id = new.session_db_id))]
    pub fn insert_raw(&self, new: &NewSummaryRequest) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_tx(|tx| {
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM raw_summary_requests
                 WHERE session_db_id = ?1 AND status IN ('pending', 'summarizing')",
                [new.session_db_id],
                |row| row.get(0),
            )?;
            if active > 0 {
                return Err(StoreError::DuplicateSummaryPending(new.session_db_id));
            }

            tx.execute(
                "INSERT INTO raw_summary_requests
                     (session_db_id, content_session_id, memory_session_id, project,
                      user_prompt, last_assistant_message, status, retry_count, created_at_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7)",
                rusqlite::params![
                    new.session_db_id,
                    new.content_session_id,
                    new.memory_session_id,
                    new.project,
                    new.user_prompt,
                    new.last_assistant_message,
                    now,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Atomically claim up to `limit` pending requests, oldest first.
    #[instrument(skip(self))]
    pub fn claim_batch(&self, limit: u32) -> Result<Vec<RawSummaryRequest>, StoreError> {
        self.db.with_tx(|tx| {
            let mut requests = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM raw_summary_requests
                     WHERE status = 'pending'
                     ORDER BY created_at_epoch ASC, id ASC
                     LIMIT ?1"
                ))?;
                let mut rows = stmt.query([limit])?;
                let mut requests = Vec::new();
                while let Some(row) = rows.next()? {
                    requests.push(row_to_request(row)?);
                }
                requests
            };

            for request in &mut requests {
                tx.execute(
                    "UPDATE raw_summary_requests SET status = 'summarizing' WHERE id = ?1",
                    [request.id],
                )?;
                request.status = EventStatus::Summarizing;
            }
            Ok(requests)
        })
    }

    #[instrument(skip(self))]
    pub fn mark_completed(&self, id: i64, summary_id: i64) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE raw_summary_requests
                 SET status = 'completed', summarized_at_epoch = ?1, summary_id = ?2
                 WHERE id = ?3",
                rusqlite::params![now, summary_id, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("summary request {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, error_message))]
    pub fn mark_failed(&self, id: i64, error_message: &str) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let retry_count: u32 = tx
                .query_row(
                    "SELECT retry_count FROM raw_summary_requests WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("summary request {id}"))
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
                "UPDATE raw_summary_requests
                 SET status = ?1, retry_count = ?2, error_message = ?3
                 WHERE id = ?4",
                rusqlite::params![status.to_string(), next, error_message, id],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn release_stuck(&self, older_than_ms: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now().timestamp_millis() - older_than_ms;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE raw_summary_requests SET status = 'pending'
                 WHERE status = 'summarizing' AND created_at_epoch <= ?1",
                [cutoff],
            )?;
            Ok(changed)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_completed(&self, older_than_epoch: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM raw_summary_requests
                 WHERE status = 'completed' AND summarized_at_epoch < ?1",
                [older_than_epoch],
            )?;
            Ok(changed)
        })
    }

    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        self.db
            .with_conn(|conn| table_stats(conn, "raw_summary_requests"))
    }

    pub fn get(&self, id: i64) -> Result<RawSummaryRequest, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM raw_summary_requests WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_request(row),
                None => Err(StoreError::NotFound(format!("summary request {id}"))),
            }
        })
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> Result<RawSummaryRequest, StoreError> {
    let status_str: String = row_helpers::get(row, 7, "raw_summary_requests", "status")?;

    Ok(RawSummaryRequest {
        id: row_helpers::get(row, 0, "raw_summary_requests", "id")?,
        session_db_id: row_helpers::get(row, 1, "raw_summary_requests", "session_db_id")?,
        content_session_id: row_helpers::get(row, 2, "raw_summary_requests", "content_session_id")?,
        memory_session_id: row_helpers::get_opt(row, 3, "raw_summary_requests", "memory_session_id")?,
        project: row_helpers::get(row, 4, "raw_summary_requests", "project")?,
        user_prompt: row_helpers::get(row, 5, "raw_summary_requests", "user_prompt")?,
        last_assistant_message: row_helpers::get(row, 6, "raw_summary_requests", "last_assistant_message")?,
        status: row_helpers::parse_enum(&status_str, "raw_summary_requests", "status")?,
        retry_count: row_helpers::get(row, 8, "raw_summary_requests", "retry_count")?,
        created_at_epoch: row_helpers::get(row, 9, "raw_summary_requests", "created_at_epoch")?,
        summarized_at_epoch: row_helpers::get_opt(row, 10, "raw_summary_requests", "summarized_at_epoch")?,
        summary_id: row_helpers::get_opt(row, 11, "raw_summary_requests", "summary_id")?,
        error_message: row_helpers::get_opt(row, 12, "raw_summary_requests", "error_message")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SummaryRequestQueue {
        SummaryRequestQueue::new(Database::in_memory().unwrap())
    }

    fn sample_request(session_db_id: i64) -> NewSummaryRequest {
        NewSummaryRequest {
            session_db_id,
            content_session_id: format!("cs_{session_db_id}"),
            memory_session_id: Some(format!("mem_{session_db_id}")),
            project: "demo".into(),
            user_prompt: "fix the race".into(),
            last_assistant_message: "done".into(),
        }
    }

    #[test]
    fn insert_creates_pending_row() {
        let queue = setup();
        let id = queue.insert_raw(&sample_request(42)).unwrap();

        let request = queue.get(id).unwrap();
        assert_eq!(request.status, EventStatus::Pending);
        assert_eq!(request.retry_count, 0);
        assert_eq!(request.session_db_id, 42);
        assert_eq!(request.memory_session_id.as_deref(), Some("mem_42"));
    }

    #[test]
    fn duplicate_pending_rejected() {
        let queue = setup();
        queue.insert_raw(&sample_request(42)).unwrap();

        let err = queue.insert_raw(&sample_request(42)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSummaryPending(42)));
    }

    #[test]
    fn duplicate_while_summarizing_rejected() {
        let queue = setup();
        queue.insert_raw(&sample_request(42)).unwrap();
        queue.claim_batch(1).unwrap();

        let err = queue.insert_raw(&sample_request(42)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSummaryPending(42)));
    }

    #[test]
    fn insert_allowed_after_completion() {
        let queue = setup();
        let id = queue.insert_raw(&sample_request(42)).unwrap();
        queue.claim_batch(1).unwrap();
        queue.mark_completed(id, 9).unwrap();

        assert!(queue.insert_raw(&sample_request(42)).is_ok());
    }

    #[test]
    fn insert_allowed_after_terminal_failure() {
        let queue = setup();
        let id = queue.insert_raw(&sample_request(42)).unwrap();
        queue.claim_batch(1).unwrap();
        for _ in 0..MAX_RETRIES {
            queue.mark_failed(id, "boom").unwrap();
        }
        assert_eq!(queue.get(id).unwrap().status, EventStatus::Failed);

        assert!(queue.insert_raw(&sample_request(42)).is_ok());
    }

    #[test]
    fn other_sessions_unaffected() {
        let queue = setup();
        queue.insert_raw(&sample_request(42)).unwrap();
        assert!(queue.insert_raw(&sample_request(43)).is_ok());
    }

    #[test]
    fn mark_completed_sets_summary_id() {
        let queue = setup();
        let id = queue.insert_raw(&sample_request(1)).unwrap();
        queue.claim_batch(1).unwrap();
        queue.mark_completed(id, 5).unwrap();

        let request = queue.get(id).unwrap();
        assert_eq!(request.status, EventStatus::Completed);
        assert_eq!(request.summary_id, Some(5));
        assert!(request.summarized_at_epoch.is_some());
    }

    #[test]
    fn mark_failed_retry_budget() {
        let queue = setup();
        let id = queue.insert_raw(&sample_request(1)).unwrap();
        queue.claim_batch(1).unwrap();

        queue.mark_failed(id, "timeout").unwrap();
        assert_eq!(queue.get(id).unwrap().status, EventStatus::Pending);
        queue.claim_batch(1).unwrap();
        queue.mark_failed(id, "timeout").unwrap();
        queue.claim_batch(1).unwrap();
        queue.mark_failed(id, "timeout").unwrap();

        let request = queue.get(id).unwrap();
        assert_eq!(request.status, EventStatus::Failed);
        assert_eq!(request.retry_count, MAX_RETRIES);
    }

    #[test]
    fn release_stuck_and_stats() {
        let queue = setup();
        queue.insert_raw(&sample_request(1)).unwrap();
        queue.insert_raw(&sample_request(2)).unwrap();
        queue.claim_batch(10).unwrap();

        assert_eq!(queue.stats().unwrap().summarizing, 2);
        assert_eq!(queue.release_stuck(0).unwrap(), 2);
        assert_eq!(queue.stats().unwrap().pending, 2);
    }

    #[test]
    fn claim_processes_oldest_first() {
        let queue = setup();
        let first = queue.insert_raw(&sample_request(1)).unwrap();
        queue.insert_raw(&sample_request(2)).unwrap();

        let claimed = queue.claim_batch(1).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
    }
}
