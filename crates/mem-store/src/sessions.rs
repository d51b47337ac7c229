//! Session store: session records plus materialized observations and
//! session summaries. This is the surface the workers persist into; queue
//! rows only ever link to it by id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mem_core::observation::{Observation, SessionSummary};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A registered content session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub created_at_epoch: i64,
}

/// Ids assigned by [`SessionStore::store_observations`], in input order.
#[derive(Clone, Debug, Default)]
pub struct StoredIds {
    pub observation_ids: Vec<i64>,
    pub summary_id: Option<i64>,
}

/// A recent observation used as advisory prompt context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecentObservation {
    pub kind: String,
    pub text: String,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get-or-create a session for a content session id. A fresh session is
    /// assigned a memory session id; re-registration returns the existing row.
    #[instrument(skip(self), fields(content_session_id = %content_session_id))]
    pub fn init_session(
        &self,
        content_session_id: &str,
        project: &str,
    ) -> Result<SessionRecord, StoreError> {
        let now = Utc::now().timestamp_millis();
        let memory_session_id = uuid::Uuid::now_v7().to_string();

        self.db.with_tx(|tx| {
            if let Some(existing) = {
                let mut stmt = tx.prepare(
                    "SELECT session_db_id, content_session_id, memory_session_id, project, created_at_epoch
                     FROM sessions WHERE content_session_id = ?1",
                )?;
                let mut rows = stmt.query([content_session_id])?;
                match rows.next()? {
                    Some(row) => Some(row_to_session(row)?),
                    None => None,
                }
            } {
                return Ok(existing);
            }

            tx.execute(
                "INSERT INTO sessions (content_session_id, memory_session_id, project, created_at_epoch)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![content_session_id, memory_session_id, project, now],
            )?;

            Ok(SessionRecord {
                session_db_id: tx.last_insert_rowid(),
                content_session_id: content_session_id.to_string(),
                memory_session_id: Some(memory_session_id.clone()),
                project: project.to_string(),
                created_at_epoch: now,
            })
        })
    }

    /// Fetch the authoritative session record.
    #[instrument(skip(self))]
    pub fn get(&self, session_db_id: i64) -> Result<SessionRecord, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_db_id, content_session_id, memory_session_id, project, created_at_epoch
                 FROM sessions WHERE session_db_id = ?1",
            )?;
            let mut rows = stmt.query([session_db_id])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {session_db_id}"))),
            }
        })
    }

    /// Persist observations (and optionally a summary) in one transaction.
    /// Returned observation ids preserve input order.
    #[instrument(skip(self, observations, summary), fields(memory_session_id = %memory_session_id, count = observations.len()))]
    pub fn store_observations(
        &self,
        memory_session_id: &str,
        project: &str,
        observations: &[Observation],
        summary: Option<&SessionSummary>,
        prompt_number: i64,
        discovery_tokens: u64,
    ) -> Result<StoredIds, StoreError> {
        let now = Utc::now().timestamp_millis();

        self.db.with_tx(|tx| {
            let mut stored = StoredIds::default();

            for obs in observations {
                tx.execute(
                    "INSERT INTO observations
                         (memory_session_id, project, kind, title, subtitle, facts, narrative,
                          concepts, files_read, files_modified, prompt_number, discovery_tokens,
                          created_at_epoch)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    rusqlite::params![
                        memory_session_id,
                        project,
                        obs.kind,
                        obs.title,
                        obs.subtitle,
                        serde_json::to_string(&obs.facts)?,
                        obs.narrative,
                        serde_json::to_string(&obs.concepts)?,
                        serde_json::to_string(&obs.files_read)?,
                        serde_json::to_string(&obs.files_modified)?,
                        prompt_number,
                        discovery_tokens as i64,
                        now,
                    ],
                )?;
                stored.observation_ids.push(tx.last_insert_rowid());
            }

            if let Some(summary) = summary {
                tx.execute(
                    "INSERT INTO session_summaries
                         (memory_session_id, project, request, investigated, learned, completed,
                          next_steps, notes, prompt_number, discovery_tokens, created_at_epoch)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        memory_session_id,
                        project,
                        summary.request,
                        summary.investigated,
                        summary.learned,
                        summary.completed,
                        summary.next_steps,
                        summary.notes,
                        prompt_number,
                        discovery_tokens as i64,
                        now,
                    ],
                )?;
                stored.summary_id = Some(tx.last_insert_rowid());
            }

            Ok(stored)
        })
    }

    /// Most recent observations for a project, newest first. Advisory prompt
    /// context only.
    #[instrument(skip(self))]
    pub fn get_recent_observations(
        &self,
        project: &str,
        limit: u32,
    ) -> Result<Vec<RecentObservation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, title, narrative FROM observations
                 WHERE project = ?1
                 ORDER BY created_at_epoch DESC, id DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![project, limit])?;
            let mut recent = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row_helpers::get(row, 0, "observations", "kind")?;
                let title: String = row_helpers::get(row, 1, "observations", "title")?;
                let narrative: Option<String> =
                    row_helpers::get_opt(row, 2, "observations", "narrative")?;
                let text = match narrative {
                    Some(n) => format!("{title}: {n}"),
                    None => title,
                };
                recent.push(RecentObservation { kind, text });
            }
            Ok(recent)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    Ok(SessionRecord {
        session_db_id: row_helpers::get(row, 0, "sessions", "session_db_id")?,
        content_session_id: row_helpers::get(row, 1, "sessions", "content_session_id")?,
        memory_session_id: row_helpers::get_opt(row, 2, "sessions", "memory_session_id")?,
        project: row_helpers::get(row, 3, "sessions", "project")?,
        created_at_epoch: row_helpers::get(row, 4, "sessions", "created_at_epoch")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionStore {
        SessionStore::new(Database::in_memory().unwrap())
    }

    fn observation(title: &str) -> Observation {
        Observation {
            content_session_id: "cs_1".into(),
            kind: "discovery".into(),
            title: title.into(),
            subtitle: None,
            facts: vec!["a fact".into()],
            narrative: Some("what happened".into()),
            concepts: vec![],
            files_read: vec!["/x".into()],
            files_modified: vec![],
        }
    }

    #[test]
    fn init_assigns_memory_session_id() {
        let store = setup();
        let session = store.init_session("cs_abc", "demo").unwrap();
        assert!(session.session_db_id > 0);
        assert!(session.memory_session_id.is_some());
        assert_eq!(session.project, "demo");
    }

    #[test]
    fn init_is_get_or_create() {
        let store = setup();
        let first = store.init_session("cs_abc", "demo").unwrap();
        let second = store.init_session("cs_abc", "demo").unwrap();
        assert_eq!(first.session_db_id, second.session_db_id);
        assert_eq!(first.memory_session_id, second.memory_session_id);
    }

    #[test]
    fn get_missing_session() {
        let store = setup();
        assert!(matches!(store.get(999), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn get_roundtrip() {
        let store = setup();
        let created = store.init_session("cs_abc", "demo").unwrap();
        let fetched = store.get(created.session_db_id).unwrap();
        assert_eq!(fetched.content_session_id, "cs_abc");
    }

    #[test]
    fn store_observations_returns_ordered_ids() {
        let store = setup();
        let obs = vec![observation("first"), observation("second"), observation("third")];
        let stored = store
            .store_observations("mem_1", "demo", &obs, None, 3, 120)
            .unwrap();

        assert_eq!(stored.observation_ids.len(), 3);
        assert!(stored.summary_id.is_none());
        // AUTOINCREMENT ids are ascending in insert order
        assert!(stored.observation_ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn store_summary_alongside() {
        let store = setup();
        let summary = SessionSummary {
            session_db_id: 1,
            request: Some("fix it".into()),
            learned: Some("it was a race".into()),
            ..Default::default()
        };
        let stored = store
            .store_observations("mem_1", "demo", &[], Some(&summary), 0, 80)
            .unwrap();
        assert!(stored.observation_ids.is_empty());
        assert!(stored.summary_id.is_some());
    }

    #[test]
    fn recent_observations_newest_first() {
        let store = setup();
        for i in 0..5 {
            store
                .store_observations("mem_1", "demo", &[observation(&format!("obs {i}"))], None, 0, 0)
                .unwrap();
        }
        store
            .store_observations("mem_1", "other", &[observation("unrelated")], None, 0, 0)
            .unwrap();

        let recent = store.get_recent_observations("demo", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].text.starts_with("obs 4"));
        assert!(recent.iter().all(|r| !r.text.contains("unrelated")));
    }

    #[test]
    fn recent_observations_empty_project() {
        let store = setup();
        assert!(store.get_recent_observations("nothing", 10).unwrap().is_empty());
    }

    #[test]
    fn recent_observation_text_includes_narrative() {
        let store = setup();
        store
            .store_observations("mem_1", "demo", &[observation("title")], None, 0, 0)
            .unwrap();
        let recent = store.get_recent_observations("demo", 1).unwrap();
        assert_eq!(recent[0].text, "title: what happened");
        assert_eq!(recent[0].kind, "discovery");
    }
}
