use serde::{Deserialize, Serialize};

/// A structured record derived from one or more raw tool events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Transient session token from the HTTP boundary the source events
    /// were captured under.
    pub content_session_id: String,
    /// Observation kind (e.g. "discovery", "bugfix"); the active mode lists
    /// the kinds the model is asked to produce.
    pub kind: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub facts: Vec<String>,
    pub narrative: Option<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
}

/// A structured end-of-turn record for one user turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_db_id: i64,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

impl SessionSummary {
    /// True when no field carries any content.
    pub fn is_empty(&self) -> bool {
        self.request.is_none()
            && self.investigated.is_none()
            && self.learned.is_none()
            && self.completed.is_none()
            && self.next_steps.is_none()
            && self.notes.is_none()
    }
}
