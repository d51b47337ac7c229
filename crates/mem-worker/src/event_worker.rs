//! Event summarizer: the background half of "raw first, summarize later".
//!
//! A single serial loop claims batches from the tool-event queue, groups them
//! by session, and turns each group into observations via one LLM call.
//! LLM and materialization failures are charged against the row's retry
//! budget through `mark_failed`; storage failures abort the tick and leave
//! the claimed rows to the stall release.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mem_core::{parser, Mode};
use mem_llm::{CompletionClient, CompletionRequest, OBSERVATION_MAX_TOKENS};
use mem_store::queue::{RawToolEvent, ToolEventQueue};
use mem_store::{SessionStore, StoreError};

#[derive(Clone, Debug)]
pub struct EventWorkerConfig {
    pub tick_interval: Duration,
    pub batch_size: u32,
    /// Every Nth tick, garbage-collect completed rows.
    pub cleanup_every_ticks: u64,
    /// Every Mth tick, release stalled claims.
    pub release_every_ticks: u64,
    /// Completed rows older than this are deleted.
    pub retention: Duration,
    /// A claim older than this is presumed abandoned.
    pub stall_threshold: Duration,
}

impl Default for EventWorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10_000),
            batch_size: 10,
            cleanup_every_ticks: 100,
            release_every_ticks: 30,
            retention: Duration::from_secs(60 * 60),
            stall_threshold: Duration::from_secs(5 * 60),
        }
    }
}

pub struct EventWorker {
    queue: ToolEventQueue,
    sessions: SessionStore,
    llm: Arc<dyn CompletionClient>,
    mode: Mode,
    config: EventWorkerConfig,
}

impl EventWorker {
    pub fn new(
        queue: ToolEventQueue,
        sessions: SessionStore,
        llm: Arc<dyn CompletionClient>,
        mode: Mode,
        config: EventWorkerConfig,
    ) -> Self {
        Self {
            queue,
            sessions,
            llm,
            mode,
            config,
        }
    }

    /// Start the tick loop. The loop is serial, so a tick that outlasts the
    /// interval simply skips the missed firings instead of queueing them.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        // Startup recovery: whatever a previous process left in
        // `summarizing` is dead by definition.
        match self.queue.release_stuck(0) {
            Ok(released) if released > 0 => {
                info!(released, "released stale claims from previous run");
            }
            Err(e) => warn!(error = %e, "startup claim release failed"),
            _ => {}
        }

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick_no: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tick_no += 1;
                    if let Err(e) = self.tick(tick_no).await {
                        warn!(error = %e, tick = tick_no, "event summarizer tick aborted");
                    }
                }
            }
        }
        debug!("event summarizer stopped");
    }

    async fn tick(&self, tick_no: u64) -> Result<(), StoreError> {
        if tick_no % self.config.cleanup_every_ticks == 0 {
            let cutoff = Utc::now().timestamp_millis() - self.config.retention.as_millis() as i64;
            let deleted = self.queue.delete_completed(cutoff)?;
            if deleted > 0 {
                debug!(deleted, "garbage-collected completed events");
            }
        }
        if tick_no % self.config.release_every_ticks == 0 {
            let released = self
                .queue
                .release_stuck(self.config.stall_threshold.as_millis() as i64)?;
            if released > 0 {
                info!(released, "released stalled claims");
            }
        }

        let claimed = self.queue.claim_batch(self.config.batch_size)?;
        if claimed.is_empty() {
            return Ok(());
        }
        debug!(count = claimed.len(), "claimed events for summarization");

        // LLM context must be session-coherent; claim order is preserved
        // inside each group.
        let mut groups: BTreeMap<i64, Vec<RawToolEvent>> = BTreeMap::new();
        for event in claimed {
            groups.entry(event.session_db_id).or_default().push(event);
        }

        for (session_db_id, events) in groups {
            self.process_group(session_db_id, &events).await?;
        }
        Ok(())
    }

    /// Summarize one per-session sub-batch. Returns Err only for storage
    /// failures; LLM and session-resolution failures consume retry budget.
    async fn process_group(
        &self,
        session_db_id: i64,
        events: &[RawToolEvent],
    ) -> Result<(), StoreError> {
        let session = match self.sessions.get(session_db_id) {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => {
                return self.fail_group(events, &format!("session {session_db_id} not found"));
            }
            Err(e) => return Err(e),
        };
        let Some(memory_session_id) = session.memory_session_id else {
            return self.fail_group(
                events,
                &format!("session {session_db_id} has no memory session id"),
            );
        };

        let (system, user) = crate::prompts::build_observation_prompt(&self.mode, events);
        let request = CompletionRequest {
            system,
            user,
            max_output_tokens: OBSERVATION_MAX_TOKENS,
        };

        let completion = match self.llm.complete(&request).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(session_db_id, error = %e, "LLM call failed for event batch");
                return self.fail_group(events, &e.to_string());
            }
        };

        let observations =
            parser::parse_observations(&completion.content, &session.content_session_id);
        if observations.is_empty() {
            // The model saw nothing worth remembering; that is a terminal
            // success, not a failure.
            for event in events {
                self.queue.mark_completed(event.id, 0)?;
            }
            debug!(session_db_id, events = events.len(), "batch produced no observations");
            return Ok(());
        }

        let prompt_number = events.last().map(|e| e.prompt_number).unwrap_or(0);
        let stored = self.sessions.store_observations(
            &memory_session_id,
            &session.project,
            &observations,
            None,
            prompt_number,
            completion.total_tokens,
        )?;

        // Events beyond the observation count link to the last observation:
        // multi-event compression makes the surplus link informational only.
        let last_id = stored.observation_ids.last().copied().unwrap_or(0);
        for (index, event) in events.iter().enumerate() {
            let observation_id = stored
                .observation_ids
                .get(index)
                .copied()
                .unwrap_or(last_id);
            self.queue.mark_completed(event.id, observation_id)?;
        }

        info!(
            session_db_id,
            events = events.len(),
            observations = stored.observation_ids.len(),
            tokens = completion.total_tokens,
            "event batch summarized"
        );
        Ok(())
    }

    fn fail_group(&self, events: &[RawToolEvent], message: &str) -> Result<(), StoreError> {
        for event in events {
            self.queue.mark_failed(event.id, message)?;
        }
        Ok(())
    }
}
