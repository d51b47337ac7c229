//! Summary summarizer: turns end-of-turn requests into session summaries.
//!
//! Same loop shape as the event worker, but each claimed request is already
//! scoped to one session, so there is no grouping step. The request's
//! denormalized memory session id is never trusted; materialization re-reads
//! the authoritative session record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mem_core::{parser, Mode};
use mem_llm::{CompletionClient, CompletionRequest, SUMMARY_MAX_TOKENS};
use mem_store::summary_queue::{RawSummaryRequest, SummaryRequestQueue};
use mem_store::{SessionStore, StoreError};

/// How many recent observations to offer as advisory context.
const RECENT_OBSERVATION_LIMIT: u32 = 10;

const PARSE_FAILURE_MESSAGE: &str = "Failed to parse summary from LLM response";

#[derive(Clone, Debug)]
pub struct SummaryWorkerConfig {
    pub tick_interval: Duration,
    pub batch_size: u32,
    pub cleanup_every_ticks: u64,
    pub release_every_ticks: u64,
    pub retention: Duration,
    pub stall_threshold: Duration,
}

impl Default for SummaryWorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10_000),
            batch_size: 5,
            cleanup_every_ticks: 100,
            release_every_ticks: 30,
            retention: Duration::from_secs(60 * 60),
            stall_threshold: Duration::from_secs(5 * 60),
        }
    }
}

pub struct SummaryWorker {
    queue: SummaryRequestQueue,
    sessions: SessionStore,
    llm: Arc<dyn CompletionClient>,
    mode: Mode,
    config: SummaryWorkerConfig,
}

impl SummaryWorker {
    pub fn new(
        queue: SummaryRequestQueue,
        sessions: SessionStore,
        llm: Arc<dyn CompletionClient>,
        mode: Mode,
        config: SummaryWorkerConfig,
    ) -> Self {
        Self {
            queue,
            sessions,
            llm,
            mode,
            config,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        match self.queue.release_stuck(0) {
            Ok(released) if released > 0 => {
                info!(released, "released stale summary claims from previous run");
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
                        warn!(error = %e, tick = tick_no, "summary worker tick aborted");
                    }
                }
            }
        }
        debug!("summary worker stopped");
    }

    async fn tick(&self, tick_no: u64) -> Result<(), StoreError> {
        if tick_no % self.config.cleanup_every_ticks == 0 {
            let cutoff = Utc::now().timestamp_millis() - self.config.retention.as_millis() as i64;
            let deleted = self.queue.delete_completed(cutoff)?;
            if deleted > 0 {
                debug!(deleted, "garbage-collected completed summary requests");
            }
        }
        if tick_no % self.config.release_every_ticks == 0 {
            let released = self
                .queue
                .release_stuck(self.config.stall_threshold.as_millis() as i64)?;
            if released > 0 {
                info!(released, "released stalled summary claims");
            }
        }

        let claimed = self.queue.claim_batch(self.config.batch_size)?;
        for request in &claimed {
            self.process_request(request).await?;
        }
        Ok(())
    }

    async fn process_request(&self, request: &RawSummaryRequest) -> Result<(), StoreError> {
        // The denormalized copy on the request may be stale; the session
        // record is authoritative.
        let session = match self.sessions.get(request.session_db_id) {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => {
                return self
                    .queue
                    .mark_failed(request.id, &format!("session {} not found", request.session_db_id));
            }
            Err(e) => return Err(e),
        };
        let Some(memory_session_id) = session.memory_session_id else {
            return self.queue.mark_failed(
                request.id,
                &format!("session {} has no memory session id", request.session_db_id),
            );
        };

        // Recent activity is advisory; a fetch failure never fails the request.
        let recent = self
            .sessions
            .get_recent_observations(&request.project, RECENT_OBSERVATION_LIMIT)
            .unwrap_or_else(|e| {
                debug!(error = %e, "recent-observation fetch failed, continuing without context");
                Vec::new()
            });

        let (system, user) = crate::prompts::build_summary_prompt(&self.mode, request, &recent);
        let completion = match self
            .llm
            .complete(&CompletionRequest {
                system,
                user,
                max_output_tokens: SUMMARY_MAX_TOKENS,
            })
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(request_id = request.id, error = %e, "LLM call failed for summary");
                return self.queue.mark_failed(request.id, &e.to_string());
            }
        };

        let Some(summary) = parser::parse_summary(&completion.content, request.session_db_id)
        else {
            return self.queue.mark_failed(request.id, PARSE_FAILURE_MESSAGE);
        };

        let stored = self.sessions.store_observations(
            &memory_session_id,
            &request.project,
            &[],
            Some(&summary),
            0,
            completion.total_tokens,
        )?;
        let summary_id = stored.summary_id.unwrap_or(0);
        self.queue.mark_completed(request.id, summary_id)?;

        info!(
            request_id = request.id,
            session_db_id = request.session_db_id,
            summary_id,
            tokens = completion.total_tokens,
            "session summary materialized"
        );
        Ok(())
    }
}
