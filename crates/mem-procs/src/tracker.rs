//! In-memory registry of agent child processes, keyed by session.
//!
//! The tracker owns the happy path: children we spawned and still remember.
//! Each registration hands the child handle to a monitor task that reaps it
//! and drops the record when the OS reports its exit; explicit termination
//! works on the pid so it never races the monitor for the handle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::kill;

/// A registered child process.
#[derive(Clone, Debug)]
pub struct TrackedProcess {
    pub pid: u32,
    pub session_db_id: i64,
    pub spawned_at: Instant,
    pub command: String,
    generation: u64,
}

/// Result of a bulk shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerminateSummary {
    pub terminated: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct ProcessTracker {
    inner: Arc<Mutex<HashMap<i64, TrackedProcess>>>,
    next_generation: Arc<AtomicU64>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spawned child for a session. Overwrites any previous record
    /// for the same session. The child handle moves into a monitor task that
    /// reaps it and auto-removes the record on exit.
    pub fn register(
        &self,
        session_db_id: i64,
        mut child: tokio::process::Child,
        command: impl Into<String>,
    ) {
        let Some(pid) = child.id() else {
            warn!(session_db_id, "child already exited before registration");
            return;
        };
        let command = command.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        self.inner.lock().insert(
            session_db_id,
            TrackedProcess {
                pid,
                session_db_id,
                spawned_at: Instant::now(),
                command: command.clone(),
                generation,
            },
        );
        debug!(session_db_id, pid, command = %command, "tracking agent process");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _ = child.wait().await;
            let mut map = inner.lock();
            // Only evict our own record; a newer registration wins
            if map
                .get(&session_db_id)
                .is_some_and(|entry| entry.generation == generation)
            {
                map.remove(&session_db_id);
                debug!(session_db_id, pid, "agent process exited");
            }
        });
    }

    /// Terminate the session's tracked process politely-then-forcefully and
    /// verify death. Returns true when no such process is tracked.
    pub async fn terminate(&self, session_db_id: i64, graceful_timeout: Duration) -> bool {
        let entry = { self.inner.lock().get(&session_db_id).cloned() };
        let Some(entry) = entry else {
            return true;
        };

        let dead = kill::terminate_pid(entry.pid, graceful_timeout).await;
        if dead {
            let mut map = self.inner.lock();
            if map
                .get(&session_db_id)
                .is_some_and(|e| e.generation == entry.generation)
            {
                map.remove(&session_db_id);
            }
        } else {
            warn!(session_db_id, pid = entry.pid, "tracked process survived termination");
        }
        dead
    }

    /// Best-effort bulk shutdown of everything tracked.
    pub async fn terminate_all(&self, graceful_timeout: Duration) -> TerminateSummary {
        let sessions: Vec<i64> = { self.inner.lock().keys().copied().collect() };
        let mut summary = TerminateSummary::default();
        for session_db_id in sessions {
            if self.terminate(session_db_id, graceful_timeout).await {
                summary.terminated += 1;
            } else {
                summary.failed += 1;
            }
        }
        if summary.terminated + summary.failed > 0 {
            info!(
                terminated = summary.terminated,
                failed = summary.failed,
                "tracked processes shut down"
            );
        }
        summary
    }

    /// Zero-impact liveness probe; "no such process" is dead.
    pub fn verify_dead(pid: u32) -> bool {
        !kill::pid_alive(pid)
    }

    pub fn get(&self, session_db_id: i64) -> Option<TrackedProcess> {
        self.inner.lock().get(&session_db_id).cloned()
    }

    /// Snapshot of currently tracked pids (read by the orphan reaper).
    pub fn tracked_pids(&self) -> HashSet<u32> {
        self.inner.lock().values().map(|entry| entry.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
