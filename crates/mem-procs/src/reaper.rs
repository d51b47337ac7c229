//! Orphan reaper: the unhappy path of process supervision.
//!
//! Agent subprocesses can outlive a crashed service. The reaper periodically
//! enumerates host processes whose command line carries the agent signature,
//! skips anything the tracker still owns and anything younger than the age
//! floor, and terminates the rest. The age floor keeps a freshly-spawned,
//! healthy agent out of the kill set.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kill;
use crate::tracker::ProcessTracker;

/// Command-line substring identifying agent subprocesses.
pub const AGENT_COMMAND_PATTERN: &str = "claude-mem-agent";

#[derive(Clone, Debug)]
pub struct ReaperConfig {
    /// Substring matched against the full command line.
    pub pattern: String,
    /// Scan cadence.
    pub interval: Duration,
    /// Processes younger than this are never touched.
    pub max_age: Duration,
    /// Graceful window per kill before escalation.
    pub graceful_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            pattern: AGENT_COMMAND_PATTERN.to_string(),
            interval: Duration::from_secs(5 * 60),
            max_age: Duration::from_secs(30 * 60),
            graceful_timeout: Duration::from_secs(5),
        }
    }
}

/// Counts from one scan: candidates after exclusions, and the kill outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub found: usize,
    pub killed: usize,
    pub failed: usize,
}

/// A host process matching the agent signature.
#[derive(Clone, Debug)]
struct HostProcess {
    pid: u32,
    age: Duration,
    command: String,
}

pub struct OrphanReaper {
    config: ReaperConfig,
    tracker: ProcessTracker,
    last_report: Mutex<ScanReport>,
}

impl OrphanReaper {
    pub fn new(config: ReaperConfig, tracker: ProcessTracker) -> Self {
        Self {
            config,
            tracker,
            last_report: Mutex::new(ScanReport::default()),
        }
    }

    /// The most recent scan's counts (for the stats surface).
    pub fn last_report(&self) -> ScanReport {
        *self.last_report.lock()
    }

    /// Start the periodic scan loop.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick; scanning right at startup
            // would race the tracker registrations done during boot.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.scan().await;
                    }
                }
            }
            debug!("orphan reaper stopped");
        })
    }

    /// One scan pass. Enumerate, exclude, kill, report.
    pub async fn scan(&self) -> ScanReport {
        let processes = match list_agent_processes(&self.config.pattern).await {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "process enumeration failed, skipping scan");
                return self.last_report();
            }
        };

        let tracked = self.tracker.tracked_pids();
        let own_pid = std::process::id();
        let mut report = ScanReport::default();

        for process in processes {
            if process.pid == own_pid || tracked.contains(&process.pid) {
                continue;
            }
            if process.age < self.config.max_age {
                continue;
            }
            report.found += 1;
            debug!(pid = process.pid, command = %process.command, age_secs = process.age.as_secs(), "killing orphaned agent process");
            if kill::terminate_pid(process.pid, self.config.graceful_timeout).await {
                report.killed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.found > 0 {
            info!(
                found = report.found,
                killed = report.killed,
                failed = report.failed,
                "orphan scan complete"
            );
        }
        *self.last_report.lock() = report;
        report
    }
}

#[cfg(unix)]
async fn list_agent_processes(pattern: &str) -> std::io::Result<Vec<HostProcess>> {
    let output = tokio::process::Command::new("ps")
        .args(["-eo", "pid=,etime=,args="])
        .output()
        .await?;
    Ok(parse_ps_output(
        &String::from_utf8_lossy(&output.stdout),
        pattern,
    ))
}

#[cfg(windows)]
async fn list_agent_processes(pattern: &str) -> std::io::Result<Vec<HostProcess>> {
    // CIM query printing "pid<TAB>age_seconds<TAB>command" per line
    let script = "Get-CimInstance Win32_Process | ForEach-Object { \
         \"{0}`t{1}`t{2}\" -f $_.ProcessId, \
         [int]((Get-Date) - $_.CreationDate).TotalSeconds, $_.CommandLine }";
    let output = tokio::process::Command::new("powershell")
        .args(["-NoProfile", "-Command", script])
        .output()
        .await?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let pid: u32 = parts.next()?.trim().parse().ok()?;
            let age_secs: u64 = parts.next()?.trim().parse().ok()?;
            let command = parts.next()?.trim().to_string();
            command.contains(pattern).then_some(HostProcess {
                pid,
                age: Duration::from_secs(age_secs),
                command,
            })
        })
        .collect())
}

#[cfg(unix)]
fn parse_ps_output(text: &str, pattern: &str) -> Vec<HostProcess> {
    text.lines()
        .filter_map(parse_ps_line)
        .filter(|process| process.command.contains(pattern))
        .collect()
}

#[cfg(unix)]
fn parse_ps_line(line: &str) -> Option<HostProcess> {
    let mut parts = line.split_whitespace();
    let pid: u32 = parts.next()?.parse().ok()?;
    let age = parse_etime(parts.next()?)?;
    let command = parts.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return None;
    }
    Some(HostProcess { pid, age, command })
}

/// Parse the composite `[[DD-]HH:]MM:SS` elapsed-time format.
#[cfg(unix)]
fn parse_etime(etime: &str) -> Option<Duration> {
    let re = regex::Regex::new(r"^(?:(?:(\d+)-)?(\d+):)?(\d+):(\d+)$").ok()?;
    let caps = re.captures(etime.trim())?;
    let field = |idx: usize| -> u64 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let days = field(1);
    let hours = field(2);
    let minutes = field(3);
    let seconds = field(4);
    Some(Duration::from_secs(
        ((days * 24 + hours) * 60 + minutes) * 60 + seconds,
    ))
}
