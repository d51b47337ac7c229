//! Polite-then-forceful process termination.
//!
//! The sequence is: deliver a termination request, poll for exit up to the
//! graceful timeout, force-kill, poll again briefly, then report whether the
//! pid is actually gone. The liveness probe is a zero-impact signal: "no such
//! process" counts as dead, "not permitted" counts as alive.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// How long to wait after a force kill before giving up.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Liveness poll cadence while waiting for an exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Probe whether a pid exists without affecting it.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(unix)]
fn request_termination(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{pid}\"")))
        .unwrap_or(false)
}

#[cfg(windows)]
fn request_termination(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output();
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output();
}

/// Terminate a pid: polite signal, graceful wait, force kill, short wait.
/// Returns whether the pid is gone afterwards.
pub async fn terminate_pid(pid: u32, graceful_timeout: Duration) -> bool {
    if !pid_alive(pid) {
        return true;
    }

    request_termination(pid);
    if wait_for_exit(pid, graceful_timeout).await {
        debug!(pid, "process exited after polite termination");
        return true;
    }

    debug!(pid, "polite termination ignored, force killing");
    force_kill(pid);
    wait_for_exit(pid, FORCE_KILL_WAIT).await
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn spawn_sleeper() -> (tokio::process::Child, u32) {
        let child = tokio::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid");
        (child, pid)
    }

    #[tokio::test]
    async fn alive_probe_sees_running_process() {
        let (mut child, pid) = spawn_sleeper().await;
        assert!(pid_alive(pid));
        child.kill().await.ok();
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn terminate_kills_politely() {
        let (mut child, pid) = spawn_sleeper().await;
        let reaper = tokio::spawn(async move { child.wait().await });

        let dead = terminate_pid(pid, Duration::from_secs(5)).await;
        assert!(dead);
        assert!(!pid_alive(pid));
        let _ = reaper.await;
    }

    #[tokio::test]
    async fn terminate_escalates_to_sigkill() {
        // A child that ignores SIGTERM must still die via the force path
        let mut child = tokio::process::Command::new("bash")
            .args(["-c", "trap '' TERM; sleep 60"])
            .spawn()
            .expect("spawn trap sleeper");
        let pid = child.id().expect("child pid");
        let reaper = tokio::spawn(async move { child.wait().await });

        // Give bash a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let dead = terminate_pid(pid, Duration::from_millis(300)).await;
        assert!(dead);
        let _ = reaper.await;
    }

    #[tokio::test]
    async fn terminate_missing_pid_is_true() {
        // Pid from a process that already exited
        let (mut child, pid) = spawn_sleeper().await;
        child.kill().await.ok();
        let _ = child.wait().await;

        assert!(terminate_pid(pid, Duration::from_millis(100)).await);
    }
}
