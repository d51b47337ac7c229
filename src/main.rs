use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mem_core::{Mode, Settings};
use mem_llm::{CompletionClient, LlmClient};
use mem_procs::{OrphanReaper, ProcessTracker, ReaperConfig};
use mem_server::{AppState, ServerConfig};
use mem_store::{Database, SessionStore, SummaryRequestQueue, ToolEventQueue};
use mem_telemetry::TelemetryConfig;
use mem_worker::{EventWorker, EventWorkerConfig, SummaryWorker, SummaryWorkerConfig};

#[derive(Parser)]
#[command(name = "claude-mem-rs", about = "Memory-capture service for a coding assistant")]
struct Args {
    /// Port to listen on (loopback only).
    #[arg(long, default_value_t = 37777)]
    port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to the SQLite database file. Defaults to ~/.claude-mem/claude-mem.db.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let telemetry_config = TelemetryConfig {
        log_level: args.log_level.parse().unwrap_or(tracing::Level::INFO),
        json_output: args.json_logs,
        ..Default::default()
    };
    mem_telemetry::init_telemetry(&telemetry_config);

    tracing::info!(port = args.port, log_level = %args.log_level, "starting claude-mem service");

    let settings = Settings::load();
    tracing::info!(provider = %settings.provider, "LLM provider selected");

    let db_path = args
        .db_path
        .unwrap_or_else(|| dirs_home().join(".claude-mem").join("claude-mem.db"));
    let db = Database::open(&db_path).expect("failed to open database");

    let events = ToolEventQueue::new(db.clone());
    let summaries = SummaryRequestQueue::new(db.clone());
    let sessions = SessionStore::new(db);

    let llm: Arc<dyn CompletionClient> = Arc::new(LlmClient::new(settings));
    let tracker = ProcessTracker::new();
    let reaper = Arc::new(OrphanReaper::new(ReaperConfig::default(), tracker.clone()));

    // Background loops: two summarizer workers plus the orphan reaper
    let cancel = CancellationToken::new();
    let event_task = EventWorker::new(
        events.clone(),
        sessions.clone(),
        Arc::clone(&llm),
        Mode::code_default(),
        EventWorkerConfig::default(),
    )
    .spawn(cancel.clone());
    let summary_task = SummaryWorker::new(
        summaries.clone(),
        sessions.clone(),
        Arc::clone(&llm),
        Mode::code_default(),
        SummaryWorkerConfig::default(),
    )
    .spawn(cancel.clone());
    let reaper_task = Arc::clone(&reaper).spawn(cancel.clone());

    let state = AppState {
        events,
        summaries,
        sessions,
        tracker: tracker.clone(),
        reaper: Some(reaper),
    };
    let handle = mem_server::start(
        ServerConfig {
            port: args.port,
            ..Default::default()
        },
        state,
    )
    .await
    .expect("failed to start intake server");

    tracing::info!(port = handle.port, "claude-mem service ready");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    // Phase 1: stop the background loops; a tick in progress finishes
    cancel.cancel();

    // Phase 2: shut down any agent children we still own
    let summary = tracker.terminate_all(Duration::from_secs(2)).await;
    if summary.failed > 0 {
        tracing::warn!(failed = summary.failed, "some tracked processes survived shutdown");
    }

    // Phase 3: stop accepting connections and drain
    handle.shutdown();
    if tokio::time::timeout(Duration::from_secs(10), handle.drain())
        .await
        .is_err()
    {
        tracing::warn!("server drain timed out after 10s");
    }

    // Bounded wait for worker loops; an in-flight LLM call runs out its
    // deadline, so don't hold the process hostage for it.
    for task in [event_task, summary_task, reaper_task] {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("background task did not stop in time");
        }
    }

    tracing::info!("shutdown complete");
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
