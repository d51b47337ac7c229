//! HTTP intake server.
//!
//! Bound to loopback by default: the only clients are hooks running on the
//! same machine. The latency contract on the intake routes is a single local
//! transactional write.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use mem_procs::{OrphanReaper, ProcessTracker};
use mem_store::{SessionStore, SummaryRequestQueue, ToolEventQueue};

use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 37777,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub events: ToolEventQueue,
    pub summaries: SummaryRequestQueue,
    pub sessions: SessionStore,
    pub tracker: ProcessTracker,
    pub reaper: Option<Arc<OrphanReaper>>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/init", post(handlers::init_session))
        .route("/api/sessions/observations", post(handlers::insert_observation))
        .route("/api/sessions/summary", post(handlers::insert_summary))
        .route("/api/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = SocketAddr::new(config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "intake server started");

    let shutdown = CancellationToken::new();
    let shutdown_for_axum = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_for_axum.cancelled().await;
            })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server: server_task,
    })
}

/// Handle returned by `start()`.
///
/// Call `shutdown()` to stop accepting new connections, then `drain()` to
/// wait for in-flight requests to complete.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Signal the server to stop accepting new connections.
    pub fn shutdown(&self) {
        tracing::info!("intake server shutdown initiated");
        self.shutdown.cancel();
    }

    /// Wait for the server task to complete after shutdown.
    pub async fn drain(self) {
        let _ = self.server.await;
        tracing::debug!("intake server drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mem_store::Database;

    fn state() -> AppState {
        let db = Database::in_memory().unwrap();
        AppState {
            events: ToolEventQueue::new(db.clone()),
            summaries: SummaryRequestQueue::new(db.clone()),
            sessions: SessionStore::new(db),
            tracker: ProcessTracker::new(),
            reaper: None,
        }
    }

    async fn spawn_server(state: AppState) -> ServerHandle {
        start(
            ServerConfig {
                port: 0,
                ..Default::default()
            },
            state,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let handle = spawn_server(state()).await;
        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn init_then_observation_lands_in_queue() {
        let state = state();
        let events = state.events.clone();
        let handle = spawn_server(state).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{}", handle.port);

        let resp = client
            .post(format!("{base}/api/sessions/init"))
            .json(&serde_json::json!({
                "contentSessionId": "cs_http",
                "project": "demo",
                "prompt": "hello"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let session_db_id = body["sessionDbId"].as_i64().unwrap();
        assert!(session_db_id > 0);

        let resp = client
            .post(format!("{base}/api/sessions/observations"))
            .json(&serde_json::json!({
                "sessionDbId": session_db_id,
                "contentSessionId": "cs_http",
                "tool_name": "Read",
                "tool_input": {"path": "/x"},
                "tool_response": {"ok": true},
                "cwd": "/tmp",
                "prompt_number": 1,
                "project": "demo"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["id"].as_i64().unwrap() > 0);

        assert_eq!(events.stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn observation_without_tool_name_is_rejected() {
        let handle = spawn_server(state()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/sessions/observations",
                handle.port
            ))
            .json(&serde_json::json!({
                "sessionDbId": 1,
                "contentSessionId": "cs_http",
                "tool_name": ""
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let handle = spawn_server(state()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/sessions/observations",
                handle.port
            ))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn duplicate_summary_returns_conflict() {
        let handle = spawn_server(state()).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/api/sessions/summary", handle.port);
        let body = serde_json::json!({
            "sessionDbId": 42,
            "contentSessionId": "cs_http",
            "project": "demo",
            "user_prompt": "do a thing",
            "last_assistant_message": "did it"
        });

        let resp = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let resp = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), 409);
        let err: serde_json::Value = resp.json().await.unwrap();
        assert!(err["error"].as_str().unwrap().contains("42"));
    }

    #[tokio::test]
    async fn stats_reports_queue_counts() {
        let state = state();
        let events = state.events.clone();
        let handle = spawn_server(state).await;

        events
            .insert_raw(&mem_store::queue::NewToolEvent {
                session_db_id: 1,
                content_session_id: "cs".into(),
                tool_name: "Read".into(),
                tool_input: "{}".into(),
                tool_response: "{}".into(),
                cwd: "/tmp".into(),
                prompt_number: 0,
                project: "demo".into(),
            })
            .unwrap();

        let url = format!("http://127.0.0.1:{}/api/stats", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["events"]["pending"], 1);
        assert_eq!(body["summaries"]["pending"], 0);
        assert_eq!(body["tracked_processes"], 0);
        assert_eq!(body["orphan_scan"]["found"], 0);
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let handle = spawn_server(state()).await;
        let url = format!("http://127.0.0.1:{}/health", handle.port);
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

        handle.shutdown();
        handle.drain().await;

        assert!(reqwest::get(&url).await.is_err());
    }
}
