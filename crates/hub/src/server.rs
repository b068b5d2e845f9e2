//! Hub HTTP/WebSocket server and the [`BroadcastHub`] service wrapper.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    serde::{Deserialize, Serialize},
    tokio::{sync::Mutex, task::JoinHandle},
    tower_http::cors::{Any, CorsLayer},
    tracing::{debug, error, info},
};

use {gridlink_protocol::HEARTBEAT_INTERVAL_MS, gridlink_runtime::Service};

use crate::{state::HubState, ws::handle_connection};

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    /// Interval between liveness sweeps, in milliseconds.
    pub heartbeat_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 18890,
            heartbeat_ms: HEARTBEAT_INTERVAL_MS,
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the hub router (shared between production startup and tests).
pub fn router(state: Arc<HubState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    let count = state.connection_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "protocol": gridlink_protocol::PROTOCOL_VERSION,
        "connections": count,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

// ── Service wrapper ──────────────────────────────────────────────────────────

/// The broadcast hub as a registry-managed service: `start` binds the
/// listener and spawns the accept and sweep loops, `stop` terminates every
/// connection and the loops with it.
pub struct BroadcastHub {
    config: HubConfig,
    state: Arc<HubState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: HubState::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> Arc<HubState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl Service for BroadcastHub {
    async fn start(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "hub listening");

        let app = router(Arc::clone(&self.state));
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "hub server exited");
            }
        });

        let sweep_state = Arc::clone(&self.state);
        let interval = Duration::from_millis(self.config.heartbeat_ms);
        let sweep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so fresh connections
            // get a full interval before their first strike.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (pinged, evicted) = sweep_state.sweep_once().await;
                if evicted > 0 {
                    info!(pinged, evicted, "liveness sweep");
                } else {
                    debug!(pinged, "liveness sweep");
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(serve_task);
        tasks.push(sweep_task);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.state.shutdown().await;
        Ok(())
    }
}
