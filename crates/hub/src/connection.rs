use std::{collections::HashSet, time::Instant};

use {serde::Serialize, tokio::sync::mpsc};

// ── Connected client ─────────────────────────────────────────────────────────

/// Frames queued for a connection's write loop.
#[derive(Debug)]
pub enum OutboundFrame {
    Text(String),
    /// Protocol-level liveness probe.
    Ping,
    Close,
}

/// Platform entities a connection may be acting for.
#[derive(Debug, Clone, Default)]
pub struct ConnectionIdentity {
    pub user_id: Option<String>,
    pub site_id: Option<String>,
    pub device_uid: Option<String>,
}

/// A client currently connected to the hub.
#[derive(Debug)]
pub struct HubConnection {
    pub conn_id: String,
    /// Channel feeding this connection's write loop.
    sender: mpsc::UnboundedSender<OutboundFrame>,
    /// Cleared by each liveness sweep, set again by inbound traffic.
    pub alive: bool,
    /// Channels this connection subscribed to.
    pub channels: HashSet<String>,
    pub identity: ConnectionIdentity,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl HubConnection {
    pub fn new(conn_id: String, sender: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            sender,
            alive: true,
            channels: HashSet::new(),
            identity: ConnectionIdentity::default(),
            connected_at: now,
            last_activity: now,
        }
    }

    /// Queue a text frame. False when the write loop is gone.
    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        self.sender.send(OutboundFrame::Text(frame.into())).is_ok()
    }

    /// Queue a serialized JSON frame.
    pub fn send_json<T: Serialize>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    pub fn send_ping(&self) -> bool {
        self.sender.send(OutboundFrame::Ping).is_ok()
    }

    pub fn close(&self) {
        let _ = self.sender.send(OutboundFrame::Close);
    }

    /// Touch the activity timestamp and mark the connection alive.
    pub fn touch(&mut self) {
        self.alive = true;
        self.last_activity = Instant::now();
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }
}

/// Read-only view of a connection for queries.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub conn_id: String,
    pub alive: bool,
    pub channels: Vec<String>,
    pub identity: ConnectionIdentity,
}

impl From<&HubConnection> for ConnectionSnapshot {
    fn from(conn: &HubConnection) -> Self {
        Self {
            conn_id: conn.conn_id.clone(),
            alive: conn.alive,
            channels: conn.channels.iter().cloned().collect(),
            identity: conn.identity.clone(),
        }
    }
}
