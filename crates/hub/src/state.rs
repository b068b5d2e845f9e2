use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use gridlink_protocol::Envelope;

use crate::connection::{ConnectionIdentity, ConnectionSnapshot, HubConnection};

// ── Message handlers ─────────────────────────────────────────────────────────

/// Context passed to an application message handler.
pub struct MessageContext {
    pub conn_id: String,
    pub envelope: Envelope,
    pub state: Arc<HubState>,
}

/// Handler for one application frame type. Errors are caught and logged;
/// they never tear down the connection.
#[async_trait]
pub trait HubMessageHandler: Send + Sync {
    async fn handle(&self, ctx: MessageContext) -> anyhow::Result<()>;
}

// ── Hub state ────────────────────────────────────────────────────────────────

/// Shared hub runtime state, wrapped in Arc for use across async tasks.
#[derive(Default)]
pub struct HubState {
    /// All connected clients, keyed by conn id.
    connections: RwLock<HashMap<String, HubConnection>>,
    /// Application frame handlers, keyed by envelope type.
    handlers: RwLock<HashMap<String, Arc<dyn HubMessageHandler>>>,
}

impl HubState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an application handler for an envelope type. Registering
    /// under [`gridlink_protocol::frames::MESSAGE`] installs the fallback
    /// for untyped or non-JSON payloads.
    pub async fn add_message_handler(&self, kind: &str, handler: Arc<dyn HubMessageHandler>) {
        self.handlers
            .write()
            .await
            .insert(kind.to_string(), handler);
    }

    pub async fn handler_for(&self, kind: &str) -> Option<Arc<dyn HubMessageHandler>> {
        self.handlers.read().await.get(kind).map(Arc::clone)
    }

    pub async fn register_connection(&self, conn: HubConnection) {
        let conn_id = conn.conn_id.clone();
        self.connections.write().await.insert(conn_id.clone(), conn);
        info!(conn_id = %conn_id, "connection opened");
    }

    pub async fn remove_connection(&self, conn_id: &str) -> Option<HubConnection> {
        let removed = self.connections.write().await.remove(conn_id);
        if removed.is_some() {
            info!(%conn_id, "connection closed");
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn get_connection(&self, conn_id: &str) -> Option<ConnectionSnapshot> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(ConnectionSnapshot::from)
    }

    /// Connections identified as a given user.
    pub async fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionSnapshot> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.identity.user_id.as_deref() == Some(user_id))
            .map(ConnectionSnapshot::from)
            .collect()
    }

    /// Send a JSON frame to one connection. False if it is gone.
    pub async fn send_to_client<T: Serialize>(&self, conn_id: &str, payload: &T) -> bool {
        self.connections
            .read()
            .await
            .get(conn_id)
            .is_some_and(|c| c.send_json(payload))
    }

    /// Fan a JSON frame out to every connection passing `filter` (or all).
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast<T: Serialize>(
        &self,
        payload: &T,
        filter: Option<&(dyn Fn(&HubConnection) -> bool + Send + Sync)>,
    ) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "broadcast payload failed to serialize");
                return 0;
            },
        };
        let connections = self.connections.read().await;
        let mut sent = 0;
        for conn in connections.values() {
            if filter.is_none_or(|f| f(conn)) && conn.send_text(text.clone()) {
                sent += 1;
            }
        }
        sent
    }

    /// Broadcast restricted to subscribers of `channel`.
    pub async fn publish_to_channel<T: Serialize>(&self, channel: &str, payload: &T) -> usize {
        self.broadcast(payload, Some(&|c: &HubConnection| c.is_subscribed(channel)))
            .await
    }

    pub async fn subscribe_channel(&self, conn_id: &str, channel: &str) -> bool {
        let mut connections = self.connections.write().await;
        connections
            .get_mut(conn_id)
            .is_some_and(|c| c.channels.insert(channel.to_string()))
    }

    pub async fn unsubscribe_channel(&self, conn_id: &str, channel: &str) -> bool {
        let mut connections = self.connections.write().await;
        connections
            .get_mut(conn_id)
            .is_some_and(|c| c.channels.remove(channel))
    }

    /// Mark a connection alive and touch its activity timestamp.
    pub async fn mark_alive(&self, conn_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.touch();
        }
    }

    pub async fn set_identity(&self, conn_id: &str, identity: ConnectionIdentity) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.identity = identity;
        }
    }

    /// One liveness sweep: terminate every connection still marked
    /// not-alive from the previous sweep, then mark the rest not-alive and
    /// ping them. A connection that pongs (or sends anything) in between
    /// is re-marked alive and survives indefinitely.
    pub async fn sweep_once(&self) -> (usize, usize) {
        let mut evict = Vec::new();
        {
            let mut connections = self.connections.write().await;
            for conn in connections.values_mut() {
                if conn.alive {
                    conn.alive = false;
                    conn.send_ping();
                } else {
                    evict.push(conn.conn_id.clone());
                }
            }
        }

        let evicted = evict.len();
        for conn_id in evict {
            debug!(%conn_id, "terminating unresponsive connection");
            if let Some(conn) = self.remove_connection(&conn_id).await {
                conn.close();
            }
        }
        let pinged = self.connection_count().await;
        (pinged, evicted)
    }

    /// Terminate every connection.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        for conn in connections.values() {
            conn.close();
        }
        let count = connections.len();
        connections.clear();
        info!(connections = count, "hub shut down");
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use gridlink_protocol::Envelope;

    use super::*;
    use crate::connection::OutboundFrame;

    fn test_conn(id: &str) -> (HubConnection, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HubConnection::new(id.to_string(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn publish_to_channel_reaches_only_subscribers() {
        let state = HubState::new();
        let (a, mut rx_a) = test_conn("a");
        let (b, mut rx_b) = test_conn("b");
        state.register_connection(a).await;
        state.register_connection(b).await;
        state.subscribe_channel("a", "telemetry").await;

        let sent = state
            .publish_to_channel("telemetry", &Envelope::new("telemetry"))
            .await;

        assert_eq!(sent, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn broadcast_honors_filter() {
        let state = HubState::new();
        let (a, mut rx_a) = test_conn("a");
        let (b, mut rx_b) = test_conn("b");
        state.register_connection(a).await;
        state.register_connection(b).await;

        let sent = state
            .broadcast(
                &Envelope::new("status"),
                Some(&|c: &HubConnection| c.conn_id == "b"),
            )
            .await;

        assert_eq!(sent, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn silent_connection_is_evicted_after_two_sweeps() {
        let state = HubState::new();
        let (conn, mut rx) = test_conn("silent");
        state.register_connection(conn).await;

        let (pinged, evicted) = state.sweep_once().await;
        assert_eq!((pinged, evicted), (1, 0));
        assert!(matches!(drain(&mut rx).as_slice(), [OutboundFrame::Ping]));

        // No pong before the next sweep: second strike terminates it.
        let (_, evicted) = state.sweep_once().await;
        assert_eq!(evicted, 1);
        assert_eq!(state.connection_count().await, 0);
        assert!(matches!(drain(&mut rx).as_slice(), [OutboundFrame::Close]));
    }

    #[tokio::test]
    async fn responsive_connection_survives_sweeps() {
        let state = HubState::new();
        let (conn, _rx) = test_conn("chatty");
        state.register_connection(conn).await;

        for _ in 0..5 {
            state.sweep_once().await;
            // Simulated pong between sweeps.
            state.mark_alive("chatty").await;
        }

        assert_eq!(state.connection_count().await, 1);
    }

    #[tokio::test]
    async fn queries_by_user_identity() {
        let state = HubState::new();
        let (conn, _rx) = test_conn("c1");
        state.register_connection(conn).await;
        state
            .set_identity("c1", ConnectionIdentity {
                user_id: Some("user-9".to_string()),
                ..ConnectionIdentity::default()
            })
            .await;

        assert_eq!(state.connections_for_user("user-9").await.len(), 1);
        assert!(state.connections_for_user("nobody").await.is_empty());
        assert!(state.get_connection("c1").await.is_some());
    }
}
