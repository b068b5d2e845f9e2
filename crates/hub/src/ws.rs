//! Per-connection WebSocket loops: a write task fed by the connection's
//! outbound queue, and a read loop that recognizes control frames inline
//! and routes application frames through the handler map.

use std::sync::Arc;

use {
    axum::extract::ws::{Message, WebSocket},
    bytes::Bytes,
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tokio::sync::mpsc,
    tracing::{debug, warn},
    uuid::Uuid,
};

use gridlink_protocol::{Envelope, IdentifyFrame, PROTOCOL_VERSION, frames};

use crate::{
    connection::{HubConnection, OutboundFrame},
    state::{HubState, MessageContext},
};

/// Drive one accepted WebSocket connection until it closes.
pub async fn handle_connection(socket: WebSocket, state: Arc<HubState>) {
    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let conn = HubConnection::new(conn_id.clone(), tx);
    let greeting = conn.send_json(&Envelope::with_data(
        frames::CONNECTED,
        json!({ "connectionId": conn_id, "protocol": PROTOCOL_VERSION }),
    ));
    if !greeting {
        return;
    }
    state.register_connection(conn).await;

    let (mut sink, mut stream) = socket.split();

    // Write loop: drains the outbound queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text.into()),
                OutboundFrame::Ping => Message::Ping(Bytes::new()),
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                },
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Read loop: every inbound frame counts as liveness.
    while let Some(Ok(message)) = stream.next().await {
        state.mark_alive(&conn_id).await;
        match message {
            Message::Text(text) => handle_text(&state, &conn_id, text.as_str()).await,
            Message::Pong(_) => {},
            Message::Close(_) => break,
            // Pings are answered by the transport layer.
            Message::Ping(_) | Message::Binary(_) => {},
        }
    }

    writer.abort();
    state.remove_connection(&conn_id).await;
}

async fn handle_text(state: &Arc<HubState>, conn_id: &str, text: &str) {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        dispatch_fallback(state, conn_id, text).await;
        return;
    };

    match envelope.kind.as_str() {
        frames::SUBSCRIBE => {
            if let Some(channel) = envelope.str_field("channel") {
                state.subscribe_channel(conn_id, channel).await;
                ack(state, conn_id, frames::SUBSCRIBED, channel).await;
            }
        },
        frames::UNSUBSCRIBE => {
            if let Some(channel) = envelope.str_field("channel") {
                state.unsubscribe_channel(conn_id, channel).await;
                ack(state, conn_id, frames::UNSUBSCRIBED, channel).await;
            }
        },
        frames::PING => {
            state
                .send_to_client(conn_id, &Envelope::new(frames::PONG))
                .await;
        },
        frames::IDENTIFY => {
            let frame: IdentifyFrame =
                serde_json::from_value(envelope.data.clone()).unwrap_or_default();
            state
                .set_identity(conn_id, crate::connection::ConnectionIdentity {
                    user_id: frame.user_id,
                    site_id: frame.site_id,
                    device_uid: frame.device_uid,
                })
                .await;
        },
        kind => dispatch(state, conn_id, kind, envelope.clone()).await,
    }
}

async fn ack(state: &Arc<HubState>, conn_id: &str, kind: &str, channel: &str) {
    state
        .send_to_client(
            conn_id,
            &Envelope::with_data(kind, json!({ "channel": channel })),
        )
        .await;
}

/// Route an application frame to its registered handler.
async fn dispatch(state: &Arc<HubState>, conn_id: &str, kind: &str, envelope: Envelope) {
    let Some(handler) = state.handler_for(kind).await else {
        debug!(%conn_id, %kind, "no handler for message type");
        return;
    };
    let ctx = MessageContext {
        conn_id: conn_id.to_string(),
        envelope,
        state: Arc::clone(state),
    };
    if let Err(e) = handler.handle(ctx).await {
        warn!(%conn_id, %kind, error = %e, "message handler failed");
    }
}

/// Untyped or non-JSON payloads fall back to the generic message handler.
async fn dispatch_fallback(state: &Arc<HubState>, conn_id: &str, raw: &str) {
    let envelope = Envelope::with_data(frames::MESSAGE, json!({ "raw": raw }));
    dispatch(state, conn_id, frames::MESSAGE, envelope).await;
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {async_trait::async_trait, tokio::sync::mpsc};

    use super::*;
    use crate::{connection::OutboundFrame, state::HubMessageHandler};

    async fn connected_state() -> (Arc<HubState>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let state = HubState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register_connection(HubConnection::new("c1".to_string(), tx))
            .await;
        (state, rx)
    }

    fn sent_texts(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn subscribe_control_frame_is_acknowledged() {
        let (state, mut rx) = connected_state().await;

        handle_text(&state, "c1", r#"{"type":"subscribe","channel":"telemetry"}"#).await;
        let conn = state.get_connection("c1").await.unwrap();
        assert!(conn.channels.contains(&"telemetry".to_string()));
        let acks = sent_texts(&mut rx);
        assert!(acks[0].contains("subscribed"));

        handle_text(&state, "c1", r#"{"type":"unsubscribe","channel":"telemetry"}"#).await;
        let conn = state.get_connection("c1").await.unwrap();
        assert!(conn.channels.is_empty());
        assert!(sent_texts(&mut rx)[0].contains("unsubscribed"));
    }

    #[tokio::test]
    async fn ping_frame_gets_pong() {
        let (state, mut rx) = connected_state().await;
        handle_text(&state, "c1", r#"{"type":"ping"}"#).await;
        assert!(sent_texts(&mut rx)[0].contains("pong"));
    }

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl HubMessageHandler for Recorder {
        async fn handle(&self, ctx: MessageContext) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(ctx.envelope.kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn typed_frames_route_through_handler_map() {
        let (state, _rx) = connected_state().await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        state
            .add_message_handler("telemetry_request", Arc::clone(&recorder) as Arc<dyn HubMessageHandler>)
            .await;

        handle_text(&state, "c1", r#"{"type":"telemetry_request","siteId":"12"}"#).await;
        // Unregistered types are dropped quietly.
        handle_text(&state, "c1", r#"{"type":"unknown_kind"}"#).await;

        assert_eq!(
            recorder.0.lock().unwrap().clone(),
            vec!["telemetry_request".to_string()]
        );
    }

    #[tokio::test]
    async fn non_json_payloads_hit_the_fallback_handler() {
        let (state, _rx) = connected_state().await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        state
            .add_message_handler(frames::MESSAGE, Arc::clone(&recorder) as Arc<dyn HubMessageHandler>)
            .await;

        handle_text(&state, "c1", "not json at all").await;
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identify_frame_binds_connection_identity() {
        let (state, _rx) = connected_state().await;
        handle_text(
            &state,
            "c1",
            r#"{"type":"identify","user_id":"u-1","site_id":"12"}"#,
        )
        .await;
        let conn = state.get_connection("c1").await.unwrap();
        assert_eq!(conn.identity.user_id.as_deref(), Some("u-1"));
        assert_eq!(conn.identity.site_id.as_deref(), Some("12"));
    }
}
