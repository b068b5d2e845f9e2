//! Broker transports.
//!
//! [`BrokerTransport`] is the seam between the gateway and the wire: the
//! gateway owns subscriptions and dispatch, the transport owns the
//! session. [`MqttTransport`] speaks MQTT via rumqttc; [`OfflineTransport`]
//! accepts every call locally and only logs, for environments without a
//! reachable broker.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    bytes::Bytes,
    rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS},
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, error, info, warn},
};

use crate::{config::BrokerConfig, error::BrokerError};

// ── Types ────────────────────────────────────────────────────────────────────

/// An inbound message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish options forwarded to the broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub retain: bool,
    /// Quality of service level, 0..=2. Values above 2 clamp to 2.
    pub qos: u8,
}

/// Session events surfaced to the gateway.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Session (re)established. The gateway re-subscribes its pattern set.
    Connected,
    Message(InboundMessage),
    /// Session lost. `fatal` once the reconnect budget is exhausted.
    Disconnected { fatal: bool },
}

/// A connection to a publish/subscribe broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establish the session and return the event stream.
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> Result<(), BrokerError>;

    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

// ── MQTT transport ───────────────────────────────────────────────────────────

/// Real MQTT session backed by rumqttc.
#[derive(Default)]
pub struct MqttTransport {
    client: RwLock<Option<AsyncClient>>,
}

impl MqttTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError> {
        let mut options =
            MqttOptions::new(config.client_id_or_random(), &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        *self.client.write().await = Some(client);

        let (tx, rx) = mpsc::channel(256);
        let max_attempts = config.reconnect.max_attempts;
        let retry_delay = Duration::from_millis(config.reconnect.delay_ms);
        let broker = format!("{}:{}", config.host, config.port);

        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        failures = 0;
                        info!(%broker, "mqtt session established");
                        if tx.send(TransportEvent::Connected).await.is_err() {
                            break;
                        }
                    },
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        if tx.send(TransportEvent::Message(msg)).await.is_err() {
                            break;
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        failures += 1;
                        if failures >= max_attempts {
                            error!(%broker, attempts = failures, error = %e,
                                "reconnect budget exhausted, terminating mqtt session");
                            let _ = tx.send(TransportEvent::Disconnected { fatal: true }).await;
                            break;
                        }
                        warn!(%broker, attempt = failures, max = max_attempts, error = %e,
                            "mqtt connection lost, retrying");
                        if tx
                            .send(TransportEvent::Disconnected { fatal: false })
                            .await
                            .is_err()
                        {
                            break;
                        }
                        tokio::time::sleep(retry_delay).await;
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> Result<(), BrokerError> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(BrokerError::NotConnected)?;
        client
            .publish(topic, qos_level(opts.qos), opts.retain, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(BrokerError::NotConnected)?;
        client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(BrokerError::NotConnected)?;
        client
            .unsubscribe(pattern)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(client) = self.client.write().await.take() {
            // Dropping the event loop after disconnect ends the poll task.
            let _ = client.disconnect().await;
        }
        Ok(())
    }
}

// ── Offline transport ────────────────────────────────────────────────────────

/// Log-only transport: every call succeeds without touching a broker.
#[derive(Default)]
pub struct OfflineTransport {
    // Held so the gateway's event receiver stays open for the session.
    events: RwLock<Option<mpsc::Sender<TransportEvent>>>,
}

impl OfflineTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BrokerTransport for OfflineTransport {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError> {
        info!(client_id = %config.client_id_or_random(), "offline broker mode, no session opened");
        let (tx, rx) = mpsc::channel(8);
        let _ = tx.send(TransportEvent::Connected).await;
        *self.events.write().await = Some(tx);
        Ok(rx)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _opts: PublishOptions,
    ) -> Result<(), BrokerError> {
        debug!(%topic, bytes = payload.len(), "offline publish dropped");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        debug!(%pattern, "offline subscribe recorded");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        debug!(%pattern, "offline unsubscribe recorded");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.events.write().await.take();
        Ok(())
    }
}
