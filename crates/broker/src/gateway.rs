//! The messaging gateway proper: local handler registry, broker-level
//! subscription reference counting, and inbound dispatch.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    serde::Serialize,
    tokio::{
        sync::{Mutex, RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, error, warn},
};

use gridlink_runtime::Service;

use crate::{
    config::{BrokerConfig, BrokerMode},
    error::BrokerError,
    topic,
    transport::{
        BrokerTransport, InboundMessage, MqttTransport, OfflineTransport, PublishOptions,
        TransportEvent,
    },
};

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Identifies one handler registration within a pattern's handler set.
pub type HandlerId = u64;

/// Inbound message handler. Errors are caught and logged by the dispatcher;
/// they never interrupt delivery to other handlers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: InboundMessage) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Subscriber {
    id: HandlerId,
    handler: Arc<dyn MessageHandler>,
}

type SubscriptionMap = HashMap<String, Vec<Subscriber>>;

// ── Gateway ──────────────────────────────────────────────────────────────────

/// Topic-based publish/subscribe client with wildcard routing.
pub struct MessagingGateway {
    config: BrokerConfig,
    transport: Arc<dyn BrokerTransport>,
    subscriptions: Arc<RwLock<SubscriptionMap>>,
    connected: Arc<AtomicBool>,
    next_handler_id: AtomicU64,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessagingGateway {
    pub fn new(config: BrokerConfig, transport: Arc<dyn BrokerTransport>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            next_handler_id: AtomicU64::new(1),
            event_task: Mutex::new(None),
        })
    }

    /// Build a gateway with the transport selected by `config.mode`.
    pub fn from_config(config: BrokerConfig) -> Arc<Self> {
        let transport: Arc<dyn BrokerTransport> = match config.mode {
            BrokerMode::Mqtt => MqttTransport::new(),
            BrokerMode::Offline => OfflineTransport::new(),
        };
        Self::new(config, transport)
    }

    /// Establish the broker session and begin dispatching inbound messages.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let rx = self.transport.connect(&self.config).await?;
        self.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(run_event_loop(
            rx,
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.connected),
            Arc::clone(&self.transport),
        ));
        *self.event_task.lock().await = Some(task);
        Ok(())
    }

    /// Tear down the session and stop the dispatch loop.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.transport.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register `handler` for `pattern`. The first handler for a
    /// previously-unseen pattern triggers the broker-level subscribe;
    /// later handlers are added locally only.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<HandlerId, BrokerError> {
        topic::validate_pattern(pattern)?;
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);

        let first_for_pattern = {
            let mut subs = self.subscriptions.write().await;
            let list = subs.entry(pattern.to_string()).or_default();
            let first = list.is_empty();
            list.push(Subscriber { id, handler });
            first
        };

        if first_for_pattern && self.is_connected() {
            if let Err(e) = self.transport.subscribe(pattern).await {
                let mut subs = self.subscriptions.write().await;
                if let Some(list) = subs.get_mut(pattern) {
                    list.retain(|s| s.id != id);
                    if list.is_empty() {
                        subs.remove(pattern);
                    }
                }
                return Err(e);
            }
        }
        debug!(%pattern, handler = id, "handler subscribed");
        Ok(id)
    }

    /// Remove one handler (`Some(id)`) or every handler (`None`) for
    /// `pattern`. The broker-level unsubscribe fires only once the local
    /// handler set becomes empty.
    pub async fn unsubscribe(
        &self,
        pattern: &str,
        handler: Option<HandlerId>,
    ) -> Result<(), BrokerError> {
        let emptied = {
            let mut subs = self.subscriptions.write().await;
            let Some(list) = subs.get_mut(pattern) else {
                return Ok(());
            };
            match handler {
                Some(id) => list.retain(|s| s.id != id),
                None => list.clear(),
            }
            if list.is_empty() {
                subs.remove(pattern);
                true
            } else {
                false
            }
        };

        if emptied && self.is_connected() {
            self.transport.unsubscribe(pattern).await?;
        }
        Ok(())
    }

    /// Publish raw bytes.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        opts: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.transport.publish(topic, payload.into(), opts).await
    }

    /// Serialize `payload` as JSON and publish it.
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        opts: PublishOptions,
    ) -> Result<(), BrokerError> {
        let bytes = serde_json::to_vec(payload)?;
        self.transport.publish(topic, bytes.into(), opts).await
    }

    /// Number of locally registered handlers for `pattern`.
    pub async fn handler_count(&self, pattern: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(pattern)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Service for MessagingGateway {
    async fn start(&self) -> anyhow::Result<()> {
        self.connect().await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.disconnect().await?;
        Ok(())
    }
}

// ── Event loop ───────────────────────────────────────────────────────────────

async fn run_event_loop(
    mut rx: mpsc::Receiver<TransportEvent>,
    subscriptions: Arc<RwLock<SubscriptionMap>>,
    connected: Arc<AtomicBool>,
    transport: Arc<dyn BrokerTransport>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Connected => {
                connected.store(true, Ordering::SeqCst);
                resubscribe_all(&subscriptions, transport.as_ref()).await;
            },
            TransportEvent::Message(msg) => {
                dispatch(&subscriptions, msg).await;
            },
            TransportEvent::Disconnected { fatal } => {
                connected.store(false, Ordering::SeqCst);
                if fatal {
                    error!("broker session terminated, reconnect budget exhausted");
                    break;
                }
            },
        }
    }
}

/// Re-assert every known pattern after a session (re)establishes.
async fn resubscribe_all(subscriptions: &RwLock<SubscriptionMap>, transport: &dyn BrokerTransport) {
    let patterns: Vec<String> = subscriptions.read().await.keys().cloned().collect();
    for pattern in patterns {
        if let Err(e) = transport.subscribe(&pattern).await {
            warn!(%pattern, error = %e, "re-subscribe failed");
        }
    }
}

/// Deliver `msg` to the exact-topic handler set first, then to every other
/// pattern that wildcard-matches. A handler error is logged and does not
/// interrupt delivery to the rest.
async fn dispatch(subscriptions: &RwLock<SubscriptionMap>, msg: InboundMessage) {
    let handlers: Vec<(String, Arc<dyn MessageHandler>)> = {
        let subs = subscriptions.read().await;
        let mut out = Vec::new();
        if let Some(list) = subs.get(&msg.topic) {
            for sub in list {
                out.push((msg.topic.clone(), Arc::clone(&sub.handler)));
            }
        }
        for (pattern, list) in subs.iter() {
            if pattern != &msg.topic && topic::matches(pattern, &msg.topic) {
                for sub in list {
                    out.push((pattern.clone(), Arc::clone(&sub.handler)));
                }
            }
        }
        out
    };

    for (pattern, handler) in handlers {
        if let Err(e) = handler.handle(msg.clone()).await {
            warn!(topic = %msg.topic, %pattern, error = %e, "message handler failed");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use super::*;

    /// Transport that records calls and lets tests inject inbound messages.
    #[derive(Default)]
    struct RecordingTransport {
        calls: StdMutex<Vec<String>>,
        events: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn inject(&self, topic: &str, payload: &str) {
            let tx = self.events.lock().unwrap().clone().unwrap();
            tx.send(TransportEvent::Message(InboundMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload.as_bytes()),
            }))
            .await
            .unwrap();
        }
    }

    #[async_trait]
    impl BrokerTransport for RecordingTransport {
        async fn connect(
            &self,
            _config: &BrokerConfig,
        ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError> {
            let (tx, rx) = mpsc::channel(16);
            *self.events.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn publish(
            &self,
            topic: &str,
            _payload: Bytes,
            _opts: PublishOptions,
        ) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().push(format!("pub:{topic}"));
            Ok(())
        }

        async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().push(format!("sub:{pattern}"));
            Ok(())
        }

        async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().push(format!("unsub:{pattern}"));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn collector() -> (Arc<StdMutex<Vec<String>>>, Arc<dyn MessageHandler>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = handler_fn(move |msg: InboundMessage| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(msg.topic);
                Ok(())
            }
        });
        (seen, handler)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn broker_subscribe_fires_once_per_pattern() {
        let transport = RecordingTransport::new();
        let gateway = MessagingGateway::new(
            BrokerConfig::default(),
            Arc::clone(&transport) as Arc<dyn BrokerTransport>,
        );
        gateway.connect().await.unwrap();

        let (_, first) = collector();
        let (_, second) = collector();
        let first_id = gateway.subscribe("site/1/t", first).await.unwrap();
        gateway.subscribe("site/1/t", second).await.unwrap();

        assert_eq!(
            transport
                .calls()
                .iter()
                .filter(|c| *c == "sub:site/1/t")
                .count(),
            1
        );

        // Removing one handler keeps the broker subscription alive.
        gateway.unsubscribe("site/1/t", Some(first_id)).await.unwrap();
        assert!(!transport.calls().contains(&"unsub:site/1/t".to_string()));
        assert_eq!(gateway.handler_count("site/1/t").await, 1);

        // Removing the rest releases it.
        gateway.unsubscribe("site/1/t", None).await.unwrap();
        assert!(transport.calls().contains(&"unsub:site/1/t".to_string()));
        assert_eq!(gateway.handler_count("site/1/t").await, 0);
    }

    #[tokio::test]
    async fn dispatch_hits_exact_and_wildcard_patterns() {
        let transport = RecordingTransport::new();
        let gateway = MessagingGateway::new(
            BrokerConfig::default(),
            Arc::clone(&transport) as Arc<dyn BrokerTransport>,
        );
        gateway.connect().await.unwrap();

        let (exact_seen, exact) = collector();
        let (wild_seen, wild) = collector();
        let (other_seen, other) = collector();
        gateway.subscribe("a/b", exact).await.unwrap();
        gateway.subscribe("a/+", wild).await.unwrap();
        gateway.subscribe("x/#", other).await.unwrap();

        transport.inject("a/b", "{}").await;

        wait_until(|| {
            exact_seen.lock().unwrap().len() == 1 && wild_seen.lock().unwrap().len() == 1
        })
        .await;
        assert!(other_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_error_does_not_block_other_handlers() {
        let transport = RecordingTransport::new();
        let gateway = MessagingGateway::new(
            BrokerConfig::default(),
            Arc::clone(&transport) as Arc<dyn BrokerTransport>,
        );
        gateway.connect().await.unwrap();

        let failing = handler_fn(|_msg: InboundMessage| async {
            anyhow::bail!("handler exploded")
        });
        let (seen, ok) = collector();
        gateway.subscribe("t", failing).await.unwrap();
        gateway.subscribe("t", ok).await.unwrap();

        transport.inject("t", "{}").await;

        wait_until(|| seen.lock().unwrap().len() == 1).await;
    }

    #[tokio::test]
    async fn offline_mode_accepts_publish_and_subscribe() {
        let gateway = MessagingGateway::from_config(BrokerConfig::offline());
        gateway.connect().await.unwrap();
        assert!(gateway.is_connected());

        let (_, handler) = collector();
        gateway.subscribe("any/topic", handler).await.unwrap();
        gateway
            .publish("any/topic", "payload", PublishOptions::default())
            .await
            .unwrap();

        gateway.disconnect().await.unwrap();
        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let gateway = MessagingGateway::from_config(BrokerConfig::offline());
        let (_, handler) = collector();
        let err = gateway.subscribe("a/#/b", handler).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidPattern { .. }));
    }
}
