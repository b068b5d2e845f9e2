//! Messaging gateway: a topic-based publish/subscribe client.
//!
//! The gateway tracks local handler subscriptions (exact topics and
//! `+`/`#` wildcard patterns), keeps the broker-level subscription set in
//! lockstep (one subscription per distinct pattern), dispatches inbound
//! messages to every matching handler set, and reconnects with a bounded
//! budget. The broker connection itself sits behind [`BrokerTransport`],
//! with an MQTT implementation and a log-only offline one.

pub mod config;
pub mod error;
pub mod gateway;
pub mod topic;
pub mod transport;

pub use {
    config::{BrokerConfig, BrokerMode, ReconnectPolicy},
    error::BrokerError,
    gateway::{HandlerId, MessageHandler, MessagingGateway, handler_fn},
    transport::{
        BrokerTransport, InboundMessage, MqttTransport, OfflineTransport, PublishOptions,
        TransportEvent,
    },
};
