//! Broadcast hub: bidirectional WebSocket connection manager.
//!
//! Tracks per-connection channel subscriptions, recognizes control frames
//! inline (`subscribe`/`unsubscribe`/`ping`), routes application frames
//! through a type→handler map, fans messages out to subscribers, and
//! evicts dead connections with a two-strike liveness sweep.

pub mod connection;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    connection::{ConnectionIdentity, ConnectionSnapshot, HubConnection, OutboundFrame},
    server::{BroadcastHub, HubConfig, router},
    state::{HubMessageHandler, HubState, MessageContext},
};
