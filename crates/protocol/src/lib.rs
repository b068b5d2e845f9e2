//! Wire protocol shared between the broadcast hub, its clients, and the
//! messaging gateway: JSON envelopes, reserved frame types, topic helpers,
//! and timing constants.

use serde::{Deserialize, Serialize};

pub mod topics;

/// Protocol version advertised in the `connected` greeting.
pub const PROTOCOL_VERSION: u16 = 1;

/// Interval between liveness sweeps on the hub, in milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Reserved envelope types handled inline by the hub.
pub mod frames {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const IDENTIFY: &str = "identify";
    pub const ERROR: &str = "error";

    /// Fallback handler key for untyped or non-JSON payloads.
    pub const MESSAGE: &str = "message";

    /// True when `kind` is handled inline by the hub rather than routed
    /// through the application handler map.
    pub fn is_reserved(kind: &str) -> bool {
        matches!(
            kind,
            SUBSCRIBE | UNSUBSCRIBE | PING | PONG | CONNECTED | SUBSCRIBED | UNSUBSCRIBED
        )
    }
}

/// A typed JSON envelope. Everything besides `type` stays in `data` so
/// application frames can carry arbitrary fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_data(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Fetch a string field from the envelope body.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Body of a `subscribe` / `unsubscribe` control frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub channel: String,
}

/// Body of an `identify` frame binding a connection to platform entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyFrame {
    pub user_id: Option<String>,
    pub site_id: Option<String>,
    pub device_uid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_extra_fields() {
        let raw = r#"{"type":"subscribe","channel":"telemetry"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, "subscribe");
        assert_eq!(env.str_field("channel"), Some("telemetry"));
    }

    #[test]
    fn reserved_types_cover_control_frames() {
        assert!(frames::is_reserved("ping"));
        assert!(frames::is_reserved("subscribed"));
        assert!(!frames::is_reserved("telemetry"));
        assert!(!frames::is_reserved("message"));
    }
}
