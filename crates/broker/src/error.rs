use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid topic pattern `{pattern}`: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("not connected to broker")]
    NotConnected,

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
