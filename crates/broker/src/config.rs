use serde::{Deserialize, Serialize};

/// Which transport backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// Real MQTT broker connection.
    #[default]
    Mqtt,
    /// No broker: publish/subscribe succeed locally and are only logged.
    /// Useful for development environments without a reachable broker.
    Offline,
}

/// Bounded reconnection policy for unexpected disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before the session is abandoned.
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 5_000,
        }
    }
}

/// Gateway session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    pub host: String,
    pub port: u16,
    /// Client id presented to the broker. A random suffix is appended when
    /// unset so parallel instances do not evict each other.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Mqtt,
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 60,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn offline() -> Self {
        Self {
            mode: BrokerMode::Offline,
            ..Self::default()
        }
    }

    pub fn client_id_or_random(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("gridlink-{}", uuid::Uuid::new_v4()))
    }
}
