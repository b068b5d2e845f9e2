/// Root config schema. Every section has full defaults so an empty (or
/// absent) config file yields a runnable local setup: MQTT on localhost,
/// hub on a loopback port, in-memory provisioning store.
use serde::{Deserialize, Serialize};

use {
    gridlink_broker::BrokerConfig, gridlink_hub::HubConfig,
    gridlink_provisioning::ProvisioningConfig,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridlinkConfig {
    pub broker: BrokerConfig,
    pub hub: HubConfig,
    pub provisioning: ProvisioningConfig,
}
