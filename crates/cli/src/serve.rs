//! `gridlink serve`: construct the subsystems, register them with the
//! lifecycle registry, wire the gateway↔hub↔provisioning bridges, run
//! until interrupted.

use std::{path::PathBuf, sync::Arc};

use {async_trait::async_trait, tracing::info};

use {
    gridlink_broker::MessagingGateway,
    gridlink_config::GridlinkConfig,
    gridlink_hub::{BroadcastHub, HubState},
    gridlink_protocol::Envelope,
    gridlink_provisioning::{
        Device, DeviceAnnouncer, MemoryStore, ProvisioningService, ProvisioningStore,
    },
    gridlink_runtime::{Service, ServiceConfig, ServiceRegistry},
};

use crate::relay;

/// Announces newly registered devices on the hub's `devices` channel.
struct HubAnnouncer {
    hub: Arc<HubState>,
}

#[async_trait]
impl DeviceAnnouncer for HubAnnouncer {
    async fn device_registered(&self, device: &Device) {
        let envelope = Envelope::with_data(
            "device_registered",
            serde_json::json!({
                "uid": device.uid,
                "deviceType": device.device_type,
                "status": device.status,
            }),
        );
        self.hub.publish_to_channel("devices", &envelope).await;
    }
}

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config: GridlinkConfig = match config_path {
        Some(path) => gridlink_config::load_config(&path)?,
        None => gridlink_config::discover_and_load(),
    };

    // Explicit construction, threaded through setup: one instance of each
    // subsystem per process, no hidden globals.
    let registry = ServiceRegistry::new();
    let gateway = MessagingGateway::from_config(config.broker.clone());
    let hub = BroadcastHub::new(config.hub.clone());

    let store: Arc<dyn ProvisioningStore> = Arc::new(MemoryStore::new());
    let provisioning = Arc::new(
        ProvisioningService::new(store, config.provisioning.clone()).with_announcer(Arc::new(
            HubAnnouncer { hub: hub.state() },
        )),
    );

    registry
        .register(
            "broker",
            Arc::clone(&gateway) as Arc<dyn Service>,
            ServiceConfig::default(),
        )
        .await;
    registry
        .register(
            "hub",
            Arc::clone(&hub) as Arc<dyn Service>,
            ServiceConfig::default(),
        )
        .await;

    registry.start_all().await?;
    relay::install(&gateway, hub.state(), Arc::clone(&provisioning)).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        hub = %format!("{}:{}", config.hub.bind, config.hub.port),
        "gridlink running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    registry.stop_all().await?;
    Ok(())
}
