//! Bridges between the messaging gateway and the rest of the platform:
//! field-device telemetry fans out to hub subscribers, device status
//! messages feed the provisioning registry's online/last-seen state.

use std::sync::Arc;

use {serde_json::json, tracing::debug};

use {
    gridlink_broker::{InboundMessage, MessagingGateway, handler_fn},
    gridlink_hub::HubState,
    gridlink_protocol::{Envelope, topics},
    gridlink_provisioning::{ProvisioningError, ProvisioningService},
};

/// Hub channels fed by the relay.
const TELEMETRY_CHANNEL: &str = "telemetry";
const DEVICES_CHANNEL: &str = "devices";

pub async fn install(
    gateway: &MessagingGateway,
    hub: Arc<HubState>,
    provisioning: Arc<ProvisioningService>,
) -> anyhow::Result<()> {
    let telemetry_hub = Arc::clone(&hub);
    gateway
        .subscribe(
            topics::ALL_TELEMETRY,
            handler_fn(move |msg: InboundMessage| {
                let hub = Arc::clone(&telemetry_hub);
                async move { relay_telemetry(&hub, &msg).await }
            }),
        )
        .await?;

    gateway
        .subscribe(
            topics::ALL_STATUS,
            handler_fn(move |msg: InboundMessage| {
                let hub = Arc::clone(&hub);
                let provisioning = Arc::clone(&provisioning);
                async move { relay_status(&hub, &provisioning, &msg).await }
            }),
        )
        .await?;

    Ok(())
}

async fn relay_telemetry(hub: &HubState, msg: &InboundMessage) -> anyhow::Result<()> {
    let Some((site_id, device_uid)) = topics::parse_device_topic(&msg.topic) else {
        return Ok(());
    };
    let data: serde_json::Value = serde_json::from_slice(&msg.payload)
        .unwrap_or_else(|_| json!(String::from_utf8_lossy(&msg.payload)));

    let envelope = Envelope::with_data(
        TELEMETRY_CHANNEL,
        json!({ "siteId": site_id, "deviceUid": device_uid, "data": data }),
    );
    hub.publish_to_channel(TELEMETRY_CHANNEL, &envelope).await;
    Ok(())
}

async fn relay_status(
    hub: &HubState,
    provisioning: &ProvisioningService,
    msg: &InboundMessage,
) -> anyhow::Result<()> {
    let Some((site_id, device_uid)) = topics::parse_device_topic(&msg.topic) else {
        return Ok(());
    };
    let online = parse_online(&msg.payload);

    match provisioning.update_device_status(device_uid, online).await {
        Ok(_) => {},
        // Status from devices we have not onboarded yet is expected noise.
        Err(ProvisioningError::NotFound { .. }) => {
            debug!(%device_uid, "status for unregistered device ignored");
            return Ok(());
        },
        Err(e) => return Err(e.into()),
    }

    let envelope = Envelope::with_data(
        "device_status",
        json!({ "siteId": site_id, "deviceUid": device_uid, "online": online }),
    );
    hub.publish_to_channel(DEVICES_CHANNEL, &envelope).await;
    Ok(())
}

/// Devices report status as `{"online": bool}` JSON or a bare
/// `online`/`offline` string.
fn parse_online(payload: &[u8]) -> bool {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload)
        && let Some(online) = value.get("online").and_then(|v| v.as_bool())
    {
        return online;
    }
    String::from_utf8_lossy(payload).trim().eq_ignore_ascii_case("online")
}
