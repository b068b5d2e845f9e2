//! Builders for the gateway's hierarchical topic space.
//!
//! Field devices publish under `site/{site}/device/{device}/...`; the
//! wiring layer subscribes with wildcards and relays into hub channels.

/// Telemetry topic for one device.
pub fn device_telemetry(site_id: &str, device_uid: &str) -> String {
    format!("site/{site_id}/device/{device_uid}/telemetry")
}

/// Status (online/offline) topic for one device.
pub fn device_status(site_id: &str, device_uid: &str) -> String {
    format!("site/{site_id}/device/{device_uid}/status")
}

/// Wildcard pattern matching telemetry from every device on every site.
pub const ALL_TELEMETRY: &str = "site/+/device/+/telemetry";

/// Wildcard pattern matching status messages from every device.
pub const ALL_STATUS: &str = "site/+/device/+/status";

/// Extract `(site_id, device_uid)` from a `site/{s}/device/{d}/...` topic.
pub fn parse_device_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.split('/');
    if parts.next() != Some("site") {
        return None;
    }
    let site = parts.next()?;
    if parts.next() != Some("device") {
        return None;
    }
    let device = parts.next()?;
    if site.is_empty() || device.is_empty() {
        return None;
    }
    Some((site, device))
}
