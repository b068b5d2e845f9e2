//! Storage abstraction for provisioning state.
//!
//! The platform's durable store is an external collaborator; this trait is
//! the CRUD surface the subsystem needs from it. [`MemoryStore`] backs
//! tests and single-node deployments.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio::sync::RwLock,
};

use crate::model::{
    CodeRejection, CredentialRecord, Device, HistoryEntry, ProvisioningTemplate, RegistrationCode,
};

/// Outcome of an atomic code redemption.
#[derive(Debug, Clone)]
pub enum CodeConsumption {
    /// The code was valid; the returned copy reflects the incremented use
    /// count (and deactivation, for one-time codes).
    Consumed(RegistrationCode),
    Rejected(CodeRejection),
}

#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    // ---- devices ----
    async fn insert_device(&self, device: Device) -> anyhow::Result<Device>;
    async fn get_device(&self, id: i64) -> anyhow::Result<Option<Device>>;
    async fn get_device_by_uid(&self, uid: &str) -> anyhow::Result<Option<Device>>;
    async fn list_devices(&self) -> anyhow::Result<Vec<Device>>;
    async fn update_device(&self, device: &Device) -> anyhow::Result<()>;

    // ---- templates ----
    async fn insert_template(
        &self,
        template: ProvisioningTemplate,
    ) -> anyhow::Result<ProvisioningTemplate>;
    async fn get_template(&self, id: i64) -> anyhow::Result<Option<ProvisioningTemplate>>;
    async fn list_templates(&self) -> anyhow::Result<Vec<ProvisioningTemplate>>;

    // ---- registration codes ----
    async fn insert_code(&self, code: RegistrationCode) -> anyhow::Result<RegistrationCode>;
    async fn get_code_by_value(&self, code: &str) -> anyhow::Result<Option<RegistrationCode>>;
    async fn list_codes(&self) -> anyhow::Result<Vec<RegistrationCode>>;

    /// Validate and redeem `code` in one conditional update: the use count
    /// is incremented (and a one-time code deactivated) only if the code is
    /// active, unexpired, and under its use limit at the moment of the
    /// call. Never check-then-act around this from the outside.
    async fn consume_code(&self, code: &str, now: DateTime<Utc>) -> anyhow::Result<CodeConsumption>;

    // ---- credentials ----
    /// Store a credential set. Any previously active set for the same
    /// (device, method) pair is deactivated in the same update.
    async fn insert_credentials(
        &self,
        record: CredentialRecord,
    ) -> anyhow::Result<CredentialRecord>;
    async fn credentials_for_device(&self, device_id: i64)
    -> anyhow::Result<Vec<CredentialRecord>>;

    // ---- history ----
    async fn append_history(&self, entry: HistoryEntry) -> anyhow::Result<HistoryEntry>;
    async fn history_for_device(&self, device_id: i64) -> anyhow::Result<Vec<HistoryEntry>>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    devices: HashMap<i64, Device>,
    templates: HashMap<i64, ProvisioningTemplate>,
    codes: HashMap<i64, RegistrationCode>,
    credentials: Vec<CredentialRecord>,
    history: Vec<HistoryEntry>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`ProvisioningStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProvisioningStore for MemoryStore {
    async fn insert_device(&self, mut device: Device) -> anyhow::Result<Device> {
        let mut tables = self.tables.write().await;
        device.id = tables.next_id();
        tables.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn get_device(&self, id: i64) -> anyhow::Result<Option<Device>> {
        Ok(self.tables.read().await.devices.get(&id).cloned())
    }

    async fn get_device_by_uid(&self, uid: &str) -> anyhow::Result<Option<Device>> {
        Ok(self
            .tables
            .read()
            .await
            .devices
            .values()
            .find(|d| d.uid == uid)
            .cloned())
    }

    async fn list_devices(&self) -> anyhow::Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.tables.read().await.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.id);
        Ok(devices)
    }

    async fn update_device(&self, device: &Device) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        match tables.devices.get_mut(&device.id) {
            Some(slot) => {
                *slot = device.clone();
                Ok(())
            },
            None => anyhow::bail!("device {} does not exist", device.id),
        }
    }

    async fn insert_template(
        &self,
        mut template: ProvisioningTemplate,
    ) -> anyhow::Result<ProvisioningTemplate> {
        let mut tables = self.tables.write().await;
        template.id = tables.next_id();
        tables.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: i64) -> anyhow::Result<Option<ProvisioningTemplate>> {
        Ok(self.tables.read().await.templates.get(&id).cloned())
    }

    async fn list_templates(&self) -> anyhow::Result<Vec<ProvisioningTemplate>> {
        let mut templates: Vec<ProvisioningTemplate> =
            self.tables.read().await.templates.values().cloned().collect();
        templates.sort_by_key(|t| t.id);
        Ok(templates)
    }

    async fn insert_code(&self, mut code: RegistrationCode) -> anyhow::Result<RegistrationCode> {
        let mut tables = self.tables.write().await;
        code.id = tables.next_id();
        tables.codes.insert(code.id, code.clone());
        Ok(code)
    }

    async fn get_code_by_value(&self, code: &str) -> anyhow::Result<Option<RegistrationCode>> {
        Ok(self
            .tables
            .read()
            .await
            .codes
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_codes(&self) -> anyhow::Result<Vec<RegistrationCode>> {
        let mut codes: Vec<RegistrationCode> =
            self.tables.read().await.codes.values().cloned().collect();
        codes.sort_by_key(|c| c.id);
        Ok(codes)
    }

    async fn consume_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CodeConsumption> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.codes.values_mut().find(|c| c.code == code) else {
            return Ok(CodeConsumption::Rejected(CodeRejection::NotFound));
        };
        let check = row.check(now);
        if let Some(reason) = check.reason {
            return Ok(CodeConsumption::Rejected(reason));
        }
        row.use_count += 1;
        if row.is_one_time || row.use_count >= row.max_uses {
            row.is_active = false;
        }
        Ok(CodeConsumption::Consumed(row.clone()))
    }

    async fn insert_credentials(
        &self,
        mut record: CredentialRecord,
    ) -> anyhow::Result<CredentialRecord> {
        let mut tables = self.tables.write().await;
        for existing in tables
            .credentials
            .iter_mut()
            .filter(|c| c.device_id == record.device_id && c.method == record.method)
        {
            existing.is_active = false;
        }
        record.id = tables.next_id();
        tables.credentials.push(record.clone());
        Ok(record)
    }

    async fn credentials_for_device(
        &self,
        device_id: i64,
    ) -> anyhow::Result<Vec<CredentialRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .credentials
            .iter()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn append_history(&self, mut entry: HistoryEntry) -> anyhow::Result<HistoryEntry> {
        let mut tables = self.tables.write().await;
        entry.id = tables.next_id();
        tables.history.push(entry.clone());
        Ok(entry)
    }

    async fn history_for_device(&self, device_id: i64) -> anyhow::Result<Vec<HistoryEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .iter()
            .filter(|h| h.device_id == device_id)
            .cloned()
            .collect())
    }
}
