//! Provisioning operations: registration, codes, templates, credentials.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::{Duration, Utc},
    qrcode::{QrCode, render::svg},
    serde::{Deserialize, Serialize},
    serde_json::json,
    tracing::info,
};

use crate::{
    credentials,
    error::ProvisioningError,
    model::{
        AuthMethod, CodeValidation, CredentialRecord, Device, DeviceType, DeviceUpdate,
        HistoryEntry, IssuedCode, IssuedCredentials, NewDevice, NewTemplate, ProvisioningTemplate,
        RegistrationCode, RegistrationStatus,
    },
    store::{CodeConsumption, ProvisioningStore},
};

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Base URL embedded in registration links and QR codes.
    pub registration_base_url: String,
    pub code_length: usize,
    pub default_expiry_hours: i64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            registration_base_url: "http://localhost:18890".to_string(),
            code_length: 10,
            default_expiry_hours: 24,
        }
    }
}

/// Parameters for issuing a registration code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeRequest {
    pub device_type: Option<DeviceType>,
    pub template_id: Option<i64>,
    /// Hours until expiry; the configured default when unset.
    pub expiry_hours: Option<i64>,
    pub is_one_time: bool,
    pub max_uses: Option<u32>,
    pub with_qr: bool,
}

/// Callback for announcing newly registered devices (wired to the
/// broadcast hub by the application).
#[async_trait]
pub trait DeviceAnnouncer: Send + Sync {
    async fn device_registered(&self, device: &Device);
}

// ── Service ──────────────────────────────────────────────────────────────────

/// The provisioning subsystem. One instance per process, handed its store
/// and announcer explicitly.
pub struct ProvisioningService {
    store: Arc<dyn ProvisioningStore>,
    config: ProvisioningConfig,
    announcer: Option<Arc<dyn DeviceAnnouncer>>,
}

impl ProvisioningService {
    pub fn new(store: Arc<dyn ProvisioningStore>, config: ProvisioningConfig) -> Self {
        Self {
            store,
            config,
            announcer: None,
        }
    }

    pub fn with_announcer(mut self, announcer: Arc<dyn DeviceAnnouncer>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    // ---- devices ----

    /// Register a device under a globally unique uid.
    pub async fn register_device(&self, new: NewDevice) -> Result<Device, ProvisioningError> {
        if new.uid.trim().is_empty() {
            return Err(ProvisioningError::validation("device uid must not be empty"));
        }
        if self.store.get_device_by_uid(&new.uid).await?.is_some() {
            return Err(ProvisioningError::validation(format!(
                "device uid already registered: {}",
                new.uid
            )));
        }

        let now = Utc::now();
        let device = self
            .store
            .insert_device(Device {
                id: 0,
                uid: new.uid,
                device_type: new.device_type,
                name: new.name,
                status: RegistrationStatus::Registered,
                firmware_version: new.firmware_version,
                location: new.location,
                metadata: new.metadata,
                online: false,
                last_seen: None,
                last_connected: None,
                auth_method: AuthMethod::None,
                registered_at: now,
            })
            .await?;

        self.record(&device, "registered", json!({ "device_type": device.device_type }))
            .await?;
        info!(uid = %device.uid, device_type = %device.device_type, "device registered");

        if let Some(announcer) = &self.announcer {
            announcer.device_registered(&device).await;
        }
        Ok(device)
    }

    pub async fn get_device(&self, id: i64) -> Result<Device, ProvisioningError> {
        self.store
            .get_device(id)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("device", id.to_string()))
    }

    pub async fn get_device_by_uid(&self, uid: &str) -> Result<Device, ProvisioningError> {
        self.store
            .get_device_by_uid(uid)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("device", uid))
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, ProvisioningError> {
        Ok(self.store.list_devices().await?)
    }

    /// Apply a metadata/status patch. Status changes are validated against
    /// the registration state machine.
    pub async fn update_device(
        &self,
        uid: &str,
        patch: DeviceUpdate,
    ) -> Result<Device, ProvisioningError> {
        let mut device = self.get_device_by_uid(uid).await?;

        if let Some(status) = patch.status
            && status != device.status
        {
            if !device.status.can_transition_to(status) {
                return Err(ProvisioningError::validation(format!(
                    "invalid status transition: {} -> {status}",
                    device.status
                )));
            }
            self.record(
                &device,
                "status_changed",
                json!({ "from": device.status, "to": status }),
            )
            .await?;
            device.status = status;
        }
        if let Some(name) = patch.name {
            device.name = Some(name);
        }
        if let Some(firmware) = patch.firmware_version {
            device.firmware_version = Some(firmware);
        }
        if let Some(location) = patch.location {
            device.location = Some(location);
        }
        if let Some(metadata) = patch.metadata {
            device.metadata = metadata;
        }

        self.store.update_device(&device).await?;
        Ok(device)
    }

    /// Bridge from gateway/hub liveness signals into device state.
    pub async fn update_device_status(
        &self,
        uid: &str,
        online: bool,
    ) -> Result<Device, ProvisioningError> {
        let mut device = self.get_device_by_uid(uid).await?;
        let now = Utc::now();
        device.online = online;
        device.last_seen = Some(now);
        if online {
            device.last_connected = Some(now);
        }
        self.store.update_device(&device).await?;
        Ok(device)
    }

    // ---- registration codes ----

    /// Issue a registration code, optionally bound to a device type and a
    /// provisioning template, optionally with a QR rendering of the
    /// registration URL.
    pub async fn generate_registration_code(
        &self,
        request: CodeRequest,
    ) -> Result<IssuedCode, ProvisioningError> {
        let max_uses = request.max_uses.unwrap_or(1);
        if max_uses == 0 {
            return Err(ProvisioningError::validation("max_uses must be at least 1"));
        }

        let mut device_type = request.device_type;
        if let Some(template_id) = request.template_id {
            let template = self.template(template_id).await?;
            if let Some(requested) = device_type
                && requested != template.device_type
            {
                return Err(ProvisioningError::validation(format!(
                    "code device type {requested} does not match template device type {}",
                    template.device_type
                )));
            }
            device_type = Some(template.device_type);
        }

        let now = Utc::now();
        let expiry_hours = request.expiry_hours.unwrap_or(self.config.default_expiry_hours);
        let code = self
            .store
            .insert_code(RegistrationCode {
                id: 0,
                code: credentials::random_string(self.config.code_length).to_uppercase(),
                device_type,
                template_id: request.template_id,
                expires_at: now + Duration::hours(expiry_hours),
                is_one_time: request.is_one_time,
                use_count: 0,
                max_uses,
                is_active: true,
                created_at: now,
            })
            .await?;

        let registration_url = self.registration_url(&code.code);
        let qr_svg = if request.with_qr {
            Some(render_qr(&registration_url)?)
        } else {
            None
        };
        info!(code = %code.code, device_type = ?code.device_type, "registration code issued");

        Ok(IssuedCode {
            code,
            registration_url,
            qr_svg,
        })
    }

    /// Pure validity check; never mutates the code.
    pub async fn validate_registration_code(
        &self,
        code: &str,
    ) -> Result<CodeValidation, ProvisioningError> {
        match self.store.get_code_by_value(code).await? {
            Some(row) => Ok(row.check(Utc::now())),
            None => Ok(CodeValidation::invalid(crate::model::CodeRejection::NotFound)),
        }
    }

    /// Redeem a registration code and register the device in one
    /// operation. The code's use count moves only after every precondition
    /// (unique uid, matching device type) has passed, and the
    /// validate-and-redeem step itself is a single conditional store
    /// update. A template bound to the code is applied immediately.
    pub async fn register_device_with_code(
        &self,
        code: &str,
        new: NewDevice,
    ) -> Result<Device, ProvisioningError> {
        if self.store.get_device_by_uid(&new.uid).await?.is_some() {
            return Err(ProvisioningError::validation(format!(
                "device uid already registered: {}",
                new.uid
            )));
        }

        let row = self
            .store
            .get_code_by_value(code)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("registration code", code))?;
        if let Some(required) = row.device_type
            && required != new.device_type
        {
            return Err(ProvisioningError::validation(format!(
                "registration code is bound to device type {required}, got {}",
                new.device_type
            )));
        }

        let consumed = match self.store.consume_code(code, Utc::now()).await? {
            CodeConsumption::Consumed(row) => row,
            CodeConsumption::Rejected(reason) => {
                return Err(ProvisioningError::CodeRejected(reason));
            },
        };

        let device = self.register_device(new).await?;
        match consumed.template_id {
            Some(template_id) => self.apply_template(device.id, template_id).await,
            None => Ok(device),
        }
    }

    pub async fn list_codes(&self) -> Result<Vec<RegistrationCode>, ProvisioningError> {
        Ok(self.store.list_codes().await?)
    }

    /// QR rendering of an existing code's registration URL.
    pub async fn registration_code_qr(&self, code: &str) -> Result<String, ProvisioningError> {
        let row = self
            .store
            .get_code_by_value(code)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("registration code", code))?;
        render_qr(&self.registration_url(&row.code))
    }

    // ---- templates ----

    pub async fn create_template(
        &self,
        new: NewTemplate,
    ) -> Result<ProvisioningTemplate, ProvisioningError> {
        Ok(self
            .store
            .insert_template(ProvisioningTemplate {
                id: 0,
                name: new.name,
                device_type: new.device_type,
                configuration: new.configuration,
                default_settings: new.default_settings,
                required_capabilities: new.required_capabilities,
                auth_method: new.auth_method,
                is_active: true,
            })
            .await?)
    }

    pub async fn get_template(
        &self,
        id: i64,
    ) -> Result<ProvisioningTemplate, ProvisioningError> {
        self.template(id).await
    }

    pub async fn list_templates(&self) -> Result<Vec<ProvisioningTemplate>, ProvisioningError> {
        Ok(self.store.list_templates().await?)
    }

    /// Apply `template_id` to a device of the same type: transition to
    /// `provisioning`, merge the template's configuration into the device
    /// metadata, transition to `active`, and issue credentials for the
    /// template's auth method.
    pub async fn apply_template(
        &self,
        device_id: i64,
        template_id: i64,
    ) -> Result<Device, ProvisioningError> {
        let mut device = self.get_device(device_id).await?;
        let template = self.template(template_id).await?;

        if !template.is_active {
            return Err(ProvisioningError::validation(format!(
                "template is not active: {}",
                template.name
            )));
        }
        if device.device_type != template.device_type {
            return Err(ProvisioningError::validation(format!(
                "template targets device type {}, device is {}",
                template.device_type, device.device_type
            )));
        }
        if !device.status.can_transition_to(RegistrationStatus::Provisioning) {
            return Err(ProvisioningError::validation(format!(
                "cannot provision a device in status {}",
                device.status
            )));
        }

        device.status = RegistrationStatus::Provisioning;
        self.store.update_device(&device).await?;
        self.record(
            &device,
            "template_applied",
            json!({ "template_id": template.id, "template": template.name }),
        )
        .await?;

        merge_configuration(&mut device, &template);
        device.status = RegistrationStatus::Active;
        self.store.update_device(&device).await?;
        self.record(&device, "activated", json!({ "template_id": template.id }))
            .await?;
        info!(uid = %device.uid, template = %template.name, "template applied");

        if template.auth_method != AuthMethod::None {
            self.create_device_credentials(device.id, template.auth_method)
                .await?;
            device = self.get_device(device_id).await?;
        }
        Ok(device)
    }

    // ---- credentials ----

    /// Generate and store credentials for `method`, deactivating any
    /// previous active set for the same (device, method) pair and
    /// recording the method on the device.
    pub async fn create_device_credentials(
        &self,
        device_id: i64,
        method: AuthMethod,
    ) -> Result<IssuedCredentials, ProvisioningError> {
        if method == AuthMethod::Oauth {
            return Err(ProvisioningError::validation(
                "oauth credentials are issued by the external identity provider",
            ));
        }
        let mut device = self.get_device(device_id).await?;
        let now = Utc::now();
        let generated = credentials::generate(method, &device.uid, now)?;

        let record = self
            .store
            .insert_credentials(CredentialRecord {
                id: 0,
                device_id,
                method,
                secrets: generated.secrets,
                valid_until: generated.valid_until,
                is_active: true,
                created_at: now,
            })
            .await?;

        device.auth_method = method;
        self.store.update_device(&device).await?;
        self.record(&device, "credentials_issued", json!({ "method": method }))
            .await?;

        Ok(IssuedCredentials {
            record,
            password: generated.password,
        })
    }

    pub async fn credentials_for_device(
        &self,
        device_id: i64,
    ) -> Result<Vec<CredentialRecord>, ProvisioningError> {
        Ok(self.store.credentials_for_device(device_id).await?)
    }

    pub async fn history_for_device(
        &self,
        device_id: i64,
    ) -> Result<Vec<HistoryEntry>, ProvisioningError> {
        Ok(self.store.history_for_device(device_id).await?)
    }

    // ---- helpers ----

    async fn template(&self, id: i64) -> Result<ProvisioningTemplate, ProvisioningError> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("template", id.to_string()))
    }

    fn registration_url(&self, code: &str) -> String {
        format!(
            "{}/register?code={code}",
            self.config.registration_base_url.trim_end_matches('/')
        )
    }

    async fn record(
        &self,
        device: &Device,
        action: &str,
        detail: serde_json::Value,
    ) -> Result<(), ProvisioningError> {
        self.store
            .append_history(HistoryEntry {
                id: 0,
                device_id: device.id,
                action: action.to_string(),
                detail,
                at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

/// Defaults first, then the template configuration on top, merged into the
/// device metadata.
fn merge_configuration(device: &mut Device, template: &ProvisioningTemplate) {
    let mut config = serde_json::Map::new();
    for source in [&template.default_settings, &template.configuration] {
        if let Some(object) = source.as_object() {
            for (key, value) in object {
                config.insert(key.clone(), value.clone());
            }
        }
    }
    if !device.metadata.is_object() {
        device.metadata = json!({});
    }
    if let Some(metadata) = device.metadata.as_object_mut() {
        metadata.insert("config".to_string(), serde_json::Value::Object(config));
    }
}

fn render_qr(url: &str) -> Result<String, ProvisioningError> {
    let qr = QrCode::new(url.as_bytes())
        .map_err(|e| ProvisioningError::Internal(anyhow::anyhow!("qr encoding failed: {e}")))?;
    Ok(qr.render::<svg::Color>().min_dimensions(240, 240).build())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::{
        model::CodeRejection,
        store::MemoryStore,
    };

    use super::*;

    fn service() -> (ProvisioningService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = ProvisioningService::new(
            Arc::clone(&store) as Arc<dyn ProvisioningStore>,
            ProvisioningConfig::default(),
        );
        (service, store)
    }

    fn battery(uid: &str) -> NewDevice {
        NewDevice {
            uid: uid.to_string(),
            device_type: DeviceType::BatteryStorage,
            name: None,
            firmware_version: None,
            location: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_uid_is_rejected() {
        let (service, _) = service();
        service.register_device(battery("b-1")).await.unwrap();
        let err = service.register_device(battery("b-1")).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Validation(_)));
    }

    #[tokio::test]
    async fn one_time_code_redeems_exactly_once() {
        let (service, _) = service();
        let issued = service
            .generate_registration_code(CodeRequest {
                device_type: Some(DeviceType::BatteryStorage),
                expiry_hours: Some(1),
                is_one_time: true,
                max_uses: Some(1),
                ..CodeRequest::default()
            })
            .await
            .unwrap();

        assert!(service
            .validate_registration_code(&issued.code.code)
            .await
            .unwrap()
            .valid);

        let device = service
            .register_device_with_code(&issued.code.code, battery("b-1"))
            .await
            .unwrap();
        assert_eq!(device.status, RegistrationStatus::Registered);

        // One-time codes deactivate on first use.
        let validation = service
            .validate_registration_code(&issued.code.code)
            .await
            .unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.reason, Some(CodeRejection::Inactive));

        let err = service
            .register_device_with_code(&issued.code.code, battery("b-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::CodeRejected(_)));
    }

    #[tokio::test]
    async fn type_mismatch_leaves_use_count_untouched() {
        let (service, _) = service();
        let issued = service
            .generate_registration_code(CodeRequest {
                device_type: Some(DeviceType::BatteryStorage),
                expiry_hours: Some(1),
                is_one_time: true,
                max_uses: Some(1),
                ..CodeRequest::default()
            })
            .await
            .unwrap();

        let solar = NewDevice {
            device_type: DeviceType::SolarPv,
            ..battery("s-1")
        };
        let err = service
            .register_device_with_code(&issued.code.code, solar)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Validation(_)));

        let codes = service.list_codes().await.unwrap();
        assert_eq!(codes[0].use_count, 0);
        assert!(codes[0].is_active);

        // The right device type still gets through.
        service
            .register_device_with_code(&issued.code.code, battery("b-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_code_reports_reason_without_side_effects() {
        let (service, store) = service();
        let now = Utc::now();
        store
            .insert_code(RegistrationCode {
                id: 0,
                code: "STALE1".to_string(),
                device_type: None,
                template_id: None,
                expires_at: now - Duration::minutes(5),
                is_one_time: false,
                use_count: 0,
                max_uses: 5,
                is_active: true,
                created_at: now - Duration::hours(2),
            })
            .await
            .unwrap();

        let validation = service.validate_registration_code("STALE1").await.unwrap();
        assert_eq!(validation.reason, Some(CodeRejection::Expired));

        let err = service
            .register_device_with_code("STALE1", battery("b-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::CodeRejected(CodeRejection::Expired)
        ));
        assert_eq!(store.list_codes().await.unwrap()[0].use_count, 0);
    }

    #[tokio::test]
    async fn unknown_code_reports_not_found() {
        let (service, _) = service();
        let validation = service.validate_registration_code("NOPE").await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.reason, Some(CodeRejection::NotFound));
    }

    #[tokio::test]
    async fn multi_use_code_exhausts_at_max_uses() {
        let (service, _) = service();
        let issued = service
            .generate_registration_code(CodeRequest {
                expiry_hours: Some(1),
                max_uses: Some(2),
                ..CodeRequest::default()
            })
            .await
            .unwrap();

        service
            .register_device_with_code(&issued.code.code, battery("b-1"))
            .await
            .unwrap();
        service
            .register_device_with_code(&issued.code.code, battery("b-2"))
            .await
            .unwrap();

        let validation = service
            .validate_registration_code(&issued.code.code)
            .await
            .unwrap();
        assert!(!validation.valid);
        // Exhausting the last use deactivates the code.
        assert_eq!(validation.reason, Some(CodeRejection::Inactive));
    }

    #[tokio::test]
    async fn template_application_activates_and_issues_credentials() {
        let (service, _) = service();
        let template = service
            .create_template(NewTemplate {
                name: "battery defaults".to_string(),
                device_type: DeviceType::BatteryStorage,
                configuration: json!({ "report_interval_s": 30 }),
                default_settings: json!({ "report_interval_s": 300, "unit": "kWh" }),
                required_capabilities: vec!["telemetry".to_string()],
                auth_method: AuthMethod::ApiKey,
            })
            .await
            .unwrap();

        let device = service.register_device(battery("b-1")).await.unwrap();
        let device = service.apply_template(device.id, template.id).await.unwrap();

        assert_eq!(device.status, RegistrationStatus::Active);
        assert_eq!(device.auth_method, AuthMethod::ApiKey);
        // Template config overrides defaults in the merged view.
        assert_eq!(device.metadata["config"]["report_interval_s"], json!(30));
        assert_eq!(device.metadata["config"]["unit"], json!("kWh"));

        let creds = service.credentials_for_device(device.id).await.unwrap();
        assert_eq!(creds.len(), 1);
        assert!(creds[0].is_active);
        assert!(matches!(
            creds[0].secrets,
            crate::model::CredentialSecrets::ApiKey { .. }
        ));

        let actions: Vec<String> = service
            .history_for_device(device.id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect();
        assert!(actions.contains(&"template_applied".to_string()));
        assert!(actions.contains(&"activated".to_string()));
    }

    #[tokio::test]
    async fn template_type_mismatch_is_rejected() {
        let (service, _) = service();
        let template = service
            .create_template(NewTemplate {
                name: "solar defaults".to_string(),
                device_type: DeviceType::SolarPv,
                configuration: json!({}),
                default_settings: json!({}),
                required_capabilities: vec![],
                auth_method: AuthMethod::None,
            })
            .await
            .unwrap();

        let device = service.register_device(battery("b-1")).await.unwrap();
        let err = service
            .apply_template(device.id, template.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Validation(_)));
        assert_eq!(
            service.get_device(device.id).await.unwrap().status,
            RegistrationStatus::Registered
        );
    }

    #[tokio::test]
    async fn code_bound_to_template_provisions_on_redeem() {
        let (service, _) = service();
        let template = service
            .create_template(NewTemplate {
                name: "battery defaults".to_string(),
                device_type: DeviceType::BatteryStorage,
                configuration: json!({}),
                default_settings: json!({}),
                required_capabilities: vec![],
                auth_method: AuthMethod::Token,
            })
            .await
            .unwrap();
        let issued = service
            .generate_registration_code(CodeRequest {
                template_id: Some(template.id),
                expiry_hours: Some(1),
                is_one_time: true,
                ..CodeRequest::default()
            })
            .await
            .unwrap();
        // The code inherits the template's device type.
        assert_eq!(issued.code.device_type, Some(DeviceType::BatteryStorage));

        let device = service
            .register_device_with_code(&issued.code.code, battery("b-1"))
            .await
            .unwrap();
        assert_eq!(device.status, RegistrationStatus::Active);
        assert_eq!(device.auth_method, AuthMethod::Token);
    }

    #[tokio::test]
    async fn code_type_conflicting_with_template_is_rejected() {
        let (service, _) = service();
        let template = service
            .create_template(NewTemplate {
                name: "battery defaults".to_string(),
                device_type: DeviceType::BatteryStorage,
                configuration: json!({}),
                default_settings: json!({}),
                required_capabilities: vec![],
                auth_method: AuthMethod::None,
            })
            .await
            .unwrap();

        let err = service
            .generate_registration_code(CodeRequest {
                device_type: Some(DeviceType::SolarPv),
                template_id: Some(template.id),
                ..CodeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Validation(_)));
    }

    #[tokio::test]
    async fn reissuing_credentials_keeps_one_active_set() {
        let (service, _) = service();
        let device = service.register_device(battery("b-1")).await.unwrap();

        service
            .create_device_credentials(device.id, AuthMethod::ApiKey)
            .await
            .unwrap();
        service
            .create_device_credentials(device.id, AuthMethod::ApiKey)
            .await
            .unwrap();

        let creds = service.credentials_for_device(device.id).await.unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds.iter().filter(|c| c.is_active).count(), 1);
    }

    #[tokio::test]
    async fn status_bridge_updates_timestamps() {
        let (service, _) = service();
        service.register_device(battery("b-1")).await.unwrap();

        let device = service.update_device_status("b-1", true).await.unwrap();
        assert!(device.online);
        assert!(device.last_seen.is_some());
        assert!(device.last_connected.is_some());

        let device = service.update_device_status("b-1", false).await.unwrap();
        assert!(!device.online);
        assert!(
            matches!(service.update_device_status("ghost", true).await.unwrap_err(),
                ProvisioningError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn qr_rendering_produces_svg() {
        let (service, _) = service();
        let issued = service
            .generate_registration_code(CodeRequest {
                with_qr: true,
                ..CodeRequest::default()
            })
            .await
            .unwrap();
        assert!(issued.qr_svg.unwrap().contains("<svg"));
        assert!(issued.registration_url.contains(&issued.code.code));

        let svg = service
            .registration_code_qr(&issued.code.code)
            .await
            .unwrap();
        assert!(svg.contains("<svg"));
    }

    #[tokio::test]
    async fn decommission_and_reactivate() {
        let (service, _) = service();
        service.register_device(battery("b-1")).await.unwrap();

        let device = service
            .update_device("b-1", DeviceUpdate {
                status: Some(RegistrationStatus::Decommissioned),
                ..DeviceUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(device.status, RegistrationStatus::Decommissioned);

        let device = service
            .update_device("b-1", DeviceUpdate {
                status: Some(RegistrationStatus::Active),
                ..DeviceUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(device.status, RegistrationStatus::Active);

        let err = service
            .update_device("b-1", DeviceUpdate {
                status: Some(RegistrationStatus::Pending),
                ..DeviceUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Validation(_)));
    }
}
