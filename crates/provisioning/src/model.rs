use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Devices ──────────────────────────────────────────────────────────────────

/// Kinds of field devices the platform monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    SolarPv,
    BatteryStorage,
    EvCharger,
    SmartMeter,
    HeatPump,
    Inverter,
    LoadController,
    Gateway,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SolarPv => "solar_pv",
            Self::BatteryStorage => "battery_storage",
            Self::EvCharger => "ev_charger",
            Self::SmartMeter => "smart_meter",
            Self::HeatPump => "heat_pump",
            Self::Inverter => "inverter",
            Self::LoadController => "load_controller",
            Self::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration state machine. Forward-only through
/// `pending → registered → provisioning → active`, with `rejected` and
/// `decommissioned` reachable from any non-terminal state. Reactivating a
/// decommissioned device (`decommissioned → active`) is the one sanctioned
/// backward move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Registered,
    Provisioning,
    Active,
    Decommissioned,
    Rejected,
}

impl RegistrationStatus {
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Registered => Some(1),
            Self::Provisioning => Some(2),
            Self::Active => Some(3),
            Self::Decommissioned | Self::Rejected => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Registered => "registered",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Decommissioned => "decommissioned",
            Self::Rejected => "rejected",
        }
    }

    /// Whether moving from `self` to `next` is a sanctioned transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Rejected, _) => false,
            (Self::Decommissioned, Self::Active) => true,
            (Self::Decommissioned, _) => false,
            (_, Self::Decommissioned | Self::Rejected) => true,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a device authenticates against the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    UsernamePassword,
    Certificate,
    Token,
    Oauth,
    None,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::UsernamePassword => "username_password",
            Self::Certificate => "certificate",
            Self::Token => "token",
            Self::Oauth => "oauth",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in the device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    /// Globally unique device identifier, chosen by the caller.
    pub uid: String,
    pub device_type: DeviceType,
    pub name: Option<String>,
    pub status: RegistrationStatus,
    pub firmware_version: Option<String>,
    pub location: Option<String>,
    pub metadata: serde_json::Value,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_connected: Option<DateTime<Utc>>,
    pub auth_method: AuthMethod,
    pub registered_at: DateTime<Utc>,
}

/// Input for registering a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub uid: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Patch applied by the update-device operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub firmware_version: Option<String>,
    pub location: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<RegistrationStatus>,
}

// ── Registration codes ───────────────────────────────────────────────────────

/// A short-lived onboarding token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCode {
    pub id: i64,
    pub code: String,
    /// When set, only devices of this type may redeem the code.
    pub device_type: Option<DeviceType>,
    /// Template applied automatically on redemption.
    pub template_id: Option<i64>,
    pub expires_at: DateTime<Utc>,
    pub is_one_time: bool,
    pub use_count: u32,
    pub max_uses: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RegistrationCode {
    /// Pure validity check against `now`.
    pub fn check(&self, now: DateTime<Utc>) -> CodeValidation {
        if !self.is_active {
            return CodeValidation::invalid(CodeRejection::Inactive);
        }
        if now >= self.expires_at {
            return CodeValidation::invalid(CodeRejection::Expired);
        }
        if self.use_count >= self.max_uses {
            return CodeValidation::invalid(CodeRejection::MaxUsesReached);
        }
        CodeValidation::valid()
    }
}

/// Why a registration code was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeRejection {
    NotFound,
    Inactive,
    Expired,
    MaxUsesReached,
}

impl std::fmt::Display for CodeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::MaxUsesReached => "max uses reached",
        })
    }
}

/// Result of validating a code, with the reason when invalid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CodeValidation {
    pub valid: bool,
    pub reason: Option<CodeRejection>,
}

impl CodeValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: CodeRejection) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// A freshly issued code plus its onboarding URL and optional QR rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    pub code: RegistrationCode,
    pub registration_url: String,
    pub qr_svg: Option<String>,
}

// ── Templates ────────────────────────────────────────────────────────────────

/// Reusable configuration bundle applied to devices of one type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningTemplate {
    pub id: i64,
    pub name: String,
    pub device_type: DeviceType,
    pub configuration: serde_json::Value,
    pub default_settings: serde_json::Value,
    pub required_capabilities: Vec<String>,
    pub auth_method: AuthMethod,
    pub is_active: bool,
}

/// Input for creating a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub configuration: serde_json::Value,
    #[serde(default)]
    pub default_settings: serde_json::Value,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub auth_method: AuthMethod,
}

// ── Credentials ──────────────────────────────────────────────────────────────

/// Method-specific secret material. Only the fields relevant to the
/// method are present; passwords are stored as argon2 hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSecrets {
    ApiKey {
        key: String,
        secret: String,
    },
    UsernamePassword {
        username: String,
        password_hash: String,
    },
    Certificate {
        certificate_pem: String,
        private_key_pem: String,
    },
    Token {
        token: String,
    },
    None,
}

/// A stored credential set for one (device, method) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: i64,
    pub device_id: i64,
    pub method: AuthMethod,
    pub secrets: CredentialSecrets,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Freshly generated credentials. `password` carries the plaintext exactly
/// once, for handing to the device; only the hash is stored.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub record: CredentialRecord,
    pub password: Option<String>,
}

// ── History ──────────────────────────────────────────────────────────────────

/// Audit row for provisioning actions on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub device_id: i64,
    pub action: String,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use RegistrationStatus::*;
        assert!(Pending.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Active));
        assert!(Pending.can_transition_to(Active));
        assert!(!Active.can_transition_to(Registered));
        assert!(!Provisioning.can_transition_to(Pending));
    }

    #[test]
    fn terminal_states_and_reactivation() {
        use RegistrationStatus::*;
        assert!(Active.can_transition_to(Decommissioned));
        assert!(Decommissioned.can_transition_to(Active));
        assert!(!Decommissioned.can_transition_to(Registered));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Active));
    }

    #[test]
    fn code_check_reports_reasons_in_order() {
        let now = Utc::now();
        let mut code = RegistrationCode {
            id: 1,
            code: "ABC123".to_string(),
            device_type: None,
            template_id: None,
            expires_at: now + chrono::Duration::hours(1),
            is_one_time: false,
            use_count: 0,
            max_uses: 3,
            is_active: true,
            created_at: now,
        };
        assert!(code.check(now).valid);

        code.use_count = 3;
        assert_eq!(code.check(now).reason, Some(CodeRejection::MaxUsesReached));

        code.expires_at = now - chrono::Duration::minutes(1);
        assert_eq!(code.check(now).reason, Some(CodeRejection::Expired));

        code.is_active = false;
        assert_eq!(code.check(now).reason, Some(CodeRejection::Inactive));
    }

    #[test]
    fn device_type_wire_names() {
        let json = serde_json::to_string(&DeviceType::BatteryStorage).unwrap();
        assert_eq!(json, "\"battery_storage\"");
        assert_eq!(DeviceType::SolarPv.to_string(), "solar_pv");
    }
}
