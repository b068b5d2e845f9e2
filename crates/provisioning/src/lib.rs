//! Device provisioning: registration codes, configuration templates, and
//! per-method credential issuance.
//!
//! Durable state sits behind [`ProvisioningStore`]; the in-memory
//! implementation backs tests and single-node deployments, anything else
//! is an external collaborator. All operations return structured errors
//! with human-readable reasons and never partially mutate state.

pub mod credentials;
pub mod error;
pub mod model;
pub mod service;
pub mod store;

pub use {
    error::ProvisioningError,
    model::{
        AuthMethod, CodeRejection, CodeValidation, CredentialRecord, CredentialSecrets, Device,
        DeviceType, DeviceUpdate, HistoryEntry, IssuedCode, IssuedCredentials, NewDevice,
        NewTemplate, ProvisioningTemplate, RegistrationCode, RegistrationStatus,
    },
    service::{CodeRequest, DeviceAnnouncer, ProvisioningConfig, ProvisioningService},
    store::{CodeConsumption, MemoryStore, ProvisioningStore},
};
