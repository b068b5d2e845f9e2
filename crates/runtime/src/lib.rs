//! Service lifecycle registry.
//!
//! Every long-lived subsystem (messaging gateway, broadcast hub, …)
//! registers here with its declared dependencies. The registry drives
//! `initialize → start → stop` in dependency order: dependencies come up
//! before their dependents, dependents go down before their dependencies.
//!
//! The registry is constructed explicitly and threaded through application
//! setup — one instance per process, no global state.

pub mod registry;
pub mod service;

pub use {
    registry::{RegistryError, ServiceConfig, ServiceRegistry},
    service::Service,
};
