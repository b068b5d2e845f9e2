use thiserror::Error;

use crate::model::CodeRejection;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("registration code rejected: {0}")]
    CodeRejected(CodeRejection),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProvisioningError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
