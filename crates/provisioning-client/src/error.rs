//! Provisioning client errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Workflow exists and has not finished; poll again later
    #[error("Operation in progress: {0}")]
    InProgress(String),

    /// Workflow reached an unrecoverable state
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend answered with an unexpected error
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProvisioningError {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ProvisioningError::InProgress(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ProvisioningError::Aborted(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisioningError::NotFound(_))
    }
}
