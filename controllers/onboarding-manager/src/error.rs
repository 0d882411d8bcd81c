//! Controller-specific error types.
//!
//! Library errors from the inventory and provisioning clients are wrapped
//! here so the process entry point can report them uniformly.

use inventory_client::InventoryError;
use provisioning_client::ProvisioningError;
use reconcile::ReconcileError;
use thiserror::Error;

/// Errors that can occur in the Onboarding Manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Inventory API error
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Credential or workflow backend error
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Work queue rejected a request
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Inventory subscription failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Listener could not be bound or served
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}
