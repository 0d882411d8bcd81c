//! Reconcile controller errors

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the controller itself, not by reconcilers
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Controller was stopped and no longer accepts work
    #[error("controller stopped")]
    Stopped,

    /// A reconciliation ran past its deadline
    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}
