//! Inventory client errors
//!
//! Every failure the inventory service can report is folded into one closed
//! enum so callers classify with an exhaustive `match` instead of probing
//! error strings.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when talking to the inventory service
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Resource does not exist (or was deleted concurrently)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource with the same identity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller identity was not accepted
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller is known but not allowed to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Another operation on the same resource is still running
    #[error("Operation in progress: {0}")]
    OperationInProgress(String),

    /// Service temporarily unreachable or refusing work
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Server side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Request rejected during validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Server terminated a subscription on purpose
    #[error("Canceled: {0}")]
    Canceled(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InventoryError {
    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::NotFound(_))
    }

    /// Errors after which retrying cannot change the outcome: the resource
    /// already converged, or this caller may never act on it.
    pub fn is_convergent(&self) -> bool {
        matches!(
            self,
            InventoryError::NotFound(_)
                | InventoryError::AlreadyExists(_)
                | InventoryError::Unauthenticated(_)
                | InventoryError::PermissionDenied(_)
        )
    }

    /// Errors worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            InventoryError::Unavailable(_)
            | InventoryError::OperationInProgress(_)
            | InventoryError::Internal(_)
            | InventoryError::Http(_) => true,
            InventoryError::NotFound(_)
            | InventoryError::AlreadyExists(_)
            | InventoryError::Unauthenticated(_)
            | InventoryError::PermissionDenied(_)
            | InventoryError::InvalidArgument(_)
            | InventoryError::Canceled(_)
            | InventoryError::Serialization(_) => false,
        }
    }
}

/// Error codes carried in the inventory service's error body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NotFound,
    AlreadyExists,
    Unauthenticated,
    PermissionDenied,
    OperationInProgress,
    Unavailable,
    Internal,
    InvalidArgument,
    Canceled,
    /// The service lost (or never had) this client's registration
    UnknownClient,
    #[serde(other)]
    Unknown,
}

/// Error body returned by the inventory service
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: ApiErrorCode,
    #[serde(default)]
    pub message: String,
}

impl ApiErrorCode {
    /// Fallback classification when the body carries no usable code
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => ApiErrorCode::InvalidArgument,
            401 => ApiErrorCode::Unauthenticated,
            403 => ApiErrorCode::PermissionDenied,
            404 => ApiErrorCode::NotFound,
            409 => ApiErrorCode::AlreadyExists,
            412 => ApiErrorCode::UnknownClient,
            423 => ApiErrorCode::OperationInProgress,
            499 => ApiErrorCode::Canceled,
            502..=504 => ApiErrorCode::Unavailable,
            _ => ApiErrorCode::Internal,
        }
    }

    /// Map a code to the closed error enum. `UnknownClient` has no direct
    /// counterpart; the client applies its configured policy before this
    /// point and anything left over is reported as unavailable.
    pub fn into_error(self, message: String) -> InventoryError {
        match self {
            ApiErrorCode::NotFound => InventoryError::NotFound(message),
            ApiErrorCode::AlreadyExists => InventoryError::AlreadyExists(message),
            ApiErrorCode::Unauthenticated => InventoryError::Unauthenticated(message),
            ApiErrorCode::PermissionDenied => InventoryError::PermissionDenied(message),
            ApiErrorCode::OperationInProgress => InventoryError::OperationInProgress(message),
            ApiErrorCode::Unavailable | ApiErrorCode::UnknownClient => {
                InventoryError::Unavailable(message)
            }
            ApiErrorCode::InvalidArgument => InventoryError::InvalidArgument(message),
            ApiErrorCode::Canceled => InventoryError::Canceled(message),
            ApiErrorCode::Internal | ApiErrorCode::Unknown => InventoryError::Internal(message),
        }
    }
}
