//! Wire types of the device-facing API
//!
//! Every failure carries a [`Status`]: a code from a small closed set plus
//! a message naming which identity field mismatched or which precondition
//! failed. Over HTTP the code also selects the response status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inventory_client::InventoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    #[default]
    Ok,
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    Internal,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
}

impl Code {
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Outcome of a device-facing call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: Code,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::default()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }
}

impl From<InventoryError> for Status {
    fn from(err: InventoryError) -> Self {
        let message = err.to_string();
        match err {
            InventoryError::NotFound(_) => Self::not_found(message),
            InventoryError::InvalidArgument(_) => Self::invalid_argument(message),
            InventoryError::AlreadyExists(_) => Self::failed_precondition(message),
            InventoryError::PermissionDenied(_) => Self::permission_denied(message),
            InventoryError::Unauthenticated(_) => Self::unauthenticated(message),
            InventoryError::Unavailable(_) | InventoryError::OperationInProgress(_) => {
                Self::new(Code::Unavailable, message)
            }
            InventoryError::Internal(_)
            | InventoryError::Canceled(_)
            | InventoryError::Http(_)
            | InventoryError::Serialization(_) => Self::internal(message),
        }
    }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self)).into_response()
    }
}

/// Hardware identity of one device as reported by an operator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HwData {
    pub uuid: String,
    pub serialnum: String,
    pub mac_id: String,
    /// BMC address of the device
    pub sut_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeData {
    pub hwdata: Vec<HwData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRequest {
    pub payload: Vec<NodeData>,
}

impl NodeRequest {
    pub fn hwdata(&self) -> impl Iterator<Item = &HwData> {
        self.payload.iter().flat_map(|node| node.hwdata.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeResponse {
    pub payload: Vec<NodeData>,
    pub project_id: String,
}

/// Lookup key for `GET /v1/nodes`
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct NodeQuery {
    pub uuid: String,
    pub serialnum: String,
}

/// One message from a device on the onboarding stream
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardStreamRequest {
    pub uuid: String,
    pub serialnum: String,
    pub host_ip: String,
    pub mac_id: String,
}

/// Node state reported back to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    #[default]
    Unspecified,
    Registered,
    Onboarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardStreamResponse {
    pub status: Status,
    pub node_state: NodeState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub project_id: String,
}

impl OnboardStreamResponse {
    pub fn error(status: Status) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Both claims empty, or a UUID that does not parse, is rejected
pub fn validate_identity(uuid: &str, serialnum: &str) -> Result<(), Status> {
    if uuid.is_empty() && serialnum.is_empty() {
        return Err(Status::invalid_argument("either uuid or serialnum is required"));
    }
    if !uuid.is_empty() {
        uuid::Uuid::parse_str(uuid)
            .map_err(|e| Status::invalid_argument(format!("invalid uuid {uuid:?}: {e}")))?;
    }
    if !serialnum
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Status::invalid_argument(format!(
            "invalid serialnum {serialnum:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_validation() {
        assert!(validate_identity("", "").is_err());
        assert!(validate_identity("not-a-uuid", "").is_err());
        assert!(validate_identity("", "SN 1").is_err());
        assert!(validate_identity("", "SN-1").is_ok());
        assert!(validate_identity("4c4c4544-0056-4810-8052-b4c04f4b3732", "").is_ok());
    }

    #[test]
    fn test_inventory_errors_map_to_codes() {
        let status = Status::from(InventoryError::NotFound("host".into()));
        assert!(status.is_not_found());
        assert_eq!(
            Status::from(InventoryError::Unavailable("down".into())).code.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Status::from(InventoryError::Canceled("bye".into())).code,
            Code::Internal
        );
    }

    #[test]
    fn test_stream_response_shape() {
        let response = OnboardStreamResponse::error(Status::not_found("Device not found"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"]["code"], "NOT_FOUND");
        assert_eq!(json["node_state"], "UNSPECIFIED");
        assert!(json.get("client_secret").is_none());
    }
}
