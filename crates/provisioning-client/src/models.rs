//! Provisioning models

use inventory_client::{OsType, SecurityFeature};
use serde::{Deserialize, Serialize};

/// Everything the workflow backend needs to install an OS on a device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub guid: String,
    pub hw_serial_id: String,
    pub hw_mac_id: String,
    /// BMC address of the device
    pub hw_ip: String,
    pub hostname: String,
    pub tenant_id: String,
    pub security_feature: SecurityFeature,
    pub os_image_url: String,
    pub os_image_sha256: String,
    pub os_type: OsType,
    pub os_resource_id: String,
    pub platform_bundle: String,
    pub local_account_id: String,
}

/// OAuth style client credentials issued to a device
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Workflow lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub name: String,
    pub state: WorkflowState,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateWorkflowRequest<'a> {
    pub name: &'a str,
    pub tenant_id: &'a str,
    pub instance_id: &'a str,
    pub device: &'a DeviceInfo,
}

/// Name of the provisioning workflow for a device
pub fn workflow_name(device_uuid: &str) -> String {
    format!("workflow-{}", device_uuid.to_lowercase())
}
