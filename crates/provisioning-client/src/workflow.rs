//! OS provisioning workflow backend client
//!
//! The backend runs one named workflow per device. Checking is idempotent:
//! a missing workflow is created and reported as in progress, a running one
//! stays in progress, a finished one reports success or abort.

use crate::client::ServiceClient;
use crate::error::ProvisioningError;
use crate::models::{CreateWorkflowRequest, DeviceInfo, WorkflowState, WorkflowStatus, workflow_name};
use inventory_client::Instance;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait::async_trait]
pub trait WorkflowClient: Send + Sync {
    /// `Ok` once the workflow succeeded, `InProgress` while it runs
    /// (including right after creating it), `Aborted` when it failed
    async fn check_or_run_provisioning_workflow(
        &self,
        device: &DeviceInfo,
        instance: &Instance,
    ) -> Result<(), ProvisioningError>;

    /// Remove the device's workflow and its artifacts; missing is fine
    async fn delete_workflow_resources_if_exist(&self, device_uuid: &str) -> Result<(), ProvisioningError>;
}

/// REST implementation of [`WorkflowClient`]
#[derive(Debug, Clone)]
pub struct HttpWorkflowClient {
    service: ServiceClient,
}

impl HttpWorkflowClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProvisioningError> {
        Ok(Self {
            service: ServiceClient::new(base_url, timeout)?,
        })
    }
}

/// Map a reported workflow state to the check result
pub fn check_state(status: &WorkflowStatus) -> Result<(), ProvisioningError> {
    match status.state {
        WorkflowState::Success => Ok(()),
        WorkflowState::Pending | WorkflowState::Running => Err(ProvisioningError::InProgress(
            format!("workflow {} is {:?}", status.name, status.state),
        )),
        WorkflowState::Failed | WorkflowState::Timeout => Err(ProvisioningError::Aborted(format!(
            "workflow {} ended {:?}: {}",
            status.name, status.state, status.message
        ))),
    }
}

#[async_trait::async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn check_or_run_provisioning_workflow(
        &self,
        device: &DeviceInfo,
        instance: &Instance,
    ) -> Result<(), ProvisioningError> {
        let name = workflow_name(&device.guid);
        let path = format!("/v1/workflows/{}", urlencoding::encode(&name));
        match self.service.get::<WorkflowStatus>(&path).await {
            Ok(status) => {
                debug!("Workflow {} is {:?}", name, status.state);
                check_state(&status)
            }
            Err(ProvisioningError::NotFound(_)) => {
                let request = CreateWorkflowRequest {
                    name: &name,
                    tenant_id: &instance.tenant_id,
                    instance_id: &instance.resource_id,
                    device,
                };
                let created: WorkflowStatus = self.service.post("/v1/workflows", &request).await?;
                info!(
                    "Created provisioning workflow {} for instance {}",
                    created.name, instance.resource_id
                );
                Err(ProvisioningError::InProgress(format!(
                    "workflow {} created",
                    created.name
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_workflow_resources_if_exist(&self, device_uuid: &str) -> Result<(), ProvisioningError> {
        let name = workflow_name(device_uuid);
        match self
            .service
            .delete(&format!("/v1/workflows/{}", urlencoding::encode(&name)))
            .await
        {
            Ok(()) => {
                info!("Deleted provisioning workflow {}", name);
                Ok(())
            }
            Err(ProvisioningError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
