//! Mock collaborators for unit testing

use crate::credentials::CredentialClient;
use crate::error::ProvisioningError;
use crate::models::{ClientCredentials, DeviceInfo};
use crate::workflow::WorkflowClient;
use inventory_client::Instance;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock credential issuer
#[derive(Clone, Debug, Default)]
pub struct MockCredentialClient {
    pub(crate) revoked: Arc<Mutex<Vec<(String, String)>>>,
    pub(crate) fetched: Arc<Mutex<Vec<(String, String)>>>,
    pub(crate) fail_revoke: Arc<Mutex<Option<String>>>,
    pub(crate) fail_fetch: Arc<Mutex<Option<String>>>,
}

impl MockCredentialClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every revoke fail with a backend error
    pub fn fail_revoke(&self, message: impl Into<String>) {
        *lock(&self.fail_revoke) = Some(message.into());
    }

    /// Make every fetch fail with a backend error
    pub fn fail_fetch(&self, message: impl Into<String>) {
        *lock(&self.fail_fetch) = Some(message.into());
    }

    /// (tenant, device UUID) pairs revoked so far
    pub fn revoked(&self) -> Vec<(String, String)> {
        lock(&self.revoked).clone()
    }

    pub fn fetched(&self) -> Vec<(String, String)> {
        lock(&self.fetched).clone()
    }

    /// Credentials the mock hands out for a device
    pub fn credentials_for(device_uuid: &str) -> ClientCredentials {
        ClientCredentials {
            client_id: format!("client-{device_uuid}"),
            client_secret: format!("secret-{device_uuid}"),
        }
    }
}

#[async_trait::async_trait]
impl CredentialClient for MockCredentialClient {
    async fn revoke_by_identity(&self, tenant_id: &str, device_uuid: &str) -> Result<(), ProvisioningError> {
        if let Some(message) = lock(&self.fail_revoke).clone() {
            return Err(ProvisioningError::Backend(message));
        }
        lock(&self.revoked).push((tenant_id.to_string(), device_uuid.to_string()));
        Ok(())
    }

    async fn fetch_by_identity(
        &self,
        tenant_id: &str,
        device_uuid: &str,
    ) -> Result<ClientCredentials, ProvisioningError> {
        if let Some(message) = lock(&self.fail_fetch).clone() {
            return Err(ProvisioningError::Backend(message));
        }
        lock(&self.fetched).push((tenant_id.to_string(), device_uuid.to_string()));
        Ok(Self::credentials_for(device_uuid))
    }
}

/// Scripted result of a workflow check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowOutcome {
    #[default]
    Done,
    InProgress,
    Aborted,
    Backend,
}

impl WorkflowOutcome {
    fn into_result(self) -> Result<(), ProvisioningError> {
        match self {
            WorkflowOutcome::Done => Ok(()),
            WorkflowOutcome::InProgress => Err(ProvisioningError::InProgress("workflow running".into())),
            WorkflowOutcome::Aborted => Err(ProvisioningError::Aborted("workflow failed".into())),
            WorkflowOutcome::Backend => Err(ProvisioningError::Backend("backend unavailable".into())),
        }
    }
}

/// Mock workflow backend
#[derive(Clone, Debug, Default)]
pub struct MockWorkflowClient {
    pub(crate) script: Arc<Mutex<VecDeque<WorkflowOutcome>>>,
    pub(crate) fallback: Arc<Mutex<WorkflowOutcome>>,
    pub(crate) checks: Arc<Mutex<Vec<(DeviceInfo, String)>>>,
    pub(crate) deleted: Arc<Mutex<Vec<String>>>,
    pub(crate) fail_delete: Arc<Mutex<bool>>,
}

impl MockWorkflowClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next check
    pub fn push_outcome(&self, outcome: WorkflowOutcome) {
        lock(&self.script).push_back(outcome);
    }

    /// Result of checks once the queue is empty
    pub fn set_fallback(&self, outcome: WorkflowOutcome) {
        *lock(&self.fallback) = outcome;
    }

    pub fn fail_delete(&self, fail: bool) {
        *lock(&self.fail_delete) = fail;
    }

    /// Device descriptors and instance IDs checked so far
    pub fn checks(&self) -> Vec<(DeviceInfo, String)> {
        lock(&self.checks).clone()
    }

    /// Device UUIDs whose workflow resources were deleted
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

#[async_trait::async_trait]
impl WorkflowClient for MockWorkflowClient {
    async fn check_or_run_provisioning_workflow(
        &self,
        device: &DeviceInfo,
        instance: &Instance,
    ) -> Result<(), ProvisioningError> {
        lock(&self.checks).push((device.clone(), instance.resource_id.clone()));
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| *lock(&self.fallback));
        outcome.into_result()
    }

    async fn delete_workflow_resources_if_exist(&self, device_uuid: &str) -> Result<(), ProvisioningError> {
        if *lock(&self.fail_delete) {
            return Err(ProvisioningError::Backend("cannot delete workflow".into()));
        }
        lock(&self.deleted).push(device_uuid.to_string());
        Ok(())
    }
}
