//! Instance reconciler
//!
//! Drives OS provisioning of an Instance through the workflow backend.
//! Statuses computed while provisioning are collected on a copy of the
//! Instance and written back afterwards, only where they differ from what
//! was read.

use super::{handle_inventory_error, handle_provisioning_error};
use crate::invclient::OnboardingInventoryClient;
use crate::status;
use inventory_client::{
    HostState, Instance, InstanceState, InventoryError, OperatingSystem, OsProviderKind, OsType,
    ResourceKey,
};
use provisioning_client::{DeviceInfo, ProvisioningError, WorkflowClient};
use reconcile::{Directive, Reconciler, Request};
use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct InstanceReconciler {
    inventory: Arc<OnboardingInventoryClient>,
    workflows: Arc<dyn WorkflowClient>,
    image_relay_addr: String,
}

impl InstanceReconciler {
    pub fn new(
        inventory: Arc<OnboardingInventoryClient>,
        workflows: Arc<dyn WorkflowClient>,
        image_relay_addr: impl Into<String>,
    ) -> Self {
        Self {
            inventory,
            workflows,
            image_relay_addr: image_relay_addr.into(),
        }
    }

    /// The only way out of a failed provisioning is deletion
    fn provisioning_failed(instance: &Instance) -> bool {
        instance.provisioning_status_indicator == status::PROVISIONING_FAILED.indicator
            && instance.desired_state != InstanceState::Deleted
    }

    fn host_deauthorized(instance: &Instance) -> bool {
        let Some(host) = &instance.host else {
            return false;
        };
        (host.current_state == HostState::Untrusted || host.desired_state == HostState::Untrusted)
            && instance.desired_state == InstanceState::Running
    }

    /// Runtime status movers may flip the state to RUNNING before the
    /// provisioning bookkeeping here is finished
    fn provisioning_unfinished(instance: &Instance) -> bool {
        instance.current_state == InstanceState::Running
            && instance.provisioning_status_indicator != status::PROVISIONING_DONE.indicator
            && !instance
                .provisioning_status
                .starts_with(status::PROVISIONING_DONE.text)
    }

    async fn reconcile_instance(&self, request: &Request<ResourceKey>, instance: &Instance) -> Directive {
        info!(
            "Reconciling Instance {} (current: {:?}, desired: {:?})",
            instance.resource_id, instance.current_state, instance.desired_state
        );
        match instance.desired_state {
            InstanceState::Running => self.provision(request, instance).await,
            InstanceState::Deleted => {
                self.cleanup_provisioning_resources(instance).await;
                if let Err(e) = self
                    .inventory
                    .update_instance_current_state(
                        &instance.tenant_id,
                        &instance.resource_id,
                        InstanceState::Deleted,
                    )
                    .await
                {
                    return handle_inventory_error(request, e);
                }
                debug!("Instance {} has been deleted", instance.resource_id);
                request.ack()
            }
            InstanceState::Untrusted => {
                if let Err(e) = self
                    .inventory
                    .update_instance_current_state(
                        &instance.tenant_id,
                        &instance.resource_id,
                        InstanceState::Untrusted,
                    )
                    .await
                {
                    return handle_inventory_error(request, e);
                }
                debug!("Instance {} is untrusted", instance.resource_id);
                request.ack()
            }
            InstanceState::Unspecified => request.ack(),
        }
    }

    async fn provision(&self, request: &Request<ResourceKey>, instance: &Instance) -> Directive {
        let Some(os) = &instance.desired_os else {
            warn!("No OS specified for instance {}, skipping provisioning", instance.resource_id);
            return request.ack();
        };
        if os.os_provider != OsProviderKind::Infra {
            debug!(
                "Skipping OS provisioning for {} due to OS provider kind {:?}",
                instance.resource_id, os.os_provider
            );
            return request.ack();
        }

        let device = match self.device_info(instance) {
            Ok(device) => device,
            Err(e) => {
                error!("Cannot provision instance {}: {}", instance.resource_id, e);
                return request.fail(e);
            }
        };

        debug!("Trying to provision Instance {} with OS {}", instance.resource_id, os.name);
        let mut updated = instance.clone();
        let result = self
            .workflows
            .check_or_run_provisioning_workflow(&device, instance)
            .await;
        apply_workflow_result(&mut updated, &result);
        self.write_back(instance, &updated).await;

        if let Err(e) = result {
            return handle_provisioning_error(request, e);
        }

        self.cleanup_provisioning_resources(instance).await;
        self.inventory
            .send_internal_event(&instance.tenant_id, &instance.resource_id);
        debug!("Instance {} has been provisioned", instance.resource_id);
        request.ack()
    }

    /// Workflow artifacts also go away with the Instance, so failing here
    /// is only logged
    async fn cleanup_provisioning_resources(&self, instance: &Instance) {
        let Some(host) = &instance.host else {
            return;
        };
        if host.uuid.is_empty() {
            return;
        }
        debug!("Cleaning up provisioning resources for host {}", host.uuid);
        if let Err(e) = self
            .workflows
            .delete_workflow_resources_if_exist(&host.uuid)
            .await
        {
            warn!(
                "Failed to clean up provisioning resources of instance {}: {}",
                instance.resource_id, e
            );
        }
    }

    async fn write_back(&self, old: &Instance, new: &Instance) {
        if let (Some(old_host), Some(new_host)) = (&old.host, &new.host) {
            if old_host.host_status() != new_host.host_status() {
                if let Err(e) = self
                    .inventory
                    .set_host_status_detail(
                        &new_host.tenant_id,
                        &new_host.resource_id,
                        &new_host.host_status(),
                    )
                    .await
                {
                    error!("Failed to update status of host {}: {}", new_host.resource_id, e);
                }
            }
            if old_host.onboarding_status() != new_host.onboarding_status() {
                if let Err(e) = self
                    .inventory
                    .set_host_onboarding_status(
                        &new_host.tenant_id,
                        &new_host.resource_id,
                        &new_host.onboarding_status(),
                    )
                    .await
                {
                    error!(
                        "Failed to update onboarding status of host {}: {}",
                        new_host.resource_id, e
                    );
                }
            }
        }

        if old.current_state != new.current_state
            || old.provisioning_status() != new.provisioning_status()
            || old.current_os != new.current_os
        {
            debug!(
                "Updating Instance {} with state {:?}, provisioning status {:?}",
                new.resource_id, new.current_state, new.provisioning_status
            );
            if let Err(e) = self
                .inventory
                .update_instance(
                    &new.tenant_id,
                    &new.resource_id,
                    new.current_state,
                    &new.provisioning_status(),
                    new.current_os.clone(),
                )
                .await
            {
                error!("Failed to update instance {}: {}", new.resource_id, e);
            }
        }
    }

    /// Provisioning descriptor of the Instance's Host and desired OS
    fn device_info(&self, instance: &Instance) -> Result<DeviceInfo, InventoryError> {
        let host = instance.host.as_ref().ok_or_else(|| {
            InventoryError::InvalidArgument(format!(
                "instance {} is not assigned to a host",
                instance.resource_id
            ))
        })?;
        let os = instance.desired_os.as_ref().ok_or_else(|| {
            InventoryError::InvalidArgument(format!(
                "instance {} doesn't have any OS associated",
                instance.resource_id
            ))
        })?;

        Ok(DeviceInfo {
            guid: host.uuid.clone(),
            hw_serial_id: host.serial_number.clone(),
            hw_mac_id: host.pxe_mac.clone(),
            hw_ip: host.bmc_ip.clone(),
            // resource IDs are unique, hostnames are not
            hostname: host.resource_id.clone(),
            tenant_id: instance.tenant_id.clone(),
            security_feature: instance.security_feature,
            os_image_url: image_url(os, &self.image_relay_addr)?,
            os_image_sha256: os.sha256.clone(),
            os_type: os.os_type,
            os_resource_id: os.resource_id.clone(),
            platform_bundle: os.platform_bundle.clone(),
            local_account_id: instance
                .local_account
                .as_ref()
                .map(|account| account.resource_id.clone())
                .unwrap_or_default(),
        })
    }
}

/// Where the device pulls the OS image from. Immutable images come straight
/// from their origin when it is a full URL; mutable images go through the
/// local relay.
pub(crate) fn image_url(os: &OperatingSystem, relay_addr: &str) -> Result<String, InventoryError> {
    match os.os_type {
        OsType::Immutable => match Url::parse(&os.image_url) {
            Ok(_) => {
                debug!("Pulling {} image from {}", os.profile_name, os.image_url);
                Ok(os.image_url.clone())
            }
            Err(_) => Ok(format!(
                "http://{}/{}",
                relay_addr,
                os.image_url.trim_start_matches('/')
            )),
        },
        OsType::Mutable => {
            let path = match Url::parse(&os.image_url) {
                Ok(url) => url.path().to_string(),
                Err(_) => format!("/{}", os.image_url.trim_start_matches('/')),
            };
            Ok(format!("http://{relay_addr}{path}"))
        }
        OsType::Unspecified => Err(InventoryError::InvalidArgument(format!(
            "unsupported OS type {:?} for OS {}",
            os.os_type, os.resource_id
        ))),
    }
}

/// Record the workflow outcome on `instance` the way it will be persisted
fn apply_workflow_result(instance: &mut Instance, result: &Result<(), ProvisioningError>) {
    let now = chrono::Utc::now();
    match result {
        Ok(()) => {
            instance.current_state = InstanceState::Running;
            instance.set_provisioning_status(&status::PROVISIONING_DONE.status(), now);
            instance.current_os = instance.desired_os.clone();
            // every successful workflow ends with a reboot
            if let Some(host) = instance.host.as_mut() {
                host.set_host_status(&status::HOST_STATUS_REBOOTING.status(), now);
            }
        }
        Err(ProvisioningError::InProgress(_)) => {
            instance.current_state = InstanceState::Unspecified;
            instance.set_provisioning_status(&status::PROVISIONING_IN_PROGRESS.status(), now);
        }
        Err(ProvisioningError::Aborted(reason)) => {
            instance.set_provisioning_status(&status::PROVISIONING_FAILED.with_details(reason), now);
        }
        Err(_) => {}
    }
}

#[async_trait::async_trait]
impl Reconciler<ResourceKey> for InstanceReconciler {
    async fn reconcile(&self, request: Request<ResourceKey>) -> Directive {
        let key = &request.key;
        info!("Reconciling Instance {}", key);

        let instance = match self
            .inventory
            .get_instance(&key.tenant_id, &key.resource_id)
            .await
        {
            Ok(instance) => instance,
            Err(e) => return handle_inventory_error(&request, e),
        };

        if Self::provisioning_failed(&instance) {
            warn!(
                "Provisioning of Instance {} failed, reconciliation won't happen until it is re-created",
                key
            );
            return request.ack();
        }

        if let Some(provider) = instance.host.as_ref().and_then(|h| h.provider.as_ref()) {
            info!(
                "Instance {} is reconciled by the vendor specific controller of provider {}",
                key, provider.name
            );
            return request.ack();
        }

        if Self::host_deauthorized(&instance) {
            if instance.instance_status != status::UNKNOWN.text {
                info!(
                    "Host of Instance {} has been deauthorized, deleting provisioning workflows",
                    key
                );
                self.cleanup_provisioning_resources(&instance).await;
            }
            return request.ack();
        }

        if instance.desired_state == instance.current_state {
            if Self::provisioning_unfinished(&instance) {
                info!(
                    "Instance {} is RUNNING but provisioning is not done, finishing provisioning",
                    key
                );
                return self.reconcile_instance(&request, &instance).await;
            }
            debug!("Instance {} reconciliation skipped", key);
            return request.ack();
        }

        let host_onboarded = instance
            .host
            .as_ref()
            .is_some_and(|h| h.current_state == HostState::Onboarded);
        if instance.desired_state == InstanceState::Running && !host_onboarded {
            info!(
                "Host of Instance {} is not onboarded yet, skipping until it is",
                key
            );
            return request.ack();
        }

        self.reconcile_instance(&request, &instance).await
    }
}
