//! Host reconciler
//!
//! Acts only on two desired states:
//!
//! - DELETED: wait for the Instance to go, revoke credentials, delete the
//!   child resources (IP addresses before their NIC), then mark the Host
//!   deleted. Every step is idempotent so a failure restarts from the top.
//! - UNTRUSTED: revoke credentials and mark the Host invalidated.
//!
//! Hosts that carry a provider belong to a vendor specific controller and
//! are only acknowledged.

use super::handle_inventory_error;
use super::{MAX_DELAY, MIN_DELAY};
use crate::invclient::OnboardingInventoryClient;
use crate::status;
use inventory_client::{Host, HostComponent, HostNic, HostState, InventoryError, ResourceKey};
use provisioning_client::{CredentialClient, ProvisioningError};
use reconcile::{Directive, Reconciler, Request, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub(crate) enum HostReconcileError {
    #[error("instance {0} is still assigned to the host, waiting for it to be deleted first")]
    InstanceAttached(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("failed to revoke host credentials: {0}")]
    Credentials(#[from] ProvisioningError),
}

pub struct HostReconciler {
    inventory: Arc<OnboardingInventoryClient>,
    credentials: Arc<dyn CredentialClient>,
}

impl HostReconciler {
    pub fn new(inventory: Arc<OnboardingInventoryClient>, credentials: Arc<dyn CredentialClient>) -> Self {
        Self { inventory, credentials }
    }

    fn directive(request: &Request<ResourceKey>, err: HostReconcileError) -> Directive {
        match err {
            HostReconcileError::Inventory(e) => handle_inventory_error(request, e),
            other => {
                warn!("{}: {}", request.key, other);
                request
                    .retry(other)
                    .with(RetryPolicy::exponential(MIN_DELAY, MAX_DELAY))
            }
        }
    }

    async fn reconcile_host(&self, request: &Request<ResourceKey>, host: &Host) -> Directive {
        debug!(
            "Reconciling host {} (current: {:?}, desired: {:?})",
            host.resource_id, host.current_state, host.desired_state
        );
        let result = match host.desired_state {
            HostState::Deleted => self.delete_host(host).await,
            HostState::Untrusted => self.invalidate_host(host).await,
            _ => return request.ack(),
        };
        match result {
            Ok(()) => request.ack(),
            Err(e) => Self::directive(request, e),
        }
    }

    async fn check_instance_detached(&self, host: &Host) -> Result<(), HostReconcileError> {
        let Some(instance) = &host.instance else {
            return Ok(());
        };
        let detail = format!("waiting on {} deletion", instance.resource_id);
        if let Err(e) = self
            .inventory
            .set_host_status_detail(
                &host.tenant_id,
                &host.resource_id,
                &status::deleting_with_details(&detail),
            )
            .await
        {
            warn!("Failed to update status detail for host {}: {}", host.resource_id, e);
        }
        Err(HostReconcileError::InstanceAttached(instance.resource_id.clone()))
    }

    async fn delete_host(&self, host: &Host) -> Result<(), HostReconcileError> {
        debug!("Deleting host {}", host.resource_id);
        self.check_instance_detached(host).await?;

        if let Err(e) = self
            .inventory
            .set_host_status_detail(&host.tenant_id, &host.resource_id, &status::DELETING.status())
            .await
        {
            warn!("Failed to update status detail for host {}: {}", host.resource_id, e);
        }

        // An untrusted host had its credentials revoked already
        if host.current_state != HostState::Untrusted {
            self.credentials
                .revoke_by_identity(&host.tenant_id, &host.uuid)
                .await?;
        }

        self.delete_host_nics(&host.host_nics).await?;
        self.delete_components("storage", &host.host_storages).await?;
        self.delete_components("usb", &host.host_usbs).await?;
        self.delete_components("gpu", &host.host_gpus).await?;

        self.inventory
            .delete_host(&host.tenant_id, &host.resource_id)
            .await?;
        info!("Host {} deleted", host.resource_id);
        Ok(())
    }

    async fn delete_host_nics(&self, nics: &[HostNic]) -> Result<(), HostReconcileError> {
        for nic in nics {
            for ip in self.inventory.list_ip_addresses(nic).await? {
                debug!("Deleting IP address {} of nic {}", ip.resource_id, nic.resource_id);
                self.delete_child(&ip.tenant_id, &ip.resource_id).await?;
            }
            debug!("Deleting host nic {}", nic.resource_id);
            self.delete_child(&nic.tenant_id, &nic.resource_id).await?;
        }
        Ok(())
    }

    async fn delete_components(&self, what: &str, components: &[HostComponent]) -> Result<(), HostReconcileError> {
        for component in components {
            debug!("Deleting host {} {}", what, component.resource_id);
            self.delete_child(&component.tenant_id, &component.resource_id)
                .await?;
        }
        Ok(())
    }

    /// Already gone counts as deleted
    async fn delete_child(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        match self.inventory.delete_resource(tenant_id, resource_id).await {
            Err(e) if e.is_not_found() => {
                debug!("{} already deleted", resource_id);
                Ok(())
            }
            other => other,
        }
    }

    async fn invalidate_host(&self, host: &Host) -> Result<(), HostReconcileError> {
        debug!("Invalidating host {}", host.resource_id);
        self.credentials
            .revoke_by_identity(&host.tenant_id, &host.uuid)
            .await?;

        // Status belongs to the runtime status mover, except for this one:
        // nothing else reports on a host once it is untrusted.
        self.inventory
            .update_host_state_and_status(
                &host.tenant_id,
                &host.resource_id,
                HostState::Untrusted,
                &status::AUTHORIZATION_INVALIDATED.status(),
            )
            .await?;
        info!("Host {} is invalidated", host.resource_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconciler<ResourceKey> for HostReconciler {
    async fn reconcile(&self, request: Request<ResourceKey>) -> Directive {
        let key = &request.key;
        info!("Reconciling Host {}", key);

        let host = match self.inventory.get_host(&key.tenant_id, &key.resource_id).await {
            Ok(host) => host,
            Err(e) => return handle_inventory_error(&request, e),
        };

        if let Some(provider) = &host.provider {
            info!(
                "Host {} is reconciled by the vendor specific controller of provider {}",
                key, provider.name
            );
            return request.ack();
        }

        if host.desired_state == host.current_state {
            debug!("Host {} reconciliation skipped", key);
            return request.ack();
        }

        self.reconcile_host(&request, &host).await
    }
}
