//! Zero-touch provisioning
//!
//! Once a Host is onboarded, the tenant's default provider config decides
//! whether an Instance with the default OS is created for it right away.

use crate::invclient::OnboardingInventoryClient;
use inventory_client::{Host, Instance, InstanceState, InventoryError, LocalAccount, ProviderConfig};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ZeroTouch {
    inventory: Arc<OnboardingInventoryClient>,
    provider_name: String,
}

impl ZeroTouch {
    pub fn new(inventory: Arc<OnboardingInventoryClient>, provider_name: impl Into<String>) -> Self {
        Self {
            inventory,
            provider_name: provider_name.into(),
        }
    }

    /// Create the auto-provisioned Instance for `host_id` if its tenant asks
    /// for one. A Host that already has an Instance is left alone.
    pub async fn start(&self, tenant_id: &str, host_id: &str) -> Result<(), InventoryError> {
        info!("Starting zero touch for host {} in tenant {}", host_id, tenant_id);

        let host = self.inventory.get_host(tenant_id, host_id).await.map_err(|e| {
            error!("No host found with resource ID {} in tenant {}: {}", host_id, tenant_id, e);
            e
        })?;

        if let Some(instance) = &host.instance {
            debug!(
                "Instance {} already exists for host {}",
                instance.resource_id, host.resource_id
            );
            return Ok(());
        }

        let config = match self
            .inventory
            .get_provider_config(tenant_id, &self.provider_name)
            .await
        {
            Ok(config) => config,
            Err(e) => {
                // No provider config means the tenant did not opt in
                error!("Failed to get provider configuration {}: {}", self.provider_name, e);
                return Ok(());
            }
        };

        self.create_instance(tenant_id, &config, &host).await
    }

    async fn create_instance(
        &self,
        tenant_id: &str,
        config: &ProviderConfig,
        host: &Host,
    ) -> Result<(), InventoryError> {
        if !config.auto_provision {
            debug!("Auto provisioning disabled for tenant {}", tenant_id);
            return Ok(());
        }

        let os = self.inventory.get_os(tenant_id, &config.default_os).await.map_err(|e| {
            error!("Failed to get OS {} for host {}: {}", config.default_os, host.resource_id, e);
            e
        })?;

        let local_account = (!config.default_local_account.is_empty()).then(|| LocalAccount {
            resource_id: config.default_local_account.clone(),
            ..LocalAccount::default()
        });

        let instance = Instance {
            tenant_id: tenant_id.to_string(),
            kind: "metal".to_string(),
            desired_state: InstanceState::Running,
            current_state: InstanceState::Unspecified,
            security_feature: os.security_feature,
            desired_os: Some(os),
            local_account,
            host: Some(Host {
                resource_id: host.resource_id.clone(),
                tenant_id: tenant_id.to_string(),
                ..Host::default()
            }),
            ..Instance::default()
        };

        let created = self.inventory.create_instance(tenant_id, instance).await.map_err(|e| {
            error!("Failed to create instance for host {}: {}", host.resource_id, e);
            e
        })?;
        info!(
            "Created instance {} for host {} with OS {}",
            created.resource_id, host.resource_id, config.default_os
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{attach, host, os, provider, Harness};
    use inventory_client::{HostState, ResourceKind, SecurityFeature};

    const PROVIDER: &str = "infra_onboarding";

    fn zero_touch(h: &Harness) -> ZeroTouch {
        ZeroTouch::new(Arc::clone(&h.client), PROVIDER)
    }

    fn instances(h: &Harness) -> Vec<Instance> {
        h.inventory
            .all_of(ResourceKind::Instance)
            .into_iter()
            .map(|r| Instance::try_from(r).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_auto_provision_creates_instance() {
        let h = Harness::new();
        h.inventory
            .add_host(host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded));
        h.inventory.add(os("os-00000001", "t1"));
        h.inventory.add(provider(
            "t1",
            PROVIDER,
            r#"{"defaultOs":"os-00000001","autoProvision":true,"defaultLocalAccount":"localaccount-00000001"}"#,
        ));

        zero_touch(&h).start("t1", "host-00000001").await.unwrap();

        let created = instances(&h);
        assert_eq!(created.len(), 1);
        let instance = &created[0];
        assert_eq!(instance.kind, "metal");
        assert_eq!(instance.desired_state, InstanceState::Running);
        assert_eq!(instance.security_feature, SecurityFeature::SecureBootAndFullDiskEncryption);
        assert_eq!(
            instance.desired_os.as_ref().map(|os| os.resource_id.as_str()),
            Some("os-00000001")
        );
        assert_eq!(
            instance.host.as_ref().map(|h| h.resource_id.as_str()),
            Some("host-00000001")
        );
        assert_eq!(
            instance.local_account.as_ref().map(|a| a.resource_id.as_str()),
            Some("localaccount-00000001")
        );
    }

    #[tokio::test]
    async fn test_existing_instance_is_left_alone() {
        let h = Harness::new();
        let mut node = host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded);
        attach(&mut node, "inst-00000001");
        h.inventory.add_host(node);
        h.inventory.add(provider("t1", PROVIDER, r#"{"defaultOs":"os-00000001","autoProvision":true}"#));

        zero_touch(&h).start("t1", "host-00000001").await.unwrap();
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_or_opt_out_is_a_no_op() {
        let h = Harness::new();
        h.inventory
            .add_host(host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded));
        zero_touch(&h).start("t1", "host-00000001").await.unwrap();

        h.inventory.add(provider("t1", PROVIDER, r#"{"defaultOs":"os-00000001","autoProvision":false}"#));
        zero_touch(&h).start("t1", "host-00000001").await.unwrap();
        assert!(instances(&h).is_empty());
    }

    #[tokio::test]
    async fn test_missing_host_or_os_is_an_error() {
        let h = Harness::new();
        assert!(zero_touch(&h).start("t1", "host-00000404").await.unwrap_err().is_not_found());

        h.inventory
            .add_host(host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded));
        h.inventory.add(provider("t1", PROVIDER, r#"{"defaultOs":"os-00000404","autoProvision":true}"#));
        assert!(zero_touch(&h).start("t1", "host-00000001").await.unwrap_err().is_not_found());
    }
}
