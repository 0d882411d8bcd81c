//! Test utilities for unit testing reconcilers and the device-facing service
//!
//! Fixture builders for inventory resources plus a harness wiring mocks
//! together the way `main.rs` wires the real clients.

use crate::invclient::OnboardingInventoryClient;
use inventory_client::{
    Host, HostComponent, HostNic, HostState, Instance, InstanceRef, InstanceState, IpAddress,
    MockInventoryClient, OperatingSystem, OsProviderKind, OsType, Provider, ResourceKey,
    SecurityFeature,
};
use provisioning_client::{MockCredentialClient, MockWorkflowClient};
use reconcile::Request;
use std::sync::Arc;
use std::time::Duration;

pub fn mock_inventory() -> MockInventoryClient {
    MockInventoryClient::new("http://inventory.test")
}

pub fn request(tenant_id: &str, resource_id: &str) -> Request<ResourceKey> {
    Request::new(
        ResourceKey::new(tenant_id, resource_id),
        0,
        tokio::time::Instant::now() + Duration::from_secs(60),
    )
}

pub fn host(resource_id: &str, tenant_id: &str, desired: HostState, current: HostState) -> Host {
    Host {
        resource_id: resource_id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: format!("name-{resource_id}"),
        desired_state: desired,
        current_state: current,
        uuid: format!("uuid-{resource_id}"),
        serial_number: format!("SN-{resource_id}"),
        bmc_ip: "10.0.0.10".to_string(),
        pxe_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        ..Default::default()
    }
}

pub fn os(resource_id: &str, tenant_id: &str) -> OperatingSystem {
    OperatingSystem {
        resource_id: resource_id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: "Ubuntu 22.04".to_string(),
        image_url: "https://files.example.com/images/ubuntu-22.04.img".to_string(),
        sha256: "abc123".to_string(),
        profile_name: "ubuntu-22.04-lts-generic".to_string(),
        os_type: OsType::Mutable,
        os_provider: OsProviderKind::Infra,
        platform_bundle: "{}".to_string(),
        security_feature: SecurityFeature::SecureBootAndFullDiskEncryption,
        ..Default::default()
    }
}

/// Instance on `host` with `os` as desired OS
pub fn instance(
    resource_id: &str,
    host: &Host,
    os: &OperatingSystem,
    desired: InstanceState,
    current: InstanceState,
) -> Instance {
    Instance {
        resource_id: resource_id.to_string(),
        tenant_id: host.tenant_id.clone(),
        name: format!("name-{resource_id}"),
        kind: "metal".to_string(),
        desired_state: desired,
        current_state: current,
        desired_os: Some(os.clone()),
        security_feature: os.security_feature,
        host: Some(host.clone()),
        ..Default::default()
    }
}

/// Link `host` to `instance` the way inventory reports the back reference
pub fn attach(host: &mut Host, instance_id: &str) {
    host.instance = Some(InstanceRef {
        resource_id: instance_id.to_string(),
    });
}

pub fn provider(tenant_id: &str, name: &str, config: &str) -> Provider {
    Provider {
        resource_id: "provider-00000001".to_string(),
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        provider_kind: "PROVIDER_KIND_BAREMETAL".to_string(),
        config: config.to_string(),
        ..Default::default()
    }
}

pub fn nic(resource_id: &str, tenant_id: &str) -> HostNic {
    HostNic {
        resource_id: resource_id.to_string(),
        tenant_id: tenant_id.to_string(),
        device_name: "eth0".to_string(),
        mac_addr: "aa:bb:cc:dd:ee:ff".to_string(),
    }
}

pub fn ip(resource_id: &str, nic: &HostNic, address: &str) -> IpAddress {
    IpAddress {
        resource_id: resource_id.to_string(),
        tenant_id: nic.tenant_id.clone(),
        address: address.to_string(),
        nic_id: nic.resource_id.clone(),
    }
}

pub fn component(resource_id: &str, tenant_id: &str) -> HostComponent {
    HostComponent {
        resource_id: resource_id.to_string(),
        tenant_id: tenant_id.to_string(),
        device_name: format!("dev-{resource_id}"),
    }
}

/// Mocks for every collaborator, sharing state with the clients handed out
pub struct Harness {
    pub inventory: MockInventoryClient,
    pub client: Arc<OnboardingInventoryClient>,
    pub credentials: MockCredentialClient,
    pub workflows: MockWorkflowClient,
}

impl Harness {
    pub fn new() -> Self {
        let inventory = mock_inventory();
        let client = Arc::new(OnboardingInventoryClient::new(Arc::new(inventory.clone())));
        Self {
            inventory,
            client,
            credentials: MockCredentialClient::new(),
            workflows: MockWorkflowClient::new(),
        }
    }
}
