//! Onboarding view of the inventory client
//!
//! Wraps the raw [`InventoryClientTrait`] with the typed reads and
//! field-masked writes the reconcilers and the device-facing service need.
//! Every write names exactly the fields it owns so concurrent writers
//! (runtime status movers, other controllers) are not clobbered.
//!
//! Also owns the internal event queue: a bounded channel the reconcilers
//! use to re-trigger themselves without waiting for an inventory
//! notification. Producers never block; a full queue drops the event and
//! the periodic full reconciliation picks the resource up later.

use chrono::Utc;
use inventory_client::{
    find_all, list_all, ChangeEvent, EventKind, FieldMask, Host, HostNic, HostState, Instance,
    InstanceState, InventoryClientTrait, InventoryError, IpAddress, OperatingSystem, Provider,
    ProviderConfig, Resource, ResourceFilter, ResourceKey, ResourceKind, ResourceStatus,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Capacity of the internal event queue
pub const INTERNAL_EVENTS_BUFFER_SIZE: usize = 10;

const HOST_STATUS_FIELDS: [&str; 3] = ["host_status", "host_status_indicator", "host_status_timestamp"];
const ONBOARDING_STATUS_FIELDS: [&str; 3] = [
    "onboarding_status",
    "onboarding_status_indicator",
    "onboarding_status_timestamp",
];
const REGISTRATION_STATUS_FIELDS: [&str; 3] = [
    "registration_status",
    "registration_status_indicator",
    "registration_status_timestamp",
];
const PROVISIONING_STATUS_FIELDS: [&str; 3] = [
    "provisioning_status",
    "provisioning_status_indicator",
    "provisioning_status_timestamp",
];

/// Host identity fields an operator may correct through the node API
pub const HOST_IDENTITY_FIELDS: [&str; 4] = ["bmc_kind", "bmc_ip", "serial_number", "pxe_mac"];

pub struct OnboardingInventoryClient {
    client: Arc<dyn InventoryClientTrait>,
    internal_tx: mpsc::Sender<ChangeEvent>,
    internal_rx: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
}

impl std::fmt::Debug for OnboardingInventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingInventoryClient")
            .field("base_url", &self.client.base_url())
            .finish_non_exhaustive()
    }
}

fn mask(groups: &[&[&str]]) -> FieldMask {
    let paths: Vec<&str> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    FieldMask::new(&paths)
}

impl OnboardingInventoryClient {
    pub fn new(client: Arc<dyn InventoryClientTrait>) -> Self {
        Self::with_internal_buffer(client, INTERNAL_EVENTS_BUFFER_SIZE)
    }

    pub fn with_internal_buffer(client: Arc<dyn InventoryClientTrait>, buffer: usize) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(buffer.max(1));
        Self {
            client,
            internal_tx,
            internal_rx: Mutex::new(Some(internal_rx)),
        }
    }

    /// Underlying client, e.g. to start an [`inventory_client::EventWatcher`]
    pub fn inner(&self) -> Arc<dyn InventoryClientTrait> {
        Arc::clone(&self.client)
    }

    /// Receiving end of the internal event queue; only the first caller gets it
    pub fn take_internal_events(&self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.internal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask for `resource_id` to be reconciled again. Never blocks.
    pub fn send_internal_event(&self, tenant_id: &str, resource_id: &str) {
        let kind = match ResourceKind::from_resource_id(resource_id) {
            Ok(kind) => kind,
            Err(e) => {
                error!("Cannot send internal event for {}: {}", resource_id, e);
                return;
            }
        };
        let event = ChangeEvent {
            kind,
            tenant_id: tenant_id.to_string(),
            resource_id: resource_id.to_string(),
            event_kind: EventKind::Updated,
            sequence: 0,
        };
        match self.internal_tx.try_send(event) {
            Ok(()) => debug!(
                "Internal event queued for {}",
                ResourceKey::new(tenant_id, resource_id)
            ),
            Err(mpsc::error::TrySendError::Full(event)) => error!(
                "Internal event queue is full, dropping event for {}; periodic reconciliation will catch up",
                event.key()
            ),
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("Internal event queue closed, dropping event for {}", event.key());
            }
        }
    }

    // ---- generic ----

    /// Keys of every resource of `kinds`, across tenants
    pub async fn find_all_resources(
        &self,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceKey>, InventoryError> {
        let mut keys = Vec::new();
        for kind in kinds {
            keys.extend(find_all(self.client.as_ref(), &ResourceFilter::new(*kind)).await?);
        }
        Ok(keys)
    }

    pub async fn delete_resource(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        debug!("Deleting resource {}", ResourceKey::new(tenant_id, resource_id));
        self.client.delete(tenant_id, resource_id).await
    }

    // ---- hosts ----

    pub async fn get_host(&self, tenant_id: &str, resource_id: &str) -> Result<Host, InventoryError> {
        Host::try_from(self.client.get(tenant_id, resource_id).await?)
    }

    /// The single Host whose `field` equals `value`, optionally within a tenant
    pub async fn find_host(
        &self,
        tenant_id: Option<&str>,
        field: &str,
        value: &str,
    ) -> Result<Host, InventoryError> {
        let mut filter = ResourceFilter::new(ResourceKind::Host).field(field, value);
        if let Some(tenant_id) = tenant_id {
            filter = filter.tenant(tenant_id);
        }
        let mut hosts = list_all(self.client.as_ref(), &filter).await?;
        match hosts.len() {
            0 => Err(InventoryError::NotFound(format!("no host with {field}={value}"))),
            1 => Host::try_from(hosts.remove(0)),
            n => Err(InventoryError::Internal(format!(
                "{n} hosts share {field}={value}"
            ))),
        }
    }

    pub async fn get_host_by_uuid(&self, tenant_id: &str, uuid: &str) -> Result<Host, InventoryError> {
        self.find_host(Some(tenant_id), "uuid", uuid).await
    }

    pub async fn create_host(&self, tenant_id: &str, host: Host) -> Result<Host, InventoryError> {
        Host::try_from(self.client.create(tenant_id, Resource::Host(host)).await?)
    }

    async fn update_host(
        &self,
        tenant_id: &str,
        resource_id: &str,
        host: Host,
        field_mask: &FieldMask,
    ) -> Result<(), InventoryError> {
        debug!(
            "Updating host {} fields {:?}",
            ResourceKey::new(tenant_id, resource_id),
            field_mask.paths
        );
        self.client
            .update(tenant_id, resource_id, field_mask, Resource::Host(host))
            .await
            .map(|_| ())
    }

    /// Detail shown to the operator, e.g. deletion progress
    pub async fn set_host_status_detail(
        &self,
        tenant_id: &str,
        resource_id: &str,
        status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        let mut host = Host::default();
        host.set_host_status(status, Utc::now());
        self.update_host(tenant_id, resource_id, host, &mask(&[&HOST_STATUS_FIELDS]))
            .await
    }

    pub async fn set_host_onboarding_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        let mut host = Host::default();
        host.set_onboarding_status(status, Utc::now());
        self.update_host(tenant_id, resource_id, host, &mask(&[&ONBOARDING_STATUS_FIELDS]))
            .await
    }

    /// Current state together with the host status that explains it
    pub async fn update_host_state_and_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        current_state: HostState,
        status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        if status.status.is_empty() {
            return Err(InventoryError::InvalidArgument(
                "missing host status during host state update".to_string(),
            ));
        }
        let mut host = Host {
            current_state,
            ..Host::default()
        };
        host.set_host_status(status, Utc::now());
        self.update_host(
            tenant_id,
            resource_id,
            host,
            &mask(&[&["current_state"], &HOST_STATUS_FIELDS]),
        )
        .await
    }

    /// Mark the Host gone; inventory removes it once its current state is DELETED
    pub async fn delete_host(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        let host = Host {
            current_state: HostState::Deleted,
            ..Host::default()
        };
        self.update_host(tenant_id, resource_id, host, &FieldMask::new(&["current_state"]))
            .await
    }

    pub async fn set_host_desired_state(
        &self,
        tenant_id: &str,
        resource_id: &str,
        desired_state: HostState,
    ) -> Result<(), InventoryError> {
        let host = Host {
            desired_state,
            ..Host::default()
        };
        self.update_host(tenant_id, resource_id, host, &FieldMask::new(&["desired_state"]))
            .await
    }

    pub async fn set_host_uuid(&self, tenant_id: &str, resource_id: &str, uuid: &str) -> Result<(), InventoryError> {
        let host = Host {
            uuid: uuid.to_string(),
            ..Host::default()
        };
        self.update_host(tenant_id, resource_id, host, &FieldMask::new(&["uuid"]))
            .await
    }

    /// Registration progress reported by a device. Empty network fields are
    /// left untouched.
    pub async fn update_host_reg_state(
        &self,
        tenant_id: &str,
        resource_id: &str,
        current_state: HostState,
        bmc_ip: &str,
        pxe_mac: &str,
        status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        let mut host = Host {
            current_state,
            bmc_ip: bmc_ip.to_string(),
            pxe_mac: pxe_mac.to_string(),
            ..Host::default()
        };
        host.set_registration_status(status, Utc::now());
        let mut field_mask = mask(&[&["current_state"], &REGISTRATION_STATUS_FIELDS]);
        push_if_set(&mut field_mask, "bmc_ip", bmc_ip);
        push_if_set(&mut field_mask, "pxe_mac", pxe_mac);
        self.update_host(tenant_id, resource_id, host, &field_mask).await
    }

    /// Final step of onboarding over the device stream
    pub async fn update_host_current_state_and_onboarding_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        bmc_ip: &str,
        pxe_mac: &str,
        current_state: HostState,
        status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        let mut host = Host {
            current_state,
            bmc_ip: bmc_ip.to_string(),
            pxe_mac: pxe_mac.to_string(),
            ..Host::default()
        };
        host.set_onboarding_status(status, Utc::now());
        let mut field_mask = mask(&[&["current_state"], &ONBOARDING_STATUS_FIELDS]);
        push_if_set(&mut field_mask, "bmc_ip", bmc_ip);
        push_if_set(&mut field_mask, "pxe_mac", pxe_mac);
        self.update_host(tenant_id, resource_id, host, &field_mask).await
    }

    /// Identity repair for a re-registered device: serial, BMC and MAC,
    /// current state and both status fields in one write
    pub async fn update_host_resource_status(
        &self,
        host: &Host,
        onboarding_status: &ResourceStatus,
        registration_status: &ResourceStatus,
    ) -> Result<(), InventoryError> {
        let now = Utc::now();
        let mut patch = Host {
            serial_number: host.serial_number.clone(),
            bmc_ip: host.bmc_ip.clone(),
            pxe_mac: host.pxe_mac.clone(),
            current_state: host.current_state,
            ..Host::default()
        };
        patch.set_onboarding_status(onboarding_status, now);
        patch.set_registration_status(registration_status, now);
        self.update_host(
            &host.tenant_id,
            &host.resource_id,
            patch,
            &mask(&[
                &["serial_number", "bmc_ip", "pxe_mac", "current_state"],
                &ONBOARDING_STATUS_FIELDS,
                &REGISTRATION_STATUS_FIELDS,
            ]),
        )
        .await
    }

    /// Overwrite the identity fields named in `field_mask` with `host`'s values
    pub async fn update_host_identity(
        &self,
        tenant_id: &str,
        resource_id: &str,
        host: Host,
        field_mask: &FieldMask,
    ) -> Result<(), InventoryError> {
        if let Some(path) = field_mask
            .paths
            .iter()
            .find(|p| !HOST_IDENTITY_FIELDS.contains(&p.as_str()))
        {
            return Err(InventoryError::InvalidArgument(format!(
                "field {path} cannot be updated through the node API"
            )));
        }
        self.update_host(tenant_id, resource_id, host, field_mask).await
    }

    // ---- host children ----

    /// IP addresses are not eager loaded with the Host
    pub async fn list_ip_addresses(&self, nic: &HostNic) -> Result<Vec<IpAddress>, InventoryError> {
        let filter = ResourceFilter::new(ResourceKind::IpAddress)
            .tenant(nic.tenant_id.clone())
            .field("nic_id", nic.resource_id.clone());
        list_all(self.client.as_ref(), &filter)
            .await?
            .into_iter()
            .map(IpAddress::try_from)
            .collect()
    }

    // ---- instances ----

    pub async fn get_instance(&self, tenant_id: &str, resource_id: &str) -> Result<Instance, InventoryError> {
        Instance::try_from(self.client.get(tenant_id, resource_id).await?)
    }

    pub async fn create_instance(&self, tenant_id: &str, instance: Instance) -> Result<Instance, InventoryError> {
        Instance::try_from(self.client.create(tenant_id, Resource::Instance(instance)).await?)
    }

    pub async fn update_instance_current_state(
        &self,
        tenant_id: &str,
        resource_id: &str,
        current_state: InstanceState,
    ) -> Result<(), InventoryError> {
        let instance = Instance {
            current_state,
            ..Instance::default()
        };
        self.client
            .update(
                tenant_id,
                resource_id,
                &FieldMask::new(&["current_state"]),
                Resource::Instance(instance),
            )
            .await
            .map(|_| ())
    }

    /// Current state, provisioning status and the OS actually installed
    pub async fn update_instance(
        &self,
        tenant_id: &str,
        resource_id: &str,
        current_state: InstanceState,
        provisioning_status: &ResourceStatus,
        current_os: Option<OperatingSystem>,
    ) -> Result<(), InventoryError> {
        let mut instance = Instance {
            current_state,
            current_os,
            ..Instance::default()
        };
        instance.set_provisioning_status(provisioning_status, Utc::now());
        self.client
            .update(
                tenant_id,
                resource_id,
                &mask(&[&["current_state", "current_os"], &PROVISIONING_STATUS_FIELDS]),
                Resource::Instance(instance),
            )
            .await
            .map(|_| ())
    }

    // ---- OS and providers ----

    pub async fn get_os(&self, tenant_id: &str, resource_id: &str) -> Result<OperatingSystem, InventoryError> {
        OperatingSystem::try_from(self.client.get(tenant_id, resource_id).await?)
    }

    /// Parsed configuration of the tenant's provider called `name`
    pub async fn get_provider_config(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<ProviderConfig, InventoryError> {
        let filter = ResourceFilter::new(ResourceKind::Provider)
            .tenant(tenant_id)
            .field("name", name);
        let mut providers = list_all(self.client.as_ref(), &filter).await?;
        let provider = match providers.len() {
            0 => {
                return Err(InventoryError::NotFound(format!(
                    "provider {name} not found in tenant {tenant_id}"
                )));
            }
            1 => Provider::try_from(providers.remove(0))?,
            n => {
                return Err(InventoryError::Internal(format!(
                    "{n} providers named {name} in tenant {tenant_id}"
                )));
            }
        };
        Ok(serde_json::from_str(&provider.config)?)
    }
}

fn push_if_set(field_mask: &mut FieldMask, path: &str, value: &str) {
    if !value.is_empty() {
        field_mask.paths.push(path.to_string());
    }
}
