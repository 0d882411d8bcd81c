//! Inventory resource models
//!
//! Field names match the inventory service's JSON representation, so they
//! double as the paths used in field masks and equality filters.

use crate::error::InventoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a Host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    #[default]
    Unspecified,
    Registered,
    Onboarded,
    Untrusted,
    Deleted,
    Error,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Unspecified => "HOST_STATE_UNSPECIFIED",
            HostState::Registered => "HOST_STATE_REGISTERED",
            HostState::Onboarded => "HOST_STATE_ONBOARDED",
            HostState::Untrusted => "HOST_STATE_UNTRUSTED",
            HostState::Deleted => "HOST_STATE_DELETED",
            HostState::Error => "HOST_STATE_ERROR",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an Instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    #[default]
    Unspecified,
    Running,
    Deleted,
    Untrusted,
}

/// Severity attached to a human readable status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusIndication {
    #[default]
    Unspecified,
    Error,
    InProgress,
    Idle,
}

/// Whether an OS image may change after it has been installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OsType {
    #[default]
    Unspecified,
    Mutable,
    Immutable,
}

/// Who provides (and provisions) an OS image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OsProviderKind {
    #[default]
    Unspecified,
    Infra,
    Lenovo,
}

/// Platform security features requested for an OS install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityFeature {
    #[default]
    Unspecified,
    None,
    SecureBootAndFullDiskEncryption,
}

/// Human readable status plus its severity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub status: String,
    pub indicator: StatusIndication,
}

impl ResourceStatus {
    pub fn new(status: impl Into<String>, indicator: StatusIndication) -> Self {
        Self {
            status: status.into(),
            indicator,
        }
    }
}

/// Reference to the provider that owns a resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Provider {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub provider_kind: String,
    pub api_endpoint: String,
    /// JSON encoded provider specific configuration
    pub config: String,
}

/// Configuration blob carried by the onboarding provider
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub default_os: String,
    pub auto_provision: bool,
    pub default_local_account: String,
    pub os_security_feature_enable: bool,
}

/// Network interface of a Host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostNic {
    pub resource_id: String,
    pub tenant_id: String,
    pub device_name: String,
    pub mac_addr: String,
}

/// Storage, USB or GPU child of a Host; only identity matters here
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostComponent {
    pub resource_id: String,
    pub tenant_id: String,
    pub device_name: String,
}

/// IP address bound to a Host NIC
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpAddress {
    pub resource_id: String,
    pub tenant_id: String,
    pub address: String,
    /// Resource ID of the NIC this address is assigned to
    pub nic_id: String,
}

/// Shallow reference from a Host to its Instance
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceRef {
    pub resource_id: String,
}

/// Physical compute node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub desired_state: HostState,
    pub current_state: HostState,

    pub uuid: String,
    pub serial_number: String,
    pub hostname: String,
    pub pxe_mac: String,
    pub bmc_ip: String,
    pub bmc_kind: String,

    pub host_status: String,
    pub host_status_indicator: StatusIndication,
    pub host_status_timestamp: Option<DateTime<Utc>>,
    pub onboarding_status: String,
    pub onboarding_status_indicator: StatusIndication,
    pub onboarding_status_timestamp: Option<DateTime<Utc>>,
    pub registration_status: String,
    pub registration_status_indicator: StatusIndication,
    pub registration_status_timestamp: Option<DateTime<Utc>>,

    /// Set when a vendor specific reconciler owns this Host
    pub provider: Option<Provider>,
    pub instance: Option<InstanceRef>,

    pub host_nics: Vec<HostNic>,
    pub host_storages: Vec<HostComponent>,
    pub host_usbs: Vec<HostComponent>,
    pub host_gpus: Vec<HostComponent>,
}

impl Host {
    pub fn host_status(&self) -> ResourceStatus {
        ResourceStatus::new(self.host_status.clone(), self.host_status_indicator)
    }

    pub fn onboarding_status(&self) -> ResourceStatus {
        ResourceStatus::new(self.onboarding_status.clone(), self.onboarding_status_indicator)
    }

    pub fn set_host_status(&mut self, status: &ResourceStatus, at: DateTime<Utc>) {
        self.host_status.clone_from(&status.status);
        self.host_status_indicator = status.indicator;
        self.host_status_timestamp = Some(at);
    }

    pub fn set_onboarding_status(&mut self, status: &ResourceStatus, at: DateTime<Utc>) {
        self.onboarding_status.clone_from(&status.status);
        self.onboarding_status_indicator = status.indicator;
        self.onboarding_status_timestamp = Some(at);
    }

    pub fn set_registration_status(&mut self, status: &ResourceStatus, at: DateTime<Utc>) {
        self.registration_status.clone_from(&status.status);
        self.registration_status_indicator = status.indicator;
        self.registration_status_timestamp = Some(at);
    }
}

/// OS image definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingSystem {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub image_url: String,
    pub image_id: String,
    pub sha256: String,
    pub profile_name: String,
    pub os_type: OsType,
    pub os_provider: OsProviderKind,
    pub platform_bundle: String,
    pub security_feature: SecurityFeature,
}

/// Local login account installed with the OS
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAccount {
    pub resource_id: String,
    pub username: String,
}

/// OS deployment onto a Host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub kind: String,
    pub desired_state: InstanceState,
    pub current_state: InstanceState,
    pub desired_os: Option<OperatingSystem>,
    pub current_os: Option<OperatingSystem>,
    pub security_feature: SecurityFeature,
    pub local_account: Option<LocalAccount>,

    pub instance_status: String,
    pub instance_status_indicator: StatusIndication,
    pub instance_status_timestamp: Option<DateTime<Utc>>,
    pub provisioning_status: String,
    pub provisioning_status_indicator: StatusIndication,
    pub provisioning_status_timestamp: Option<DateTime<Utc>>,

    /// Owning Host, eagerly loaded
    pub host: Option<Host>,
}

impl Instance {
    pub fn provisioning_status(&self) -> ResourceStatus {
        ResourceStatus::new(
            self.provisioning_status.clone(),
            self.provisioning_status_indicator,
        )
    }

    pub fn set_provisioning_status(&mut self, status: &ResourceStatus, at: DateTime<Utc>) {
        self.provisioning_status.clone_from(&status.status);
        self.provisioning_status_indicator = status.indicator;
        self.provisioning_status_timestamp = Some(at);
    }
}

/// Kinds of resources stored in inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Host,
    Instance,
    Os,
    Provider,
    HostNic,
    HostStorage,
    HostUsb,
    HostGpu,
    IpAddress,
}

impl ResourceKind {
    /// Prefix used in resource IDs, e.g. `host-1a2b3c4d`
    pub fn id_prefix(self) -> &'static str {
        match self {
            ResourceKind::Host => "host",
            ResourceKind::Instance => "inst",
            ResourceKind::Os => "os",
            ResourceKind::Provider => "provider",
            ResourceKind::HostNic => "hostnic",
            ResourceKind::HostStorage => "hoststorage",
            ResourceKind::HostUsb => "hostusb",
            ResourceKind::HostGpu => "hostgpu",
            ResourceKind::IpAddress => "ipaddr",
        }
    }

    /// Collection name in the REST API
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Host => "hosts",
            ResourceKind::Instance => "instances",
            ResourceKind::Os => "os",
            ResourceKind::Provider => "providers",
            ResourceKind::HostNic => "hostnics",
            ResourceKind::HostStorage => "hoststorages",
            ResourceKind::HostUsb => "hostusbs",
            ResourceKind::HostGpu => "hostgpus",
            ResourceKind::IpAddress => "ipaddresses",
        }
    }

    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Host,
            ResourceKind::Instance,
            ResourceKind::Os,
            ResourceKind::Provider,
            ResourceKind::HostNic,
            ResourceKind::HostStorage,
            ResourceKind::HostUsb,
            ResourceKind::HostGpu,
            ResourceKind::IpAddress,
        ]
    }

    /// Derive the kind from a resource ID prefix
    pub fn from_resource_id(resource_id: &str) -> Result<Self, InventoryError> {
        let prefix = resource_id
            .split_once('-')
            .map(|(prefix, _)| prefix)
            .ok_or_else(|| {
                InventoryError::InvalidArgument(format!("malformed resource ID: {resource_id}"))
            })?;
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.id_prefix() == prefix)
            .ok_or_else(|| {
                InventoryError::InvalidArgument(format!("unknown resource kind in ID: {resource_id}"))
            })
    }

    /// Mint a fresh resource ID of this kind
    pub fn new_resource_id(self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.id_prefix(), &id[..8])
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Any inventory resource, tagged by kind on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "resource", rename_all = "snake_case")]
pub enum Resource {
    Host(Host),
    Instance(Instance),
    Os(OperatingSystem),
    Provider(Provider),
    HostNic(HostNic),
    HostStorage(HostComponent),
    HostUsb(HostComponent),
    HostGpu(HostComponent),
    IpAddress(IpAddress),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Host(_) => ResourceKind::Host,
            Resource::Instance(_) => ResourceKind::Instance,
            Resource::Os(_) => ResourceKind::Os,
            Resource::Provider(_) => ResourceKind::Provider,
            Resource::HostNic(_) => ResourceKind::HostNic,
            Resource::HostStorage(_) => ResourceKind::HostStorage,
            Resource::HostUsb(_) => ResourceKind::HostUsb,
            Resource::HostGpu(_) => ResourceKind::HostGpu,
            Resource::IpAddress(_) => ResourceKind::IpAddress,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Resource::Host(r) => &r.resource_id,
            Resource::Instance(r) => &r.resource_id,
            Resource::Os(r) => &r.resource_id,
            Resource::Provider(r) => &r.resource_id,
            Resource::HostNic(r) => &r.resource_id,
            Resource::HostStorage(r) | Resource::HostUsb(r) | Resource::HostGpu(r) => {
                &r.resource_id
            }
            Resource::IpAddress(r) => &r.resource_id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            Resource::Host(r) => &r.tenant_id,
            Resource::Instance(r) => &r.tenant_id,
            Resource::Os(r) => &r.tenant_id,
            Resource::Provider(r) => &r.tenant_id,
            Resource::HostNic(r) => &r.tenant_id,
            Resource::HostStorage(r) | Resource::HostUsb(r) | Resource::HostGpu(r) => {
                &r.tenant_id
            }
            Resource::IpAddress(r) => &r.tenant_id,
        }
    }

    /// Tenant and resource ID pair
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.tenant_id(), self.resource_id())
    }

    /// Overwrite identity fields, used when the service assigns them
    pub fn set_identity(&mut self, tenant_id: &str, resource_id: &str) {
        macro_rules! assign {
            ($r:expr) => {{
                $r.tenant_id = tenant_id.to_string();
                $r.resource_id = resource_id.to_string();
            }};
        }
        match self {
            Resource::Host(r) => assign!(r),
            Resource::Instance(r) => assign!(r),
            Resource::Os(r) => assign!(r),
            Resource::Provider(r) => assign!(r),
            Resource::HostNic(r) => assign!(r),
            Resource::HostStorage(r) | Resource::HostUsb(r) | Resource::HostGpu(r) => assign!(r),
            Resource::IpAddress(r) => assign!(r),
        }
    }
}

macro_rules! impl_resource_conversion {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Resource {
            fn from(value: $ty) -> Self {
                Resource::$variant(value)
            }
        }

        impl TryFrom<Resource> for $ty {
            type Error = InventoryError;

            fn try_from(value: Resource) -> Result<Self, Self::Error> {
                match value {
                    Resource::$variant(inner) => Ok(inner),
                    other => Err(InventoryError::Internal(format!(
                        "expected {} resource, got {} ({})",
                        stringify!($variant),
                        other.kind(),
                        other.resource_id()
                    ))),
                }
            }
        }
    };
}

impl_resource_conversion!(Host, Host);
impl_resource_conversion!(Instance, Instance);
impl_resource_conversion!(Os, OperatingSystem);
impl_resource_conversion!(Provider, Provider);
impl_resource_conversion!(HostNic, HostNic);
impl_resource_conversion!(IpAddress, IpAddress);

/// Composite key identifying a resource across tenants
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceKey {
    pub tenant_id: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(tenant_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[tenantID={}, resourceID={}]",
            self.tenant_id, self.resource_id
        )
    }
}

/// Explicit list of fields an update may touch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMask {
    pub paths: Vec<String>,
}

impl FieldMask {
    pub fn new(paths: &[&str]) -> Self {
        Self {
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Equality filter over top level resource fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFilter {
    pub kind: ResourceKind,
    /// `None` spans every tenant
    pub tenant_id: Option<String>,
    pub fields: Vec<(String, String)>,
    pub limit: u32,
    pub offset: u32,
}

impl ResourceFilter {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            tenant_id: None,
            fields: Vec::new(),
            limit: 0,
            offset: 0,
        }
    }

    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// One page of a list or find call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
    #[serde(default)]
    pub total_elements: u32,
}

/// Kind of change a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// Resource change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
    pub tenant_id: String,
    pub resource_id: String,
    pub event_kind: EventKind,
    /// Monotonic per subscription, used to drop replays after a reconnect
    #[serde(default)]
    pub sequence: u64,
}

impl ChangeEvent {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.tenant_id.clone(), self.resource_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_resource_id() {
        assert_eq!(
            ResourceKind::from_resource_id("host-12345678").unwrap(),
            ResourceKind::Host
        );
        assert_eq!(
            ResourceKind::from_resource_id("inst-abcdef01").unwrap(),
            ResourceKind::Instance
        );
        assert_eq!(
            ResourceKind::from_resource_id("hostnic-00000001").unwrap(),
            ResourceKind::HostNic
        );
        assert!(ResourceKind::from_resource_id("nohyphen").is_err());
        assert!(ResourceKind::from_resource_id("bogus-1234").is_err());
    }

    #[test]
    fn test_new_resource_id_has_prefix() {
        let id = ResourceKind::IpAddress.new_resource_id();
        assert!(id.starts_with("ipaddr-"));
        assert_eq!(ResourceKind::from_resource_id(&id).unwrap(), ResourceKind::IpAddress);
    }

    #[test]
    fn test_resource_key_display() {
        let key = ResourceKey::new("t1", "host-1");
        assert_eq!(key.to_string(), "[tenantID=t1, resourceID=host-1]");
    }

    #[test]
    fn test_provider_config_json() {
        let cfg: ProviderConfig = serde_json::from_str(
            r#"{"defaultOs":"os-1","autoProvision":true,"osSecurityFeatureEnable":true}"#,
        )
        .unwrap();
        assert_eq!(cfg.default_os, "os-1");
        assert!(cfg.auto_provision);
        assert!(cfg.os_security_feature_enable);
        assert!(cfg.default_local_account.is_empty());
    }

    #[test]
    fn test_resource_wire_tagging() {
        let host = Host {
            resource_id: "host-1".into(),
            tenant_id: "t1".into(),
            uuid: "u".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(Resource::from(host)).unwrap();
        assert_eq!(json["kind"], "host");
        assert_eq!(json["resource"]["uuid"], "u");
        let back: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(back.key(), ResourceKey::new("t1", "host-1"));
    }

    #[test]
    fn test_try_from_wrong_kind() {
        let r = Resource::Os(OperatingSystem::default());
        assert!(Host::try_from(r).is_err());
    }
}
