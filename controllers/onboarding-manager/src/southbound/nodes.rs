//! Interactive node registration
//!
//! Operators register, inspect, correct and retire devices by UUID or
//! serial number. Every call is tenant scoped and, when authorization is
//! enabled, checked against the caller's roles.

use super::api::{HwData, NodeData, NodeQuery, NodeRequest, NodeResponse, Status, validate_identity};
use super::zero_touch::ZeroTouch;
use crate::invclient::OnboardingInventoryClient;
use crate::status;
use chrono::Utc;
use inventory_client::{FieldMask, Host, HostState, InventoryError};
use provisioning_client::{Action, Authorizer, RequestContext};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// BMC kind recorded for operator-registered devices
pub const DEFAULT_BMC_KIND: &str = "BAREMETAL_CONTROLLER_KIND_PDU";

pub struct NodeService {
    inventory: Arc<OnboardingInventoryClient>,
    authorizer: Arc<dyn Authorizer>,
    zero_touch: ZeroTouch,
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}

impl NodeService {
    pub fn new(
        inventory: Arc<OnboardingInventoryClient>,
        authorizer: Arc<dyn Authorizer>,
        zero_touch: ZeroTouch,
    ) -> Self {
        Self {
            inventory,
            authorizer,
            zero_touch,
        }
    }

    /// Authorization first, then the tenant the call is scoped to
    async fn admit(&self, ctx: &RequestContext, action: Action) -> Result<String, Status> {
        if !self.authorizer.is_authorized(ctx, action).await {
            warn!("Request {:?} is blocked by authorization", action);
            return Err(Status::permission_denied("Request is blocked by RBAC"));
        }
        match ctx.tenant_id.as_deref() {
            Some(tenant_id) if !tenant_id.is_empty() => Ok(tenant_id.to_string()),
            _ => {
                warn!("Request {:?} carries no tenant", action);
                Err(Status::unauthenticated("Tenant ID is not present in context"))
            }
        }
    }

    fn validate(request: &NodeRequest) -> Result<(), Status> {
        let mut devices = request.hwdata().peekable();
        if devices.peek().is_none() {
            return Err(Status::invalid_argument("payload carries no hwdata"));
        }
        devices.try_for_each(|hw| validate_identity(&hw.uuid, &hw.serialnum))
    }

    /// Host in `tenant_id` matching the device's UUID, else its serial
    async fn find(&self, tenant_id: &str, uuid: &str, serialnum: &str) -> Result<Host, InventoryError> {
        if uuid.is_empty() {
            self.inventory
                .find_host(Some(tenant_id), "serial_number", serialnum)
                .await
        } else {
            self.inventory.get_host_by_uuid(tenant_id, uuid).await
        }
    }

    pub async fn create_nodes(&self, ctx: &RequestContext, request: NodeRequest) -> Result<NodeResponse, Status> {
        Self::validate(&request)?;
        let tenant_id = self.admit(ctx, Action::CreateNodes).await?;
        debug!("CreateNodes: tenant {}", tenant_id);

        for hw in request.hwdata() {
            self.create_node(&tenant_id, hw).await?;
        }
        Ok(NodeResponse {
            payload: request.payload,
            project_id: tenant_id,
        })
    }

    async fn create_node(&self, tenant_id: &str, hw: &HwData) -> Result<(), Status> {
        let host_id = match self.find(tenant_id, &hw.uuid, &hw.serialnum).await {
            Ok(mut existing) => {
                debug!("Host {} already exists for {}", existing.resource_id, hw.uuid);
                if existing.serial_number != hw.serialnum {
                    debug!("Serial number mismatch for {}, repairing host", hw.uuid);
                    existing.serial_number = hw.serialnum.clone();
                    existing.bmc_ip = hw.sut_ip.clone();
                    existing.pxe_mac = hw.mac_id.clone();
                    existing.current_state = HostState::Onboarded;
                    self.inventory
                        .update_host_resource_status(
                            &existing,
                            &status::ONBOARDING_DONE.status(),
                            &status::HOST_REGISTRATION_UNKNOWN.status(),
                        )
                        .await
                        .map_err(|e| {
                            error!("Failed to update host {}: {}", existing.resource_id, e);
                            Status::from(e)
                        })?;
                }
                existing.resource_id
            }
            Err(InventoryError::NotFound(_)) => {
                let mut host = Host {
                    tenant_id: tenant_id.to_string(),
                    uuid: hw.uuid.clone(),
                    serial_number: hw.serialnum.clone(),
                    bmc_ip: hw.sut_ip.clone(),
                    pxe_mac: hw.mac_id.clone(),
                    bmc_kind: DEFAULT_BMC_KIND.to_string(),
                    current_state: HostState::Onboarded,
                    ..Host::default()
                };
                host.set_onboarding_status(&status::ONBOARDING_DONE.status(), Utc::now());
                let created = self.inventory.create_host(tenant_id, host).await.map_err(|e| {
                    error!("Cannot create host for {} in tenant {}: {}", hw.uuid, tenant_id, e);
                    Status::from(e)
                })?;
                info!("Created host {} for device {}", created.resource_id, hw.uuid);
                created.resource_id
            }
            Err(e) => {
                error!("Failed to look up device {}: {}", hw.uuid, e);
                return Err(Status::from(e));
            }
        };

        self.zero_touch.start(tenant_id, &host_id).await.map_err(|e| {
            error!("Zero touch failed for host {}: {}", host_id, e);
            Status::from(e)
        })
    }

    pub async fn get_nodes(&self, ctx: &RequestContext, query: NodeQuery) -> Result<NodeResponse, Status> {
        validate_identity(&query.uuid, &query.serialnum)?;
        let tenant_id = self.admit(ctx, Action::GetNodes).await?;

        let host = self.find(&tenant_id, &query.uuid, &query.serialnum).await?;
        Ok(NodeResponse {
            payload: vec![NodeData {
                hwdata: vec![HwData {
                    uuid: host.uuid,
                    serialnum: host.serial_number,
                    mac_id: host.pxe_mac,
                    sut_ip: host.bmc_ip,
                }],
            }],
            project_id: tenant_id,
        })
    }

    /// Correct serial, BMC address or MAC of devices identified by UUID
    pub async fn update_nodes(&self, ctx: &RequestContext, request: NodeRequest) -> Result<NodeResponse, Status> {
        Self::validate(&request)?;
        if let Some(hw) = request.hwdata().find(|hw| hw.uuid.is_empty()) {
            return Err(Status::invalid_argument(format!(
                "uuid is required to update node {}",
                hw.serialnum
            )));
        }
        let tenant_id = self.admit(ctx, Action::UpdateNodes).await?;

        for hw in request.hwdata() {
            let host = self.inventory.get_host_by_uuid(&tenant_id, &hw.uuid).await?;
            let patch = Host {
                serial_number: hw.serialnum.clone(),
                bmc_ip: hw.sut_ip.clone(),
                pxe_mac: hw.mac_id.clone(),
                ..Host::default()
            };
            let paths: Vec<&str> = [
                ("serial_number", &hw.serialnum),
                ("bmc_ip", &hw.sut_ip),
                ("pxe_mac", &hw.mac_id),
            ]
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(path, _)| path)
            .collect();
            if paths.is_empty() {
                return Err(Status::invalid_argument(format!("nothing to update for {}", hw.uuid)));
            }
            self.inventory
                .update_host_identity(&tenant_id, &host.resource_id, patch, &FieldMask::new(&paths))
                .await?;
            debug!("Updated {:?} of host {}", paths, host.resource_id);
        }
        Ok(NodeResponse {
            payload: request.payload,
            project_id: tenant_id,
        })
    }

    /// Ask for the Host to be retired; the Host reconciler cascades the rest
    pub async fn delete_nodes(&self, ctx: &RequestContext, request: NodeRequest) -> Result<NodeResponse, Status> {
        Self::validate(&request)?;
        let tenant_id = self.admit(ctx, Action::DeleteNodes).await?;

        for hw in request.hwdata() {
            let host = self.find(&tenant_id, &hw.uuid, &hw.serialnum).await?;
            self.inventory
                .set_host_desired_state(&tenant_id, &host.resource_id, HostState::Deleted)
                .await?;
            info!("Host {} marked for deletion", host.resource_id);
        }
        Ok(NodeResponse {
            payload: request.payload,
            project_id: tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::southbound::api::Code;
    use crate::test_utils::{host, os, provider, Harness};
    use inventory_client::{Instance, ResourceKind, StatusIndication};
    use provisioning_client::StaticAuthorizer;

    const UUID_A: &str = "4c4c4544-0056-4810-8052-b4c04f4b3732";

    fn service(h: &Harness, authorizer: StaticAuthorizer) -> NodeService {
        NodeService::new(
            Arc::clone(&h.client),
            Arc::new(authorizer),
            ZeroTouch::new(Arc::clone(&h.client), "infra_onboarding"),
        )
    }

    fn ctx() -> RequestContext {
        RequestContext {
            tenant_id: Some("t1".to_string()),
            roles: vec!["node-rw".to_string()],
        }
    }

    fn nodes(uuid: &str, serial: &str) -> NodeRequest {
        NodeRequest {
            payload: vec![NodeData {
                hwdata: vec![HwData {
                    uuid: uuid.to_string(),
                    serialnum: serial.to_string(),
                    mac_id: "aa:bb:cc:00:11:22".to_string(),
                    sut_ip: "10.0.0.42".to_string(),
                }],
            }],
        }
    }

    fn hosts(h: &Harness) -> Vec<Host> {
        h.inventory
            .all_of(ResourceKind::Host)
            .into_iter()
            .map(|r| Host::try_from(r).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_create_registers_new_host() {
        let h = Harness::new();
        let response = service(&h, StaticAuthorizer::allow_all())
            .create_nodes(&ctx(), nodes(UUID_A, "SN-1"))
            .await
            .unwrap();
        assert_eq!(response.project_id, "t1");

        let created = hosts(&h);
        assert_eq!(created.len(), 1);
        let host = &created[0];
        assert_eq!(host.uuid, UUID_A);
        assert_eq!(host.serial_number, "SN-1");
        assert_eq!(host.bmc_kind, DEFAULT_BMC_KIND);
        assert_eq!(host.current_state, HostState::Onboarded);
        assert_eq!(host.onboarding_status, "Onboarded");
    }

    #[tokio::test]
    async fn test_create_repairs_serial_mismatch() {
        let h = Harness::new();
        let mut existing = host("host-00000001", "t1", HostState::Onboarded, HostState::Registered);
        existing.uuid = UUID_A.to_string();
        existing.serial_number = "SN-OLD".to_string();
        h.inventory.add_host(existing);

        service(&h, StaticAuthorizer::allow_all())
            .create_nodes(&ctx(), nodes(UUID_A, "SN-NEW"))
            .await
            .unwrap();

        let stored = h.inventory.host("t1", "host-00000001").unwrap();
        assert_eq!(stored.serial_number, "SN-NEW");
        assert_eq!(stored.bmc_ip, "10.0.0.42");
        assert_eq!(stored.pxe_mac, "aa:bb:cc:00:11:22");
        assert_eq!(stored.current_state, HostState::Onboarded);
        assert_eq!(stored.onboarding_status, "Onboarded");
        assert_eq!(stored.registration_status, "Unknown");
        assert_eq!(stored.registration_status_indicator, StatusIndication::Unspecified);
        assert_eq!(hosts(&h).len(), 1);
    }

    #[tokio::test]
    async fn test_create_runs_zero_touch() {
        let h = Harness::new();
        h.inventory.add(os("os-00000001", "t1"));
        h.inventory.add(provider(
            "t1",
            "infra_onboarding",
            r#"{"defaultOs":"os-00000001","autoProvision":true}"#,
        ));

        service(&h, StaticAuthorizer::allow_all())
            .create_nodes(&ctx(), nodes(UUID_A, "SN-1"))
            .await
            .unwrap();

        let instances: Vec<Instance> = h
            .inventory
            .all_of(ResourceKind::Instance)
            .into_iter()
            .map(|r| Instance::try_from(r).unwrap())
            .collect();
        assert_eq!(instances.len(), 1);
        assert_eq!(
            instances[0].host.as_ref().map(|h| h.resource_id.clone()),
            Some(hosts(&h)[0].resource_id.clone())
        );
    }

    #[tokio::test]
    async fn test_admission_order() {
        let h = Harness::new();
        let err = service(&h, StaticAuthorizer::allow_all())
            .create_nodes(&ctx(), nodes("", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);

        let err = service(&h, StaticAuthorizer::deny_all())
            .create_nodes(&ctx(), nodes(UUID_A, "SN-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::PermissionDenied);

        let err = service(&h, StaticAuthorizer::allow_all())
            .create_nodes(&RequestContext::default(), nodes(UUID_A, "SN-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_serial() {
        let h = Harness::new();
        h.inventory
            .add_host(host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded));
        let query = NodeQuery {
            serialnum: "SN-host-00000001".to_string(),
            ..NodeQuery::default()
        };
        let response = service(&h, StaticAuthorizer::allow_all())
            .get_nodes(&ctx(), query)
            .await
            .unwrap();
        assert_eq!(response.payload[0].hwdata[0].uuid, "uuid-host-00000001");

        let missing = NodeQuery {
            serialnum: "SN-404".to_string(),
            ..NodeQuery::default()
        };
        let err = service(&h, StaticAuthorizer::allow_all())
            .get_nodes(&ctx(), missing)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_patches_reported_fields_only() {
        let h = Harness::new();
        let mut existing = host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded);
        existing.uuid = UUID_A.to_string();
        h.inventory.add_host(existing);

        let mut request = nodes(UUID_A, "");
        request.payload[0].hwdata[0].mac_id = String::new();
        service(&h, StaticAuthorizer::allow_all())
            .update_nodes(&ctx(), request)
            .await
            .unwrap();

        let stored = h.inventory.host("t1", "host-00000001").unwrap();
        assert_eq!(stored.bmc_ip, "10.0.0.42");
        assert_eq!(stored.pxe_mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(stored.serial_number, "SN-host-00000001");
    }

    #[tokio::test]
    async fn test_delete_sets_desired_state() {
        let h = Harness::new();
        let mut existing = host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded);
        existing.uuid = UUID_A.to_string();
        h.inventory.add_host(existing);

        service(&h, StaticAuthorizer::allow_all())
            .delete_nodes(&ctx(), nodes(UUID_A, ""))
            .await
            .unwrap();
        let stored = h.inventory.host("t1", "host-00000001").unwrap();
        assert_eq!(stored.desired_state, HostState::Deleted);
        assert_eq!(stored.current_state, HostState::Onboarded);
    }
}
