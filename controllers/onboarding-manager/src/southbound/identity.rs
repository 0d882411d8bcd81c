//! Device identity resolution
//!
//! A device claims a UUID and/or a serial number. Each claim is looked up
//! on its own and the results must agree:
//!
//! | UUID hit | serial hit | outcome                                          |
//! |----------|------------|--------------------------------------------------|
//! | yes, host has no serial | -   | proceed                                 |
//! | no       | yes, host has no UUID | adopt the claimed UUID, proceed      |
//! | yes      | yes, same host | proceed                                     |
//! | yes      | yes, other host | `InvalidArgument`, never merged            |
//! | yes      | no         | record serial mismatch on the host, `NotFound`  |
//! | no       | yes        | record UUID mismatch on the host, `NotFound`    |
//! | no       | no         | `NotFound`                                      |

use super::api::Status;
use crate::invclient::OnboardingInventoryClient;
use crate::status;
use inventory_client::{Host, InventoryError, ResourceStatus};
use tracing::{debug, error, info};

/// Identity a device claims
#[derive(Debug, Clone, Copy)]
pub struct Claim<'a> {
    pub uuid: &'a str,
    pub serial: &'a str,
}

/// Lookup across tenants; a device does not know its tenant
async fn lookup(
    inventory: &OnboardingInventoryClient,
    field: &str,
    value: &str,
) -> Result<Option<Host>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    match inventory.find_host(None, field, value).await {
        Ok(host) => {
            debug!("Node exists for {} {}", field, value);
            Ok(Some(host))
        }
        Err(InventoryError::NotFound(_)) => {
            debug!("Node doesn't exist for {} {}", field, value);
            Ok(None)
        }
        Err(e) => {
            error!("Error retrieving host resource by {}: {}", field, e);
            Err(Status::internal(format!("Error retrieving host resource by {field}")))
        }
    }
}

/// Map a claimed identity to exactly one Host
pub async fn resolve_host(inventory: &OnboardingInventoryClient, claim: Claim<'_>) -> Result<Host, Status> {
    if claim.uuid.is_empty() && claim.serial.is_empty() {
        return Err(Status::invalid_argument("either uuid or serialnum is required"));
    }

    let by_uuid = lookup(inventory, "uuid", claim.uuid).await?;
    if let Some(host) = &by_uuid {
        if host.serial_number.is_empty() {
            debug!(
                "Proceeding with registration for UUID {} with no serial number in inventory",
                claim.uuid
            );
            return Ok(host.clone());
        }
    }

    let by_serial = lookup(inventory, "serial_number", claim.serial).await?;

    match (by_uuid, by_serial) {
        (Some(a), Some(b)) if a.resource_id != b.resource_id => {
            debug!(
                "UUID {} and serial number {} refer to {} and {}",
                claim.uuid, claim.serial, a.resource_id, b.resource_id
            );
            Err(Status::invalid_argument(
                "UUID and Serial Number refer to different resources",
            ))
        }
        (Some(host), Some(_)) => Ok(host),
        (None, Some(mut host)) if host.uuid.is_empty() => {
            if !claim.uuid.is_empty() {
                inventory
                    .set_host_uuid(&host.tenant_id, &host.resource_id, claim.uuid)
                    .await
                    .map_err(|e| {
                        error!("Failed to record UUID of {}: {}", host.resource_id, e);
                        Status::internal("failed to update the host resource uuid")
                    })?;
                host.uuid = claim.uuid.to_string();
            }
            debug!(
                "Proceeding with registration for serial number {} with no UUID in inventory",
                claim.serial
            );
            Ok(host)
        }
        (Some(host), None) => {
            error!("Node doesn't exist for serial number {:?}", claim.serial);
            let failure = status::registration_serial_failed(claim.serial);
            record_mismatch(inventory, &host, &failure).await?;
            Err(Status::not_found(format!(
                "Node doesn't exist for serial_number: {}",
                claim.serial
            )))
        }
        (None, Some(host)) => {
            error!("Node doesn't exist for UUID {:?}", claim.uuid);
            let failure = status::registration_uuid_failed(claim.uuid);
            record_mismatch(inventory, &host, &failure).await?;
            Err(Status::not_found(format!("Node doesn't exist for uuid: {}", claim.uuid)))
        }
        (None, None) => {
            info!("Device not found for provided UUID and Serial Number");
            Err(Status::not_found("Device not found for both UUID and Serial Number"))
        }
    }
}

/// Surface the mismatch on the Host the device half-matched
async fn record_mismatch(
    inventory: &OnboardingInventoryClient,
    host: &Host,
    failure: &ResourceStatus,
) -> Result<(), Status> {
    inventory
        .update_host_reg_state(
            &host.tenant_id,
            &host.resource_id,
            host.current_state,
            "",
            "",
            failure,
        )
        .await
        .map_err(Status::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::southbound::api::Code;
    use crate::test_utils::{host, Harness};
    use inventory_client::{HostState, StatusIndication};

    const UUID_A: &str = "4c4c4544-0056-4810-8052-b4c04f4b3732";
    const UUID_B: &str = "4c4c4544-0056-4810-8052-b4c04f4b3733";

    fn seed(h: &Harness, id: &str, uuid: &str, serial: &str) {
        let mut node = host(id, "t1", HostState::Registered, HostState::Unspecified);
        node.uuid = uuid.to_string();
        node.serial_number = serial.to_string();
        h.inventory.add_host(node);
    }

    fn claim<'a>(uuid: &'a str, serial: &'a str) -> Claim<'a> {
        Claim { uuid, serial }
    }

    #[tokio::test]
    async fn test_uuid_match_without_recorded_serial() {
        let h = Harness::new();
        seed(&h, "host-00000001", UUID_A, "");
        let found = resolve_host(&h.client, claim(UUID_A, "SN-1")).await.unwrap();
        assert_eq!(found.resource_id, "host-00000001");
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_both_claims_match_same_host() {
        let h = Harness::new();
        seed(&h, "host-00000001", UUID_A, "SN-1");
        let found = resolve_host(&h.client, claim(UUID_A, "SN-1")).await.unwrap();
        assert_eq!(found.resource_id, "host-00000001");
    }

    #[tokio::test]
    async fn test_serial_match_adopts_uuid() {
        let h = Harness::new();
        seed(&h, "host-00000001", "", "SN-1");
        let found = resolve_host(&h.client, claim(UUID_A, "SN-1")).await.unwrap();
        assert_eq!(found.uuid, UUID_A);
        assert_eq!(h.inventory.host("t1", "host-00000001").unwrap().uuid, UUID_A);
    }

    #[tokio::test]
    async fn test_claims_on_different_hosts_are_never_merged() {
        let h = Harness::new();
        seed(&h, "host-00000001", UUID_A, "SN-1");
        seed(&h, "host-00000002", UUID_B, "SN-2");
        let err = resolve_host(&h.client, claim(UUID_A, "SN-2")).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_serial_mismatch_is_recorded() {
        let h = Harness::new();
        seed(&h, "host-00000001", UUID_A, "SN-1");
        let err = resolve_host(&h.client, claim(UUID_A, "SN-9")).await.unwrap_err();
        assert!(err.is_not_found());

        let stored = h.inventory.host("t1", "host-00000001").unwrap();
        assert_eq!(
            stored.registration_status,
            "Host Registration Failed due to mismatch of Serial Number, Reported Serial Number is: SN-9"
        );
        assert_eq!(stored.registration_status_indicator, StatusIndication::Error);
    }

    #[tokio::test]
    async fn test_uuid_mismatch_is_recorded() {
        let h = Harness::new();
        seed(&h, "host-00000001", UUID_A, "SN-1");
        let err = resolve_host(&h.client, claim(UUID_B, "SN-1")).await.unwrap_err();
        assert!(err.is_not_found());
        let stored = h.inventory.host("t1", "host-00000001").unwrap();
        assert!(stored.registration_status.ends_with(UUID_B));
        assert_eq!(stored.uuid, UUID_A);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let h = Harness::new();
        let err = resolve_host(&h.client, claim(UUID_A, "SN-1")).await.unwrap_err();
        assert!(err.is_not_found());
        let err = resolve_host(&h.client, claim("", "")).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_internal() {
        let h = Harness::new();
        h.inventory
            .fail_call("list", 0, InventoryError::Unavailable("down".into()));
        let err = resolve_host(&h.client, claim(UUID_A, "")).await.unwrap_err();
        assert_eq!(err.code, Code::Internal);
    }
}
