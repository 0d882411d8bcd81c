//! Device credential issuer client

use crate::client::ServiceClient;
use crate::error::ProvisioningError;
use crate::models::ClientCredentials;
use std::time::Duration;
use tracing::{debug, info};

/// Issue and revoke per-device client credentials
#[async_trait::async_trait]
pub trait CredentialClient: Send + Sync {
    /// Revoke whatever credentials exist for the device. Revoking a
    /// device that has none is not an error.
    async fn revoke_by_identity(&self, tenant_id: &str, device_uuid: &str) -> Result<(), ProvisioningError>;

    /// Fetch (creating on first use) the device's credentials
    async fn fetch_by_identity(
        &self,
        tenant_id: &str,
        device_uuid: &str,
    ) -> Result<ClientCredentials, ProvisioningError>;
}

/// REST implementation of [`CredentialClient`]
#[derive(Debug, Clone)]
pub struct HttpCredentialClient {
    service: ServiceClient,
}

impl HttpCredentialClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProvisioningError> {
        Ok(Self {
            service: ServiceClient::new(base_url, timeout)?,
        })
    }

    fn path(tenant_id: &str, device_uuid: &str) -> String {
        format!(
            "/v1/tenants/{}/credentials/{}",
            urlencoding::encode(tenant_id),
            urlencoding::encode(device_uuid)
        )
    }
}

#[async_trait::async_trait]
impl CredentialClient for HttpCredentialClient {
    async fn revoke_by_identity(&self, tenant_id: &str, device_uuid: &str) -> Result<(), ProvisioningError> {
        match self.service.delete(&Self::path(tenant_id, device_uuid)).await {
            Ok(()) => {
                info!("Revoked credentials of device {} in tenant {}", device_uuid, tenant_id);
                Ok(())
            }
            Err(ProvisioningError::NotFound(_)) => {
                debug!("No credentials to revoke for device {}", device_uuid);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_by_identity(
        &self,
        tenant_id: &str,
        device_uuid: &str,
    ) -> Result<ClientCredentials, ProvisioningError> {
        let credentials: ClientCredentials = self
            .service
            .post(&Self::path(tenant_id, device_uuid), &serde_json::json!({}))
            .await?;
        debug!("Fetched credentials {} for device {}", credentials.client_id, device_uuid);
        Ok(credentials)
    }
}
