//! Shared REST plumbing for the provisioning collaborators

use crate::error::ProvisioningError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default per-call timeout for collaborator calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimal JSON REST client
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProvisioningError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProvisioningError> {
        debug!("GET {}", self.url(path));
        let response = Self::send(self.client.get(self.url(path))).await?;
        Ok(response.json().await?)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProvisioningError> {
        debug!("POST {}", self.url(path));
        let response = Self::send(self.client.post(self.url(path)).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ProvisioningError> {
        debug!("DELETE {}", self.url(path));
        Self::send(self.client.delete(self.url(path))).await?;
        Ok(())
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ProvisioningError> {
        let response = builder.header("Accept", "application/json").send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ProvisioningError::NotFound(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProvisioningError::Unauthorized(format!("{status} - {body}"))
            }
            StatusCode::CONFLICT | StatusCode::LOCKED => ProvisioningError::InProgress(body),
            _ => ProvisioningError::Backend(format!("{status} - {body}")),
        })
    }
}
