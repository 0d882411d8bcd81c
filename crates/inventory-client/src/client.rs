//! Inventory API client
//!
//! JSON over HTTP implementation of [`InventoryClientTrait`]. Resources live
//! under `/v1/tenants/{tenant}/resources/{id}`, collections under
//! `/v1/{collection}` and change notifications are streamed as
//! newline-delimited JSON from `/v1/subscriptions/{id}/events`.

use crate::common::query::{collection_path, resource_path};
use crate::common::{self, HttpClient};
use crate::error::{ApiErrorBody, InventoryError};
use crate::inventory_trait::{EventStream, InventoryClientTrait};
use crate::models::{ChangeEvent, FieldMask, Page, Resource, ResourceFilter, ResourceKey, ResourceKind};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when the service no longer recognizes this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownClientPolicy {
    /// Log and terminate the process
    Abort,
    /// Report `Unavailable` so callers retry (and re-register)
    Unavailable,
}

/// Inventory client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Name registered with the service for subscriptions
    pub client_name: String,
    /// Per-call timeout for request/response calls
    pub timeout: Duration,
    /// Re-register after a lost subscription or unknown-client error
    pub enable_register_retry: bool,
    /// Terminate the process on unknown-client errors
    pub abort_on_unknown_client: bool,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_name: client_name.into(),
            timeout: DEFAULT_TIMEOUT,
            enable_register_retry: false,
            abort_on_unknown_client: true,
        }
    }

    /// Resolve the unknown-client policy; the two flags are mutually exclusive
    pub fn unknown_client_policy(&self) -> Result<UnknownClientPolicy, InventoryError> {
        match (self.enable_register_retry, self.abort_on_unknown_client) {
            (true, true) => Err(InventoryError::InvalidArgument(
                "enable_register_retry and abort_on_unknown_client cannot both be set".to_string(),
            )),
            (_, true) => Ok(UnknownClientPolicy::Abort),
            (_, false) => Ok(UnknownClientPolicy::Unavailable),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    field_mask: &'a FieldMask,
    resource: &'a Resource,
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    client_name: &'a str,
    kinds: &'a [ResourceKind],
}

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    subscription_id: String,
}

/// One line of the notification stream
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventFrame {
    Error { error: ApiErrorBody },
    Event(ChangeEvent),
}

/// Inventory API client
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http: HttpClient,
    config: ClientConfig,
}

impl InventoryClient {
    /// Create a new inventory client
    ///
    /// Fails with `InvalidArgument` when both unknown-client policies are
    /// enabled at once.
    pub fn new(config: ClientConfig) -> Result<Self, InventoryError> {
        let policy = config.unknown_client_policy()?;
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        let http = HttpClient::new(
            client,
            &config.base_url,
            &config.client_name,
            config.timeout,
            policy,
        );
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl InventoryClientTrait for InventoryClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn get(&self, tenant_id: &str, resource_id: &str) -> Result<Resource, InventoryError> {
        self.http.get(&resource_path(tenant_id, resource_id)).await
    }

    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, InventoryError> {
        self.http.get(&collection_path(filter, "")).await
    }

    async fn find(&self, filter: &ResourceFilter) -> Result<Page<ResourceKey>, InventoryError> {
        self.http.get(&collection_path(filter, "/keys")).await
    }

    async fn create(&self, tenant_id: &str, resource: Resource) -> Result<Resource, InventoryError> {
        let path = format!("/v1/tenants/{}/resources", urlencoding::encode(tenant_id));
        self.http.post(&path, &resource).await
    }

    async fn update(
        &self,
        tenant_id: &str,
        resource_id: &str,
        field_mask: &FieldMask,
        resource: Resource,
    ) -> Result<Resource, InventoryError> {
        if field_mask.is_empty() {
            return Err(InventoryError::InvalidArgument(format!(
                "update of {resource_id} without field mask"
            )));
        }
        let body = UpdateRequest {
            field_mask,
            resource: &resource,
        };
        self.http
            .patch(&resource_path(tenant_id, resource_id), &body)
            .await
    }

    async fn delete(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        self.http.delete(&resource_path(tenant_id, resource_id)).await
    }

    async fn subscribe(
        &self,
        client_name: &str,
        kinds: &[ResourceKind],
    ) -> Result<EventStream, InventoryError> {
        let registration: SubscribeResponse = self
            .http
            .post("/v1/subscriptions", &SubscribeRequest { client_name, kinds })
            .await?;
        info!(
            "Registered inventory subscription {} for {}",
            registration.subscription_id, client_name
        );

        let response = self
            .http
            .get_streaming(&format!(
                "/v1/subscriptions/{}/events",
                urlencoding::encode(&registration.subscription_id)
            ))
            .await?;

        let policy = self.http.unknown_client_policy();
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(body), LinesCodec::new());

        // The codec also yields a trailing line without a newline at EOF, so a
        // final error frame is never lost.
        let stream = lines
            .filter(|line| futures::future::ready(!matches!(line, Ok(l) if l.trim().is_empty())))
            .map(move |line| match line {
                Ok(line) => match serde_json::from_str::<EventFrame>(&line) {
                    Ok(EventFrame::Event(event)) => Ok(event),
                    Ok(EventFrame::Error { error }) => {
                        debug!("Subscription ended by server: {:?}", error.code);
                        Err(common::classify(policy, error.code, error.message))
                    }
                    Err(e) => Err(InventoryError::Serialization(e)),
                },
                Err(e) => Err(InventoryError::Unavailable(format!(
                    "event stream read failed: {e}"
                ))),
            })
            .scan(false, |ended, item| {
                if *ended {
                    return futures::future::ready(None);
                }
                *ended = matches!(
                    item,
                    Err(ref e) if !matches!(e, InventoryError::Serialization(_))
                );
                futures::future::ready(Some(item))
            });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_to_abort() {
        let config = ClientConfig::new("http://inv", "onboarding");
        assert_eq!(
            config.unknown_client_policy().unwrap(),
            UnknownClientPolicy::Abort
        );
    }

    #[test]
    fn test_policy_retry() {
        let mut config = ClientConfig::new("http://inv", "onboarding");
        config.abort_on_unknown_client = false;
        config.enable_register_retry = true;
        assert_eq!(
            config.unknown_client_policy().unwrap(),
            UnknownClientPolicy::Unavailable
        );
    }

    #[test]
    fn test_both_policies_rejected() {
        let mut config = ClientConfig::new("http://inv", "onboarding");
        config.enable_register_retry = true;
        assert!(matches!(
            InventoryClient::new(config),
            Err(InventoryError::InvalidArgument(_))
        ));
    }
}
