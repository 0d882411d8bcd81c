//! Common utilities for the inventory client
//!
//! Shared HTTP plumbing and the pagination helpers built on top of
//! [`InventoryClientTrait`](crate::InventoryClientTrait).

pub mod pagination;
pub mod query;

use crate::client::UnknownClientPolicy;
use crate::error::{ApiErrorBody, ApiErrorCode, InventoryError};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

/// Header carrying the registered client name on every call
pub const CLIENT_NAME_HEADER: &str = "X-Inventory-Client";

/// HTTP client wrapper with per-call timeout and error classification
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    client_name: String,
    timeout: Duration,
    unknown_client_policy: UnknownClientPolicy,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(
        client: Client,
        base_url: &str,
        client_name: &str,
        timeout: Duration,
        unknown_client_policy: UnknownClientPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_name: client_name.to_string(),
            timeout,
            unknown_client_policy,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    pub fn unknown_client_policy(&self) -> UnknownClientPolicy {
        self.unknown_client_policy
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(CLIENT_NAME_HEADER, &self.client_name)
            .header("Accept", "application/json")
            .timeout(self.timeout)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, InventoryError> {
        let url = self.build_url(path);
        debug!("GET {}", url);
        let response = self.send(self.request(self.client.get(&url))).await?;
        Self::decode(response).await
    }

    /// Make a POST request
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, InventoryError> {
        let url = self.build_url(path);
        debug!("POST {}", url);
        let response = self
            .send(self.request(self.client.post(&url)).json(body))
            .await?;
        Self::decode(response).await
    }

    /// Make a PATCH request
    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, InventoryError> {
        let url = self.build_url(path);
        debug!("PATCH {}", url);
        let response = self
            .send(self.request(self.client.patch(&url)).json(body))
            .await?;
        Self::decode(response).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), InventoryError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);
        self.send(self.request(self.client.delete(&url))).await?;
        Ok(())
    }

    /// Open a long-lived GET whose body is consumed incrementally.
    /// No per-call timeout applies.
    pub async fn get_streaming(&self, path: &str) -> Result<Response, InventoryError> {
        let url = self.build_url(path);
        debug!("GET (stream) {}", url);
        let builder = self
            .client
            .get(&url)
            .header(CLIENT_NAME_HEADER, &self.client_name)
            .header("Accept", "application/x-ndjson");
        self.send(builder).await
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, InventoryError> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.error_from_response(response).await)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, InventoryError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(InventoryError::Serialization)
    }

    async fn error_from_response(&self, response: Response) -> InventoryError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) if parsed.code != ApiErrorCode::Unknown => (parsed.code, parsed.message),
            _ => (ApiErrorCode::from_http_status(status), format!("{status} - {body}")),
        };
        self.classify(code, message)
    }

    /// Turn an error code into an error, applying the unknown-client policy
    pub fn classify(&self, code: ApiErrorCode, message: String) -> InventoryError {
        classify(self.unknown_client_policy, code, message)
    }
}

pub(crate) fn classify(
    policy: UnknownClientPolicy,
    code: ApiErrorCode,
    message: String,
) -> InventoryError {
    if code == ApiErrorCode::UnknownClient && policy == UnknownClientPolicy::Abort {
        error!(
            "Inventory does not recognize this client, aborting: {}",
            message
        );
        std::process::exit(1);
    }
    code.into_error(message)
}
