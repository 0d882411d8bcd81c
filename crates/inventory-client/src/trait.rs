//! InventoryClient trait for mocking
//!
//! The HTTP client and the in-memory mock both implement this trait so the
//! controllers can be unit tested without a running inventory service.

use crate::error::InventoryError;
use crate::models::{ChangeEvent, FieldMask, Page, Resource, ResourceFilter, ResourceKey, ResourceKind};
use futures::stream::BoxStream;

/// Raw stream of change notifications from one subscription
pub type EventStream = BoxStream<'static, Result<ChangeEvent, InventoryError>>;

/// Trait for inventory service operations
///
/// All calls are tenant scoped. Implementations must be safe to share
/// between concurrently running reconcilers.
#[async_trait::async_trait]
pub trait InventoryClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    async fn get(&self, tenant_id: &str, resource_id: &str) -> Result<Resource, InventoryError>;

    /// One page of full resources matching `filter`
    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, InventoryError>;

    /// One page of resource keys matching `filter`
    async fn find(&self, filter: &ResourceFilter) -> Result<Page<ResourceKey>, InventoryError>;

    /// Create a resource; the service assigns the resource ID
    async fn create(&self, tenant_id: &str, resource: Resource) -> Result<Resource, InventoryError>;

    /// Update only the fields named in `field_mask`
    async fn update(
        &self,
        tenant_id: &str,
        resource_id: &str,
        field_mask: &FieldMask,
        resource: Resource,
    ) -> Result<Resource, InventoryError>;

    async fn delete(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError>;

    /// Register `client_name` for notifications on `kinds`
    async fn subscribe(
        &self,
        client_name: &str,
        kinds: &[ResourceKind],
    ) -> Result<EventStream, InventoryError>;
}
