//! Mock InventoryClient for unit testing
//!
//! Stores resources in memory, applies field masks the way the service does,
//! records every write, and lets tests inject errors and push change
//! notifications to subscribers.
//!
//! - `store.rs` - filtering and field-mask merging over JSON values

mod store;

use crate::error::InventoryError;
use crate::inventory_trait::{EventStream, InventoryClientTrait};
use crate::models::{
    ChangeEvent, FieldMask, Host, Instance, Page, Resource, ResourceFilter, ResourceKey,
    ResourceKind,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Subscriber = mpsc::UnboundedSender<Result<ChangeEvent, InventoryError>>;

/// A write observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Create(ResourceKey),
    Update(ResourceKey, FieldMask),
    Delete(ResourceKey),
}

/// Mock InventoryClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockInventoryClient {
    pub(crate) base_url: String,
    pub(crate) resources: Arc<Mutex<BTreeMap<ResourceKey, Resource>>>,
    pub(crate) writes: Arc<Mutex<Vec<WriteOp>>>,
    pub(crate) failures: Arc<Mutex<HashMap<(String, usize), InventoryError>>>,
    pub(crate) calls: Arc<Mutex<HashMap<String, usize>>>,
    pub(crate) subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockInventoryClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Add any resource to the mock store (for test setup)
    pub fn add(&self, resource: impl Into<Resource>) {
        let resource = resource.into();
        lock(&self.resources).insert(resource.key(), resource);
    }

    /// Add a host to the mock store (for test setup)
    pub fn add_host(&self, host: Host) {
        self.add(host);
    }

    /// Add an instance to the mock store (for test setup)
    pub fn add_instance(&self, instance: Instance) {
        self.add(instance);
    }

    /// Current copy of a stored resource
    pub fn stored(&self, tenant_id: &str, resource_id: &str) -> Option<Resource> {
        lock(&self.resources)
            .get(&ResourceKey::new(tenant_id, resource_id))
            .cloned()
    }

    pub fn host(&self, tenant_id: &str, resource_id: &str) -> Option<Host> {
        self.stored(tenant_id, resource_id)
            .and_then(|r| Host::try_from(r).ok())
    }

    pub fn instance(&self, tenant_id: &str, resource_id: &str) -> Option<Instance> {
        self.stored(tenant_id, resource_id)
            .and_then(|r| Instance::try_from(r).ok())
    }

    /// All stored resources of one kind
    pub fn all_of(&self, kind: ResourceKind) -> Vec<Resource> {
        lock(&self.resources)
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    /// Every write in the order it happened
    pub fn writes(&self) -> Vec<WriteOp> {
        lock(&self.writes).clone()
    }

    /// Resource IDs deleted, in order
    pub fn deleted_ids(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                WriteOp::Delete(key) => Some(key.resource_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Fail the `call_index`-th (zero based) call of `op` with `error`.
    /// `op` is one of get, list, find, create, update, delete, subscribe.
    pub fn fail_call(&self, op: &str, call_index: usize, error: InventoryError) {
        lock(&self.failures).insert((op.to_string(), call_index), error);
    }

    /// Number of calls made to `op` so far
    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    pub fn subscribe_count(&self) -> usize {
        self.call_count("subscribe")
    }

    /// Push a notification to every live subscriber
    pub fn emit(&self, event: ChangeEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Push an error to every live subscriber and end their streams
    pub fn emit_error(&self, error_for: impl Fn() -> InventoryError) {
        for tx in lock(&self.subscribers).drain(..) {
            let _ = tx.send(Err(error_for()));
        }
    }

    /// End all subscription streams as if the server hung up
    pub fn disconnect_subscribers(&self) {
        lock(&self.subscribers).clear();
    }

    pub fn active_subscribers(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Wait until at least `count` subscriptions are open
    pub async fn wait_for_subscribers(&self, count: usize) {
        while self.active_subscribers() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Count the call and return an injected failure if one is armed
    fn enter(&self, op: &str) -> Result<(), InventoryError> {
        let index = {
            let mut calls = lock(&self.calls);
            let counter = calls.entry(op.to_string()).or_insert(0);
            let index = *counter;
            *counter += 1;
            index
        };
        match lock(&self.failures).remove(&(op.to_string(), index)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&self, op: WriteOp) {
        lock(&self.writes).push(op);
    }

    /// Refresh eagerly loaded edges from the store
    fn hydrate(&self, resource: Resource) -> Resource {
        match resource {
            Resource::Instance(mut instance) => {
                if let Some(host) = &instance.host {
                    if let Some(fresh) = self.host(&host.tenant_id, &host.resource_id) {
                        instance.host = Some(fresh);
                    }
                }
                Resource::Instance(instance)
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl InventoryClientTrait for MockInventoryClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, tenant_id: &str, resource_id: &str) -> Result<Resource, InventoryError> {
        self.enter("get")?;
        let resource = self.stored(tenant_id, resource_id).ok_or_else(|| {
            InventoryError::NotFound(format!("{resource_id} not found in tenant {tenant_id}"))
        })?;
        Ok(self.hydrate(resource))
    }

    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, InventoryError> {
        self.enter("list")?;
        let matching = store::matching(&lock(&self.resources), filter)?;
        let page = store::paginate(matching, filter);
        Ok(Page {
            items: page.items.into_iter().map(|r| self.hydrate(r)).collect(),
            has_next: page.has_next,
            total_elements: page.total_elements,
        })
    }

    async fn find(&self, filter: &ResourceFilter) -> Result<Page<ResourceKey>, InventoryError> {
        self.enter("find")?;
        let matching = store::matching(&lock(&self.resources), filter)?;
        let page = store::paginate(matching, filter);
        Ok(Page {
            items: page.items.iter().map(Resource::key).collect(),
            has_next: page.has_next,
            total_elements: page.total_elements,
        })
    }

    async fn create(&self, tenant_id: &str, resource: Resource) -> Result<Resource, InventoryError> {
        self.enter("create")?;
        let mut resource = resource;
        let resource_id = if resource.resource_id().is_empty() {
            resource.kind().new_resource_id()
        } else {
            resource.resource_id().to_string()
        };
        resource.set_identity(tenant_id, &resource_id);

        let mut resources = lock(&self.resources);
        if let Resource::Host(host) = &resource {
            let duplicate = resources.values().any(|r| match r {
                Resource::Host(h) => {
                    h.tenant_id == tenant_id && !host.uuid.is_empty() && h.uuid == host.uuid
                }
                _ => false,
            });
            if duplicate {
                return Err(InventoryError::AlreadyExists(format!(
                    "host with uuid {} already exists",
                    host.uuid
                )));
            }
        }
        let key = resource.key();
        if resources.contains_key(&key) {
            return Err(InventoryError::AlreadyExists(key.to_string()));
        }
        resources.insert(key.clone(), resource.clone());
        drop(resources);
        self.record(WriteOp::Create(key));
        Ok(resource)
    }

    async fn update(
        &self,
        tenant_id: &str,
        resource_id: &str,
        field_mask: &FieldMask,
        resource: Resource,
    ) -> Result<Resource, InventoryError> {
        self.enter("update")?;
        if field_mask.is_empty() {
            return Err(InventoryError::InvalidArgument(format!(
                "update of {resource_id} without field mask"
            )));
        }
        let key = ResourceKey::new(tenant_id, resource_id);
        let mut resources = lock(&self.resources);
        let existing = resources
            .get(&key)
            .ok_or_else(|| InventoryError::NotFound(key.to_string()))?;
        let merged = store::merge(existing, &resource, field_mask)?;
        resources.insert(key.clone(), merged.clone());
        drop(resources);
        self.record(WriteOp::Update(key, field_mask.clone()));
        Ok(merged)
    }

    async fn delete(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        self.enter("delete")?;
        let key = ResourceKey::new(tenant_id, resource_id);
        if lock(&self.resources).remove(&key).is_none() {
            return Err(InventoryError::NotFound(key.to_string()));
        }
        self.record(WriteOp::Delete(key));
        Ok(())
    }

    async fn subscribe(
        &self,
        _client_name: &str,
        _kinds: &[ResourceKind],
    ) -> Result<EventStream, InventoryError> {
        self.enter("subscribe")?;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
