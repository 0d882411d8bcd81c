//! Inventory Service Client
//!
//! A Rust client library for the multi-tenant infrastructure inventory.
//! Provides typed resource models, tenant-scoped CRUD with field masks,
//! transparent pagination and a resilient change-notification watcher.
//!
//! # Example
//!
//! ```no_run
//! use inventory_client::{ClientConfig, InventoryClient, InventoryClientTrait, FieldMask, Host, HostState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InventoryClient::new(ClientConfig::new("http://inventory:50051", "onboarding"))?;
//!
//! // Fetch a host
//! let mut host = Host::try_from(client.get("tenant-1", "host-1a2b3c4d").await?)?;
//!
//! // Update only its current state
//! host.current_state = HostState::Onboarded;
//! client
//!     .update("tenant-1", "host-1a2b3c4d", &FieldMask::new(&["current_state"]), host.into())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Closed error taxonomy**: every failure maps to [`InventoryError`]
//! - **Field masks**: updates never touch fields they do not name
//! - **Pagination**: [`list_all`] / [`find_all`] tolerate concurrent deletion
//! - **Subscriptions**: [`EventWatcher`] resubscribes with exponential backoff

pub mod client;
pub mod common;
pub mod error;
pub mod events;
pub mod models;
#[path = "trait.rs"]
pub mod inventory_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{ClientConfig, InventoryClient, UnknownClientPolicy};
pub use common::pagination::{BATCH_SIZE, find_all, list_all};
pub use error::InventoryError;
pub use events::{EventWatcher, WatcherConfig};
pub use inventory_trait::{EventStream, InventoryClientTrait};
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockInventoryClient, WriteOp};
