//! Per-kind reconcilers
//!
//! - `host.rs` - deletion cascade and deauthorization of Hosts
//! - `instance.rs` - OS provisioning lifecycle of Instances
//!
//! Both translate errors into directives with the helpers below.

mod host;
mod instance;

#[cfg(test)]
mod instance_test;

pub use host::HostReconciler;
pub use instance::InstanceReconciler;

use inventory_client::{InventoryError, ResourceKey};
use provisioning_client::ProvisioningError;
use reconcile::{Directive, Request, RetryPolicy, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff for inventory failures
pub const MIN_DELAY: Duration = DEFAULT_MIN_DELAY;
pub const MAX_DELAY: Duration = DEFAULT_MAX_DELAY;

/// Backoff while polling the provisioning workflow
pub const RETRY_MIN_DELAY: Duration = MIN_DELAY;
pub const RETRY_MAX_DELAY: Duration = MAX_DELAY;

/// Convergent errors acknowledge; everything else retries with backoff
pub fn handle_inventory_error(request: &Request<ResourceKey>, err: InventoryError) -> Directive {
    if err.is_convergent() {
        debug!("{}: nothing left to do: {}", request.key, err);
        return request.ack();
    }
    warn!("{}: inventory error, will retry: {}", request.key, err);
    request
        .retry(err)
        .with(RetryPolicy::exponential(MIN_DELAY, MAX_DELAY))
}

/// In-progress polls again, aborted is terminal, anything else retries
pub fn handle_provisioning_error(request: &Request<ResourceKey>, err: ProvisioningError) -> Directive {
    match err {
        ProvisioningError::InProgress(_) => {
            debug!("{}: provisioning in progress: {}", request.key, err);
            request
                .retry(err)
                .with(RetryPolicy::exponential(RETRY_MIN_DELAY, RETRY_MAX_DELAY))
        }
        ProvisioningError::Aborted(_) => {
            warn!("{}: provisioning aborted: {}", request.key, err);
            request.fail(err)
        }
        other => {
            warn!("{}: provisioning error, will retry: {}", request.key, other);
            request
                .retry(other)
                .with(RetryPolicy::exponential(RETRY_MIN_DELAY, RETRY_MAX_DELAY))
        }
    }
}
