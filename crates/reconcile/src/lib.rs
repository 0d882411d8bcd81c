//! Keyed reconciliation framework
//!
//! Generic building blocks for level-triggered controllers:
//!
//! - [`Controller`]: work queue serializing reconciliations per key
//! - [`Reconciler`]: the per-kind reconcile function
//! - [`Request`] / [`Directive`]: what to reconcile and what happened
//! - [`ExponentialBackoff`] / [`RetryPolicy`]: retry delays
//!
//! # Example
//!
//! ```no_run
//! use reconcile::{Controller, ControllerConfig, Directive, Reconciler, Request};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl Reconciler<String> for Printer {
//!     async fn reconcile(&self, request: Request<String>) -> Directive {
//!         println!("reconciling {}", request.key);
//!         request.ack()
//!     }
//! }
//!
//! # async fn example() -> Result<(), reconcile::ReconcileError> {
//! let controller = Controller::new(ControllerConfig::new("printer"), Arc::new(Printer));
//! controller.enqueue("resource-1".to_string())?;
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod controller;
pub mod directive;
pub mod error;

pub use backoff::{DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, ExponentialBackoff, RetryPolicy};
pub use controller::{Controller, ControllerConfig, ReconcileKey, Reconciler};
pub use directive::{BoxError, Directive, Request};
pub use error::ReconcileError;
