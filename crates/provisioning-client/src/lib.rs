//! Provisioning Collaborator Clients
//!
//! Narrow clients for the services the onboarding control plane delegates
//! to:
//!
//! - [`CredentialClient`]: issue and revoke per-device credentials
//! - [`WorkflowClient`]: check or start the OS provisioning workflow
//! - [`Authorizer`]: decide whether a device-facing call is allowed

pub mod authz;
pub mod client;
pub mod credentials;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod workflow;

pub use authz::{Action, Authorizer, RequestContext, RoleAuthorizer, StaticAuthorizer};
pub use client::{DEFAULT_TIMEOUT, ServiceClient};
pub use credentials::{CredentialClient, HttpCredentialClient};
pub use error::ProvisioningError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCredentialClient, MockWorkflowClient, WorkflowOutcome};
pub use models::{ClientCredentials, DeviceInfo, WorkflowState, WorkflowStatus, workflow_name};
pub use workflow::{HttpWorkflowClient, WorkflowClient};
