//! Device onboarding session
//!
//! One session per stream connection. Every inbound message re-resolves
//! the device identity, then the Host's desired state picks the answer:
//!
//! ```text
//! AwaitingIdentity --REGISTERED--> Registered --ONBOARDED--> Onboarded
//!        |                             |
//!        +----- unknown device --------+  (stream stays open)
//!        +----- anything else ---------+--> Closed
//! ```
//!
//! `Onboarded` and `Closed` are terminal: the transport closes the stream
//! after sending the reply that got there.

use super::api::{NodeState, OnboardStreamRequest, OnboardStreamResponse, Status, validate_identity};
use super::identity::{Claim, resolve_host};
use crate::invclient::OnboardingInventoryClient;
use crate::status;
use inventory_client::{Host, HostState};
use provisioning_client::CredentialClient;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingIdentity,
    Registered,
    Onboarded,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Onboarded | SessionState::Closed)
    }
}

/// Answer to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: OnboardStreamResponse,
    /// Close the stream once the response is sent
    pub close: bool,
}

pub struct OnboardingSession {
    inventory: Arc<OnboardingInventoryClient>,
    credentials: Arc<dyn CredentialClient>,
    state: SessionState,
    host: Option<Host>,
}

impl std::fmt::Debug for OnboardingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingSession")
            .field("state", &self.state)
            .field("host", &self.host.as_ref().map(|h| &h.resource_id))
            .finish_non_exhaustive()
    }
}

impl OnboardingSession {
    pub fn new(inventory: Arc<OnboardingInventoryClient>, credentials: Arc<dyn CredentialClient>) -> Self {
        Self {
            inventory,
            credentials,
            state: SessionState::AwaitingIdentity,
            host: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// (tenant, host) to run zero-touch for once the stream is closed
    pub fn zero_touch_target(&self) -> Option<(String, String)> {
        match (&self.state, &self.host) {
            (SessionState::Onboarded, Some(host)) => {
                Some((host.tenant_id.clone(), host.resource_id.clone()))
            }
            _ => None,
        }
    }

    pub async fn handle(&mut self, request: &OnboardStreamRequest) -> Reply {
        if self.state.is_terminal() {
            return self.close(Status::failed_precondition("The onboarding stream is closed"));
        }

        if let Err(status) = validate_identity(&request.uuid, &request.serialnum) {
            return self.close(status);
        }

        let claim = Claim {
            uuid: &request.uuid,
            serial: &request.serialnum,
        };
        let host = match resolve_host(&self.inventory, claim).await {
            Ok(host) => host,
            Err(status) if status.is_not_found() => {
                error!("Device not found: {}", status.message);
                // Let the device retry once the operator registered it
                return Reply {
                    response: OnboardStreamResponse::error(Status::not_found("Device not found")),
                    close: false,
                };
            }
            Err(status) => {
                error!("Failed to resolve device identity: {}", status);
                return self.close(status);
            }
        };

        if matches!(host.current_state, HostState::Onboarded | HostState::Error) {
            debug!(
                "Node {} already exists with current state {}",
                host.resource_id, host.current_state
            );
            return self.close(Status::failed_precondition(format!(
                "Node is already {}",
                host.current_state
            )));
        }

        debug!(
            "Node {} exists in inventory, desired state {}, current state {}",
            host.uuid, host.desired_state, host.current_state
        );

        match host.desired_state {
            HostState::Registered => self.register(host, request).await,
            HostState::Onboarded => self.onboard(host, request).await,
            _ => self.close(Status::failed_precondition("The node state is unspecified")),
        }
    }

    /// Record the registration and keep the stream open for retries
    async fn register(&mut self, host: Host, request: &OnboardStreamRequest) -> Reply {
        if let Err(e) = self
            .inventory
            .update_host_reg_state(
                &host.tenant_id,
                &host.resource_id,
                HostState::Registered,
                &request.host_ip,
                &request.mac_id,
                &status::HOST_REGISTRATION_DONE.status(),
            )
            .await
        {
            error!("Update failed for host resource id {}: {}", host.resource_id, e);
            return self.close(Status::from(e));
        }

        let response = OnboardStreamResponse {
            status: Status::ok(),
            node_state: NodeState::Registered,
            project_id: host.tenant_id.clone(),
            ..OnboardStreamResponse::default()
        };
        self.state = SessionState::Registered;
        self.host = Some(host);
        Reply {
            response,
            close: false,
        }
    }

    /// Hand out credentials, mark the Host onboarded and close
    async fn onboard(&mut self, host: Host, request: &OnboardStreamRequest) -> Reply {
        let credentials = match self
            .credentials
            .fetch_by_identity(&host.tenant_id, &host.uuid)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to fetch client credentials for {}: {}", host.uuid, e);
                return self.close(Status::internal("Failed to fetch client credentials"));
            }
        };

        if let Err(e) = self
            .inventory
            .update_host_current_state_and_onboarding_status(
                &host.tenant_id,
                &host.resource_id,
                &request.host_ip,
                &request.mac_id,
                HostState::Onboarded,
                &status::ONBOARDING_DONE.status(),
            )
            .await
        {
            error!("Failed to update host {} current state to ONBOARDED: {}", host.resource_id, e);
            return self.close(Status::from(e));
        }
        info!(
            "Host {} onboarded at {}",
            host.resource_id,
            chrono::Utc::now().timestamp()
        );

        let response = OnboardStreamResponse {
            status: Status::ok(),
            node_state: NodeState::Onboarded,
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            project_id: host.tenant_id.clone(),
        };
        self.state = SessionState::Onboarded;
        self.host = Some(host);
        Reply {
            response,
            close: true,
        }
    }

    fn close(&mut self, status: Status) -> Reply {
        self.state = SessionState::Closed;
        Reply {
            response: OnboardStreamResponse::error(status),
            close: true,
        }
    }
}
