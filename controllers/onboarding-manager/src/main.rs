//! Onboarding Manager
//!
//! Control plane that takes bare-metal devices from "known to inventory"
//! to "running an OS":
//! - Host reconciliation: deletion cascade and deauthorization
//! - Instance reconciliation: OS provisioning through the workflow backend
//! - Device-facing service: node registration, the onboarding stream and
//!   zero-touch Instance creation
//!
//! All state lives in the inventory service; this process only reacts to
//! its change notifications and periodically re-checks everything.

mod config;
mod controller;
mod error;
mod invclient;
mod reconcilers;
mod southbound;
mod status;

#[cfg(test)]
mod test_utils;

use crate::config::{Config, CLIENT_NAME};
use crate::controller::OnboardingController;
use crate::error::ControllerError;
use crate::invclient::OnboardingInventoryClient;
use crate::southbound::{AppState, NodeService, ZeroTouch};
use inventory_client::{ClientConfig, InventoryClient};
use provisioning_client::{
    Authorizer, CredentialClient, HttpCredentialClient, HttpWorkflowClient, RoleAuthorizer,
    StaticAuthorizer, WorkflowClient, DEFAULT_TIMEOUT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Onboarding Manager");

    let config = Config::from_env()?;
    config.log();

    let mut client_config = ClientConfig::new(config.inventory_url.clone(), CLIENT_NAME);
    client_config.timeout = config.inventory_timeout;
    client_config.enable_register_retry = config.enable_register_retry;
    client_config.abort_on_unknown_client = config.abort_on_unknown_client;
    let inventory = Arc::new(OnboardingInventoryClient::new(Arc::new(InventoryClient::new(
        client_config,
    )?)));

    let credentials: Arc<dyn CredentialClient> =
        Arc::new(HttpCredentialClient::new(&config.credentials_url, DEFAULT_TIMEOUT)?);
    let workflows: Arc<dyn WorkflowClient> =
        Arc::new(HttpWorkflowClient::new(&config.workflow_url, DEFAULT_TIMEOUT)?);
    let authorizer: Arc<dyn Authorizer> = if config.enable_auth {
        Arc::new(RoleAuthorizer::new(
            config.read_roles.clone(),
            config.write_roles.clone(),
        ))
    } else {
        Arc::new(StaticAuthorizer::allow_all())
    };

    let shutdown = CancellationToken::new();

    let controller = if config.disable_os_provisioning {
        info!("OS provisioning disabled, not starting the onboarding controller");
        None
    } else {
        let controller = OnboardingController::new(
            &config,
            Arc::clone(&inventory),
            Arc::clone(&credentials),
            workflows,
            shutdown.clone(),
        );
        controller.start().await?;
        Some(controller)
    };
    let ready = match &controller {
        Some(controller) => controller.readiness(),
        None => Arc::new(AtomicBool::new(true)),
    };

    let zero_touch = ZeroTouch::new(Arc::clone(&inventory), config.default_provider_name.clone());
    let state = AppState {
        nodes: Arc::new(NodeService::new(
            Arc::clone(&inventory),
            authorizer,
            zero_touch.clone(),
        )),
        inventory,
        credentials,
        zero_touch,
        ready: Arc::clone(&ready),
        shutdown: shutdown.clone(),
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
            }
            () = signal.cancelled() => {}
        }
        signal.cancel();
    });

    let served = southbound::serve(config.listen_addr, state, shutdown.clone()).await;

    ready.store(false, Ordering::SeqCst);
    shutdown.cancel();
    if let Some(controller) = controller {
        controller.stop().await;
    }
    info!("Onboarding Manager stopped");
    served
}
