//! Process configuration read from environment variables.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Name this service registers with inventory
pub const CLIENT_NAME: &str = "onboarding-manager";

#[derive(Debug, Clone)]
pub struct Config {
    pub inventory_url: String,
    pub inventory_timeout: Duration,
    /// Bound for a full reconciliation sweep and for a single reconcile call
    pub reconcile_timeout: Duration,
    pub enable_register_retry: bool,
    pub abort_on_unknown_client: bool,
    /// Zero retries the subscription forever
    pub subscribe_max_elapsed: Duration,
    pub credentials_url: String,
    pub workflow_url: String,
    pub listen_addr: SocketAddr,
    pub reconcile_period: Duration,
    pub enable_auth: bool,
    pub read_roles: Vec<String>,
    pub write_roles: Vec<String>,
    pub disable_os_provisioning: bool,
    pub image_relay_addr: String,
    pub default_provider_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr = string("LISTEN_ADDR", "0.0.0.0:50054");
        let listen_addr = listen_addr.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("LISTEN_ADDR {listen_addr:?} is not a socket address: {e}"))
        })?;

        let config = Self {
            inventory_url: string("INVENTORY_URL", "http://localhost:50051"),
            inventory_timeout: seconds(&lookup, "INVENTORY_TIMEOUT_SECS", 5)?,
            reconcile_timeout: seconds(&lookup, "RECONCILE_TIMEOUT_SECS", 300)?,
            enable_register_retry: flag(&lookup, "ENABLE_REGISTER_RETRY", false)?,
            abort_on_unknown_client: flag(&lookup, "ABORT_ON_UNKNOWN_CLIENT", true)?,
            subscribe_max_elapsed: seconds(&lookup, "SUBSCRIBE_MAX_ELAPSED_SECS", 0)?,
            credentials_url: string("CREDENTIALS_URL", "http://localhost:8081"),
            workflow_url: string("WORKFLOW_URL", "http://localhost:8082"),
            listen_addr,
            reconcile_period: seconds(&lookup, "RECONCILE_PERIOD_SECS", 600)?,
            enable_auth: flag(&lookup, "ENABLE_AUTH", false)?,
            read_roles: list(&lookup, "READ_ROLES", "node-r"),
            write_roles: list(&lookup, "WRITE_ROLES", "node-rw"),
            disable_os_provisioning: flag(&lookup, "DISABLE_OS_PROVISIONING", false)?,
            image_relay_addr: string("IMAGE_RELAY_ADDR", "localhost:8080"),
            default_provider_name: string("DEFAULT_PROVIDER_NAME", "infra_onboarding"),
        };

        if config.enable_register_retry && config.abort_on_unknown_client {
            return Err(ControllerError::InvalidConfig(
                "ENABLE_REGISTER_RETRY and ABORT_ON_UNKNOWN_CLIENT are mutually exclusive".to_string(),
            ));
        }
        if config.reconcile_period.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_PERIOD_SECS must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Inventory URL: {}", self.inventory_url);
        info!("  Inventory timeout: {:?}", self.inventory_timeout);
        info!("  Reconcile timeout: {:?}", self.reconcile_timeout);
        info!("  Reconcile period: {:?}", self.reconcile_period);
        info!("  Credentials URL: {}", self.credentials_url);
        info!("  Workflow URL: {}", self.workflow_url);
        info!("  Listen address: {}", self.listen_addr);
        info!("  Authorization: {}", if self.enable_auth { "enabled" } else { "disabled" });
        info!(
            "  OS provisioning: {}",
            if self.disable_os_provisioning { "disabled" } else { "enabled" }
        );
        info!("  Default provider: {}", self.default_provider_name);
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some("1" | "true" | "TRUE" | "True" | "yes") => Ok(true),
        Some("0" | "false" | "FALSE" | "False" | "no") => Ok(false),
        Some(other) => Err(ControllerError::InvalidConfig(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw.trim().parse().map(Duration::from_secs).map_err(|e| {
            ControllerError::InvalidConfig(format!("{key} must be a number of seconds, got {raw:?}: {e}"))
        }),
    }
}

fn list<F>(lookup: &F, key: &str, default: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.inventory_url, "http://localhost:50051");
        assert_eq!(config.inventory_timeout, Duration::from_secs(5));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(300));
        assert_eq!(config.reconcile_period, Duration::from_secs(600));
        assert!(config.abort_on_unknown_client);
        assert!(!config.enable_register_retry);
        assert!(config.subscribe_max_elapsed.is_zero());
        assert_eq!(config.listen_addr.port(), 50054);
        assert_eq!(config.default_provider_name, "infra_onboarding");
        assert_eq!(config.write_roles, vec!["node-rw".to_string()]);
    }

    #[test]
    fn test_retry_and_abort_are_exclusive() {
        let err = config(&[("ENABLE_REGISTER_RETRY", "true")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let config = config(&[
            ("ENABLE_REGISTER_RETRY", "true"),
            ("ABORT_ON_UNKNOWN_CLIENT", "false"),
        ])
        .unwrap();
        assert!(config.enable_register_retry);
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(config(&[("INVENTORY_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[("ENABLE_AUTH", "maybe")]).is_err());
        assert!(config(&[("LISTEN_ADDR", "not-an-addr")]).is_err());
        assert!(config(&[("RECONCILE_PERIOD_SECS", "0")]).is_err());
    }

    #[test]
    fn test_role_lists() {
        let config = config(&[("READ_ROLES", "a, b,,c")]).unwrap();
        assert_eq!(config.read_roles, vec!["a", "b", "c"]);
    }
}
