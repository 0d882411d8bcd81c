//! Onboarding controller
//!
//! Owns one reconcile controller per resource kind and feeds them from
//! three sources:
//!
//! - inventory change notifications (filtered per kind)
//! - the internal event queue reconcilers use to re-trigger themselves
//! - a periodic full sweep over every Host and Instance, which catches
//!   anything a lost notification or a dropped internal event left behind

use crate::config::{Config, CLIENT_NAME};
use crate::error::ControllerError;
use crate::invclient::OnboardingInventoryClient;
use crate::reconcilers::{HostReconciler, InstanceReconciler};
use inventory_client::{ChangeEvent, EventKind, EventWatcher, ResourceKey, ResourceKind, WatcherConfig};
use provisioning_client::{CredentialClient, WorkflowClient};
use reconcile::{Controller, ControllerConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Kinds this controller reconciles and subscribes to
pub const RECONCILED_KINDS: [ResourceKind; 2] = [ResourceKind::Host, ResourceKind::Instance];

/// Host deletion is driven by the desired state; the delete notification
/// arrives once inventory already dropped the Host
fn host_event_filter(event: &ChangeEvent) -> bool {
    event.event_kind != EventKind::Deleted
}

fn instance_event_filter(_event: &ChangeEvent) -> bool {
    true
}

/// Routes keys to the controller of their kind
struct Dispatcher {
    inventory: Arc<OnboardingInventoryClient>,
    hosts: Controller<ResourceKey>,
    instances: Controller<ResourceKey>,
    sweep_timeout: Duration,
}

impl Dispatcher {
    fn enqueue(&self, key: ResourceKey) {
        let kind = match ResourceKind::from_resource_id(&key.resource_id) {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Ignoring {}: {}", key, e);
                return;
            }
        };
        let controller = match kind {
            ResourceKind::Host => &self.hosts,
            ResourceKind::Instance => &self.instances,
            other => {
                debug!("No reconciler for {} {}", other, key);
                return;
            }
        };
        if let Err(e) = controller.enqueue(key.clone()) {
            debug!("Cannot enqueue {}: {}", key, e);
        }
    }

    fn handle_event(&self, event: ChangeEvent) {
        let accepted = match event.kind {
            ResourceKind::Host => host_event_filter(&event),
            ResourceKind::Instance => instance_event_filter(&event),
            _ => false,
        };
        if !accepted {
            debug!(
                "Filtered out {:?} event for {} {}",
                event.event_kind,
                event.kind,
                event.key()
            );
            return;
        }
        debug!("{:?} event for {} {}", event.event_kind, event.kind, event.key());
        self.enqueue(event.key());
    }

    /// Enqueue every Host and Instance
    async fn reconcile_all(&self) -> Result<(), ControllerError> {
        debug!("Reconciling all Hosts and Instances");
        let found = tokio::time::timeout(
            self.sweep_timeout,
            self.inventory.find_all_resources(&RECONCILED_KINDS),
        )
        .await
        .map_err(|_| {
            ControllerError::Reconciliation(format!(
                "listing resources took longer than {:?}",
                self.sweep_timeout
            ))
        })?;
        let keys = match found {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => {
                debug!("No resources to reconcile: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        info!("Reconciling {} resources", keys.len());
        for key in keys {
            self.enqueue(key);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.hosts.stop().await;
        self.instances.stop().await;
    }
}

pub struct OnboardingController {
    dispatcher: Arc<Dispatcher>,
    watcher_config: WatcherConfig,
    reconcile_period: Duration,
    cancel: CancellationToken,
    ready: Arc<AtomicBool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl OnboardingController {
    pub fn new(
        config: &Config,
        inventory: Arc<OnboardingInventoryClient>,
        credentials: Arc<dyn CredentialClient>,
        workflows: Arc<dyn WorkflowClient>,
        cancel: CancellationToken,
    ) -> Self {
        let controller_config = |name: &str| ControllerConfig {
            parallelism: 1,
            timeout: config.reconcile_timeout,
            ..ControllerConfig::new(name)
        };
        let hosts = Controller::new(
            controller_config("host"),
            Arc::new(HostReconciler::new(Arc::clone(&inventory), credentials)),
        );
        let instances = Controller::new(
            controller_config("instance"),
            Arc::new(InstanceReconciler::new(
                Arc::clone(&inventory),
                workflows,
                config.image_relay_addr.clone(),
            )),
        );

        let mut watcher_config = WatcherConfig::new(CLIENT_NAME, RECONCILED_KINDS.to_vec());
        watcher_config.enable_retry = true;
        watcher_config.max_elapsed = config.subscribe_max_elapsed;

        Self {
            dispatcher: Arc::new(Dispatcher {
                inventory,
                hosts,
                instances,
                sweep_timeout: config.reconcile_timeout,
            }),
            watcher_config,
            reconcile_period: config.reconcile_period,
            cancel,
            ready: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            dispatch: Mutex::new(None),
        }
    }

    /// Set once the initial full reconciliation has been queued
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Subscribe, queue every existing resource, then start dispatching
    pub async fn start(&self) -> Result<(), ControllerError> {
        info!("Starting onboarding controller");
        let internal = self
            .dispatcher
            .inventory
            .take_internal_events()
            .ok_or_else(|| ControllerError::Watch("controller already started".to_string()))?;

        let watcher = EventWatcher::spawn(self.dispatcher.inventory.inner(), self.watcher_config.clone());
        let (events, watcher_task) = watcher.into_parts();
        *self.watcher.lock().await = Some(watcher_task);

        if let Err(e) = self.dispatcher.reconcile_all().await {
            error!("Initial reconciliation failed: {}", e);
            self.stop().await;
            return Err(e);
        }

        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&self.dispatcher),
            events,
            internal,
            self.reconcile_period,
            self.cancel.clone(),
        ));
        *self.dispatch.lock().await = Some(dispatch);
        self.ready.store(true, Ordering::SeqCst);
        info!("Onboarding controller started");
        Ok(())
    }

    /// Stop dispatching and wait for in-flight reconciliations. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(dispatch) = self.dispatch.lock().await.take() {
            if let Err(e) = dispatch.await {
                error!("Dispatch loop ended abnormally: {}", e);
            }
        }
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
        self.dispatcher.stop().await;
    }
}

async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    mut events: mpsc::Receiver<ChangeEvent>,
    mut internal: mpsc::Receiver<ChangeEvent>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Dispatch loop stopped");
                return;
            }
            event = events.recv() => match event {
                Some(event) => dispatcher.handle_event(event),
                None => {
                    error!("Inventory event stream closed, stopping controller");
                    cancel.cancel();
                    return;
                }
            },
            Some(event) = internal.recv() => {
                debug!("Internal event for {}", event.key());
                dispatcher.enqueue(event.key());
            }
            _ = ticker.tick() => {
                if let Err(e) = dispatcher.reconcile_all().await {
                    error!("Periodic reconciliation failed: {}", e);
                }
            }
        }
    }
}
