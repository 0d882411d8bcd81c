//! Long-lived change subscription with reconnect
//!
//! [`EventWatcher::spawn`] keeps a subscription open in a background task and
//! forwards notifications to a bounded channel. When the subscription drops
//! and re-registration is enabled it resubscribes with exponential backoff.
//! Otherwise, or once the backoff exceeds its elapsed-time bound, the task
//! exits and the receiver observes channel closure. Owners treat that as
//! fatal.

use crate::error::InventoryError;
use crate::inventory_trait::InventoryClientTrait;
use crate::models::{ChangeEvent, ResourceKind};
use futures::StreamExt;
use reconcile::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the notification channel handed to consumers
pub const EVENTS_BUFFER_SIZE: usize = 10;

/// Subscription settings
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub client_name: String,
    pub kinds: Vec<ResourceKind>,
    /// Resubscribe after transport failures
    pub enable_retry: bool,
    /// Give up resubscribing after this long; zero retries forever
    pub max_elapsed: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub buffer: usize,
}

impl WatcherConfig {
    pub fn new(client_name: impl Into<String>, kinds: Vec<ResourceKind>) -> Self {
        Self {
            client_name: client_name.into(),
            kinds,
            enable_retry: false,
            max_elapsed: Duration::ZERO,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            buffer: EVENTS_BUFFER_SIZE,
        }
    }
}

/// Handle to a running subscription task
#[derive(Debug)]
pub struct EventWatcher {
    pub events: mpsc::Receiver<ChangeEvent>,
    handle: JoinHandle<()>,
}

impl EventWatcher {
    /// Start watching; the first subscription attempt happens in the task
    pub fn spawn(client: Arc<dyn InventoryClientTrait>, config: WatcherConfig) -> Self {
        let (tx, events) = mpsc::channel(config.buffer.max(1));
        let handle = tokio::spawn(watch_loop(client, config, tx));
        Self { events, handle }
    }

    /// Split into the receiver and the task handle
    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, JoinHandle<()>) {
        (self.events, self.handle)
    }

    /// Stop the background task
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Whether a subscription error may be cured by subscribing again
fn is_resubscribable(err: &InventoryError) -> bool {
    match err {
        InventoryError::Unavailable(_)
        | InventoryError::Internal(_)
        | InventoryError::OperationInProgress(_)
        | InventoryError::NotFound(_)
        | InventoryError::Http(_) => true,
        InventoryError::Canceled(_)
        | InventoryError::AlreadyExists(_)
        | InventoryError::Unauthenticated(_)
        | InventoryError::PermissionDenied(_)
        | InventoryError::InvalidArgument(_)
        | InventoryError::Serialization(_) => false,
    }
}

async fn watch_loop(
    client: Arc<dyn InventoryClientTrait>,
    config: WatcherConfig,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let mut backoff = ExponentialBackoff::new(config.min_backoff, config.max_backoff);
    let mut failing_since: Option<Instant> = None;

    loop {
        let failure = match client.subscribe(&config.client_name, &config.kinds).await {
            Ok(mut stream) => {
                info!(
                    "Subscribed to inventory events for {:?} as {}",
                    config.kinds, config.client_name
                );
                backoff.reset();
                failing_since = None;
                // Sequence numbers are only ordered within one subscription
                let mut last_sequence = 0u64;
                loop {
                    let next = tokio::select! {
                        () = tx.closed() => {
                            debug!("Event consumer gone, stopping watcher");
                            return;
                        }
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => {
                            if event.sequence != 0 && event.sequence <= last_sequence {
                                debug!(
                                    "Dropping replayed event {} for {}",
                                    event.sequence, event.resource_id
                                );
                                continue;
                            }
                            last_sequence = last_sequence.max(event.sequence);
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => break e,
                        None => {
                            break InventoryError::Unavailable(
                                "subscription closed by server".to_string(),
                            );
                        }
                    }
                }
            }
            Err(e) => e,
        };

        if !config.enable_retry || !is_resubscribable(&failure) {
            error!("Inventory subscription lost, not retrying: {}", failure);
            return;
        }

        let since = *failing_since.get_or_insert_with(Instant::now);
        if !config.max_elapsed.is_zero() && since.elapsed() >= config.max_elapsed {
            error!(
                "Inventory subscription could not be restored within {:?}: {}",
                config.max_elapsed, failure
            );
            return;
        }

        let delay = backoff.next_backoff();
        warn!(
            "Inventory subscription lost ({}), resubscribing in {:?}",
            failure, delay
        );
        tokio::select! {
            () = tx.closed() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInventoryClient;
    use crate::models::EventKind;

    fn event(resource_id: &str, sequence: u64) -> ChangeEvent {
        ChangeEvent {
            kind: ResourceKind::Host,
            tenant_id: "t1".to_string(),
            resource_id: resource_id.to_string(),
            event_kind: EventKind::Updated,
            sequence,
        }
    }

    #[tokio::test]
    async fn test_forwards_events_in_order() {
        let mock = MockInventoryClient::new("http://mock");
        let watcher = EventWatcher::spawn(
            Arc::new(mock.clone()),
            WatcherConfig::new("test", vec![ResourceKind::Host]),
        );
        let (mut rx, _handle) = watcher.into_parts();
        mock.wait_for_subscribers(1).await;
        mock.emit(event("host-1", 1));
        mock.emit(event("host-2", 2));
        assert_eq!(rx.recv().await.unwrap().resource_id, "host-1");
        assert_eq!(rx.recv().await.unwrap().resource_id, "host-2");
    }

    #[tokio::test]
    async fn test_closes_without_retry() {
        let mock = MockInventoryClient::new("http://mock");
        let watcher = EventWatcher::spawn(
            Arc::new(mock.clone()),
            WatcherConfig::new("test", vec![ResourceKind::Host]),
        );
        let (mut rx, _handle) = watcher.into_parts();
        mock.wait_for_subscribers(1).await;
        mock.disconnect_subscribers();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drops_replayed_sequence() {
        let mock = MockInventoryClient::new("http://mock");
        let watcher = EventWatcher::spawn(
            Arc::new(mock.clone()),
            WatcherConfig::new("test", vec![ResourceKind::Host]),
        );
        let (mut rx, _handle) = watcher.into_parts();
        mock.wait_for_subscribers(1).await;
        mock.emit(event("host-1", 1));
        mock.emit(event("host-1", 1));
        mock.emit(event("host-2", 2));
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().resource_id, "host-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_accepts_restarted_sequence() {
        let mock = MockInventoryClient::new("http://mock");
        let mut config = WatcherConfig::new("test", vec![ResourceKind::Host]);
        config.enable_retry = true;
        let watcher = EventWatcher::spawn(Arc::new(mock.clone()), config);
        let (mut rx, _handle) = watcher.into_parts();

        mock.wait_for_subscribers(1).await;
        for seq in 1..=5 {
            mock.emit(event("host-1", seq));
            assert_eq!(rx.recv().await.unwrap().sequence, seq);
        }

        mock.disconnect_subscribers();
        mock.wait_for_subscribers(1).await;
        assert_eq!(mock.subscribe_count(), 2);

        mock.emit(event("host-7", 1));
        mock.emit(event("host-8", 2));
        let next = rx.recv().await.unwrap();
        assert_eq!((next.resource_id.as_str(), next.sequence), ("host-7", 1));
        assert_eq!(rx.recv().await.unwrap().resource_id, "host-8");
    }

    #[tokio::test]
    async fn test_canceled_is_not_retried() {
        let mock = MockInventoryClient::new("http://mock");
        mock.fail_call("subscribe", 0, InventoryError::Canceled("bye".into()));
        let mut config = WatcherConfig::new("test", vec![ResourceKind::Host]);
        config.enable_retry = true;
        let (mut rx, _handle) = EventWatcher::spawn(Arc::new(mock.clone()), config).into_parts();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_elapsed() {
        let mock = MockInventoryClient::new("http://mock");
        for call in 0..20 {
            mock.fail_call("subscribe", call, InventoryError::Unavailable("down".into()));
        }
        let mut config = WatcherConfig::new("test", vec![ResourceKind::Host]);
        config.enable_retry = true;
        config.max_elapsed = Duration::from_secs(10);
        let (mut rx, _handle) = EventWatcher::spawn(Arc::new(mock.clone()), config).into_parts();
        assert!(rx.recv().await.is_none());
        assert!(mock.subscribe_count() < 20);
    }
}
