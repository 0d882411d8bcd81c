//! Keyed reconciliation work queue
//!
//! A [`Controller`] runs a [`Reconciler`] over keys with these guarantees:
//!
//! - at most one reconciliation per key is in flight at any time
//! - enqueuing a key that is already queued is a no-op
//! - enqueuing a key while it is being reconciled schedules exactly one
//!   more run after the current one, however many enqueues arrive
//! - different keys run concurrently up to `parallelism`
//!
//! The reconciler's [`Directive`] decides what happens next: `Ack` clears
//! the key's retry state, `Retry` re-enqueues after a backoff delay and
//! `Fail` stops automatic retries until the key is enqueued again, by any
//! source.

use crate::backoff::RetryPolicy;
use crate::directive::{Directive, Request};
use crate::error::ReconcileError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Bound on what a reconciliation key must provide
pub trait ReconcileKey: Clone + Eq + Hash + Display + Send + Sync + 'static {}

impl<T> ReconcileKey for T where T: Clone + Eq + Hash + Display + Send + Sync + 'static {}

/// Reconciliation logic for one resource kind
#[async_trait::async_trait]
pub trait Reconciler<K>: Send + Sync + 'static {
    async fn reconcile(&self, request: Request<K>) -> Directive;
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name used in log lines
    pub name: String,
    /// Number of keys reconciled concurrently
    pub parallelism: usize,
    /// Deadline for a single reconciliation; exceeding it counts as a retry
    pub timeout: Duration,
    /// Backoff for retries that do not pick their own policy
    pub default_backoff: RetryPolicy,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parallelism: 1,
            timeout: Duration::from_secs(300),
            default_backoff: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    in_flight: HashSet<K>,
    /// Keys enqueued while in flight
    dirty: HashSet<K>,
    /// Consecutive retries per key
    attempts: HashMap<K, u32>,
    timers: HashMap<K, JoinHandle<()>>,
    /// Keys latched by a `Fail` directive
    failed: HashSet<K>,
    stopped: bool,
}

impl<K: ReconcileKey> QueueState<K> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            attempts: HashMap::new(),
            timers: HashMap::new(),
            failed: HashSet::new(),
            stopped: false,
        }
    }

    /// Returns true when a worker should be woken
    fn push(&mut self, key: K) -> bool {
        if self.queued.contains(&key) {
            return false;
        }
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        self.queued.insert(key.clone());
        self.queue.push_back(key);
        true
    }
}

struct Shared<K> {
    config: ControllerConfig,
    reconciler: Arc<dyn Reconciler<K>>,
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: ReconcileKey> Shared<K> {
    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-enqueue from a retry timer; skipped if the key was latched or
    /// re-scheduled meanwhile
    fn requeue(&self, key: K) {
        let wake = {
            let mut state = self.state();
            state.timers.remove(&key);
            if state.stopped || state.failed.contains(&key) {
                false
            } else {
                state.push(key)
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Pop the next runnable key, or `None` once stopped
    async fn next(&self) -> Option<(K, u32)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.stopped {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    let attempt = state.attempts.get(&key).copied().unwrap_or(0);
                    return Some((key, attempt));
                }
            }
            notified.await;
        }
    }

    fn complete(self: &Arc<Self>, key: K, directive: Directive) {
        let mut state = self.state();
        state.in_flight.remove(&key);
        let rerun = state.dirty.remove(&key);

        match directive {
            Directive::Ack => {
                debug!("[{}] {} reconciled", self.config.name, key);
                state.attempts.remove(&key);
                state.failed.remove(&key);
            }
            Directive::Retry { error, policy } => {
                let attempt = {
                    let counter = state.attempts.entry(key.clone()).or_insert(0);
                    let attempt = *counter;
                    *counter = counter.saturating_add(1);
                    attempt
                };
                let delay = policy.unwrap_or(self.config.default_backoff).delay(attempt);
                if rerun || state.stopped {
                    debug!(
                        "[{}] {} failed ({}), rerun already pending",
                        self.config.name, key, error
                    );
                } else {
                    warn!(
                        "[{}] Reconciliation of {} failed, retrying in {:?}: {}",
                        self.config.name, key, delay, error
                    );
                    let shared = Arc::clone(self);
                    let timer_key = key.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        shared.requeue(timer_key);
                    });
                    if let Some(previous) = state.timers.insert(key.clone(), timer) {
                        previous.abort();
                    }
                }
            }
            Directive::Fail { error } => {
                error!(
                    "[{}] Reconciliation of {} failed permanently: {}",
                    self.config.name, key, error
                );
                state.attempts.remove(&key);
                state.failed.insert(key.clone());
            }
        }

        if rerun && !state.stopped && state.push(key) {
            drop(state);
            self.notify.notify_one();
        }
    }
}

async fn worker<K: ReconcileKey>(shared: Arc<Shared<K>>, id: usize) {
    debug!("[{}] worker {} started", shared.config.name, id);
    while let Some((key, attempt)) = shared.next().await {
        let deadline = Instant::now() + shared.config.timeout;
        let request = Request::new(key.clone(), attempt, deadline);
        let directive = match tokio::time::timeout_at(deadline, shared.reconciler.reconcile(request)).await {
            Ok(directive) => directive,
            Err(_) => Directive::Retry {
                error: Box::new(ReconcileError::Timeout(shared.config.timeout)),
                policy: None,
            },
        };
        shared.complete(key, directive);
    }
    debug!("[{}] worker {} stopped", shared.config.name, id);
}

/// Keyed work queue driving a [`Reconciler`]
pub struct Controller<K: ReconcileKey> {
    shared: Arc<Shared<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<K: ReconcileKey> std::fmt::Debug for Controller<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<K: ReconcileKey> Controller<K> {
    /// Create the controller and start its workers
    pub fn new(config: ControllerConfig, reconciler: Arc<dyn Reconciler<K>>) -> Self {
        let parallelism = config.parallelism.max(1);
        info!(
            "Starting {} controller with parallelism {}",
            config.name, parallelism
        );
        let shared = Arc::new(Shared {
            config,
            reconciler,
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
        });
        let workers = (0..parallelism)
            .map(|id| tokio::spawn(worker(Arc::clone(&shared), id)))
            .collect();
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Schedule a reconciliation of `key`
    ///
    /// Any enqueue clears a `Fail` latch and replaces a pending retry timer
    /// with an immediate run. The controller does not tell notifications
    /// from periodic sweeps or internal events, so a latched key runs again
    /// on the next sweep. Reconcilers that must stay quiet after a permanent
    /// failure keep that latch in the resource itself (the Instance
    /// reconciler checks its failed provisioning status).
    pub fn enqueue(&self, key: K) -> Result<(), ReconcileError> {
        let wake = {
            let mut state = self.shared.state();
            if state.stopped {
                return Err(ReconcileError::Stopped);
            }
            state.failed.remove(&key);
            if let Some(timer) = state.timers.remove(&key) {
                timer.abort();
            }
            state.push(key)
        };
        if wake {
            self.shared.notify.notify_one();
        }
        Ok(())
    }

    /// Nothing queued and nothing running (retry timers may be armed)
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state();
        state.queue.is_empty() && state.in_flight.is_empty()
    }

    /// Whether `key` is latched by a `Fail` directive
    pub fn is_failed(&self, key: &K) -> bool {
        self.shared.state().failed.contains(key)
    }

    /// Whether a retry timer is armed for `key`
    pub fn has_pending_retry(&self, key: &K) -> bool {
        self.shared.state().timers.contains_key(key)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state().stopped
    }

    /// Reject new work, cancel retry timers and wait for in-flight
    /// reconciliations to finish. Safe to call more than once.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state();
            if !state.stopped {
                info!("Stopping {} controller", self.shared.config.name);
            }
            state.stopped = true;
            state.queue.clear();
            state.queued.clear();
            state.dirty.clear();
            for (_, timer) in state.timers.drain() {
                timer.abort();
            }
        }
        self.shared.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in workers {
            if let Err(e) = handle.await {
                error!("[{}] worker ended abnormally: {}", self.shared.config.name, e);
            }
        }
    }
}
