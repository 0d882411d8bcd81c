//! Reconcile requests and the verdicts returned for them

use crate::backoff::RetryPolicy;
use std::fmt;
use tokio::time::Instant;

/// Boxed error carried by retry and fail directives
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One scheduled reconciliation of `key`
#[derive(Debug, Clone)]
pub struct Request<K> {
    pub key: K,
    /// Consecutive retries before this run; zero on a fresh event
    pub attempt: u32,
    deadline: Instant,
}

impl<K> Request<K> {
    pub fn new(key: K, attempt: u32, deadline: Instant) -> Self {
        Self {
            key,
            attempt,
            deadline,
        }
    }

    /// Point in time after which the controller abandons this run
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Done; forget retry state for this key
    pub fn ack(&self) -> Directive {
        Directive::Ack
    }

    /// Try again later using the controller's default backoff.
    /// Chain [`Directive::with`] to pick another policy.
    pub fn retry(&self, error: impl Into<BoxError>) -> Directive {
        Directive::Retry {
            error: error.into(),
            policy: None,
        }
    }

    /// Give up until a new external event arrives for this key
    pub fn fail(&self, error: impl Into<BoxError>) -> Directive {
        Directive::Fail {
            error: error.into(),
        }
    }
}

/// Outcome of a reconciliation
pub enum Directive {
    Ack,
    Retry {
        error: BoxError,
        /// `None` uses the controller default
        policy: Option<RetryPolicy>,
    },
    Fail {
        error: BoxError,
    },
}

impl Directive {
    /// Attach a backoff policy to a retry; no-op for other directives
    #[must_use]
    pub fn with(self, backoff: RetryPolicy) -> Self {
        match self {
            Directive::Retry { error, .. } => Directive::Retry {
                error,
                policy: Some(backoff),
            },
            other => other,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Directive::Ack)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Directive::Retry { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Directive::Fail { .. })
    }

    /// Error attached to a retry or fail
    pub fn error(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        match self {
            Directive::Ack => None,
            Directive::Retry { error, .. } | Directive::Fail { error } => Some(error.as_ref()),
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Ack => f.write_str("Ack"),
            Directive::Retry { error, policy } => f
                .debug_struct("Retry")
                .field("error", &error.to_string())
                .field("policy", policy)
                .finish(),
            Directive::Fail { error } => f
                .debug_struct("Fail")
                .field("error", &error.to_string())
                .finish(),
        }
    }
}
