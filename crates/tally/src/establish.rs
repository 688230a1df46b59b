//! Bounded-retry connection establishment.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::error::{BackendError, EstablishError};
use crate::metrics::TallyMetrics;

/// Connection state, observable through [`Establisher::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LinkState {
    Idle,
    Attempting { attempt: u32 },
    Connected,
    GivenUp,
    Cancelled,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Attempting { .. } => "attempting",
            LinkState::Connected => "connected",
            LinkState::GivenUp => "given_up",
            LinkState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Fixed wait between two attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Turns a backend that may not be ready yet into a connection handle.
///
/// Attempts are strictly sequential. A failed attempt is logged and followed
/// by a fixed wait; the error never changes the policy.
pub struct Establisher {
    policy: RetryPolicy,
    state: watch::Sender<LinkState>,
    metrics: Option<TallyMetrics>,
}

impl Establisher {
    pub fn new(policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            policy,
            state,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TallyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    fn set(&self, state: LinkState) {
        self.state.send_replace(state);
        if let Some(m) = &self.metrics {
            m.set_link_state(&state);
        }
    }

    /// Run the state machine to completion.
    ///
    /// Returns the handle on `Connected`. `GivenUp` and `Cancelled` are terminal:
    /// `connect` is not called again by this establisher.
    pub async fn establish<B: Backend>(
        &self,
        backend: &B,
        shutdown: &CancellationToken,
    ) -> Result<B::Handle, EstablishError> {
        let mut attempt = 1;
        loop {
            self.set(LinkState::Attempting { attempt });
            if let Some(m) = &self.metrics {
                m.inc_connect_attempt();
            }

            let last_error: BackendError = tokio::select! {
                () = shutdown.cancelled() => {
                    self.set(LinkState::Cancelled);
                    return Err(EstablishError::Cancelled);
                }
                result = backend.connect() => match result {
                    Ok(handle) => {
                        self.set(LinkState::Connected);
                        info!(backend = backend.name(), attempt, "connected to database");
                        return Ok(handle);
                    }
                    Err(e) => e,
                }
            };

            if attempt >= self.policy.max_attempts {
                self.set(LinkState::GivenUp);
                error!(
                    backend = backend.name(),
                    attempts = attempt,
                    error = %last_error,
                    "giving up on database connection"
                );
                return Err(EstablishError::GivenUp {
                    attempts: attempt,
                    last_error,
                });
            }

            warn!(backend = backend.name(), attempt, error = %last_error, "waiting for db");

            tokio::select! {
                () = shutdown.cancelled() => {
                    self.set(LinkState::Cancelled);
                    return Err(EstablishError::Cancelled);
                }
                () = tokio::time::sleep(self.policy.interval) => {}
            }
            attempt += 1;
        }
    }
}
