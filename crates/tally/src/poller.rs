//! Fixed-interval loop fetching the tally and publishing it to viewers.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::error::BackendError;
use crate::hub::Hub;
use crate::metrics::TallyMetrics;
use crate::tally::{normalize, RawResult};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub published: u64,
    pub failures: u64,
}

/// Drives `fetch_tally` against an established handle.
///
/// At most one fetch is in flight: the next tick starts `interval` after the
/// previous one finished. A failed tick is logged and the loop carries on.
pub struct Poller<B: Backend> {
    backend: B,
    handle: B::Handle,
    hub: Hub,
    interval: Duration,
    fetch_timeout: Duration,
    max_ticks: Option<u64>,
    metrics: Option<TallyMetrics>,
}

impl<B: Backend> Poller<B> {
    pub fn new(backend: B, handle: B::Handle, hub: Hub) -> Self {
        let interval = backend.poll_interval();
        Self {
            backend,
            handle,
            hub,
            interval,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_ticks: None,
            metrics: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Stop on its own after this many ticks.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn with_metrics(mut self, metrics: TallyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&mut self) -> Result<RawResult, BackendError> {
        match tokio::time::timeout(
            self.fetch_timeout,
            self.backend.fetch_tally(&mut self.handle),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                timeout_ms: self.fetch_timeout.as_millis() as u64,
            }),
        }
    }

    /// Run one tick: fetch, normalize, publish.
    pub async fn tick(&mut self) -> Result<(), BackendError> {
        let rows = self.fetch().await?;
        let tally = normalize(&rows);
        let delivery = self.hub.publish(&tally);
        debug!(
            scores = %tally.to_json(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "published tally"
        );
        Ok(())
    }

    /// Loop until `shutdown` is cancelled or the tick limit is reached.
    pub async fn run(mut self, shutdown: CancellationToken) -> PollStats {
        let mut stats = PollStats::default();
        info!(
            backend = self.backend.name(),
            interval_ms = self.interval.as_millis() as u64,
            "poller started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                () = shutdown.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            stats.ticks += 1;
            match outcome {
                Ok(()) => {
                    stats.published += 1;
                    if let Some(m) = &self.metrics {
                        m.inc_poll_ok();
                        m.set_last_publish(chrono::Utc::now().timestamp());
                    }
                }
                Err(e) => {
                    stats.failures += 1;
                    if let Some(m) = &self.metrics {
                        m.inc_poll_error();
                    }
                    error!(backend = self.backend.name(), error = %e, "error performing query");
                }
            }

            if self.max_ticks.is_some_and(|max| stats.ticks >= max) {
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            backend = self.backend.name(),
            ticks = stats.ticks,
            published = stats.published,
            failures = stats.failures,
            "poller stopped"
        );
        stats
    }
}
