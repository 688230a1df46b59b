//! Prometheus metrics for the tally pipeline
//!
//! Registered once in the default registry and labelled by backend name.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, Encoder, IntCounterVec,
    IntGauge, IntGaugeVec, TextEncoder,
};

use crate::establish::LinkState;

const LABEL_BACKEND: &str = "backend";
const LABEL_RESULT: &str = "result";

/// Connect attempts made by the establisher
static CONNECT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tally_connect_attempts_total",
        "Database connect attempts",
        &[LABEL_BACKEND]
    )
    .expect("Failed to register connect_attempts metric")
});

/// 1 when the establisher reached Connected, 0 otherwise
static CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tally_backend_connected",
        "Backend connection status (1=connected, 0=not connected)",
        &[LABEL_BACKEND]
    )
    .expect("Failed to register backend_connected metric")
});

/// Poll ticks by outcome (ok, error)
static POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tally_polls_total",
        "Tally poll ticks by outcome",
        &[LABEL_BACKEND, LABEL_RESULT]
    )
    .expect("Failed to register polls metric")
});

/// Unix timestamp of the last published tally
static LAST_PUBLISH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tally_last_publish_timestamp",
        "Unix timestamp of the last published tally",
        &[LABEL_BACKEND]
    )
    .expect("Failed to register last_publish metric")
});

/// Currently connected viewer sessions
static VIEWERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tally_viewers", "Connected viewer sessions")
        .expect("Failed to register viewers metric")
});

/// Score messages handed to viewer sessions
static SCORES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tally_scores_sent_total",
        "Score messages queued to viewer sessions, by outcome",
        &[LABEL_RESULT]
    )
    .expect("Failed to register scores_sent metric")
});

/// Handle for recording metrics for one backend
#[derive(Clone)]
pub struct TallyMetrics {
    backend: String,
}

impl TallyMetrics {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    pub fn inc_connect_attempt(&self) {
        CONNECT_ATTEMPTS.with_label_values(&[&self.backend]).inc();
    }

    pub fn set_link_state(&self, state: &LinkState) {
        let connected = matches!(state, LinkState::Connected) as i64;
        CONNECTED.with_label_values(&[&self.backend]).set(connected);
    }

    pub fn inc_poll_ok(&self) {
        POLLS.with_label_values(&[&self.backend, "ok"]).inc();
    }

    pub fn inc_poll_error(&self) {
        POLLS.with_label_values(&[&self.backend, "error"]).inc();
    }

    pub fn set_last_publish(&self, epoch_secs: i64) {
        LAST_PUBLISH.with_label_values(&[&self.backend]).set(epoch_secs);
    }
}

/// Record the number of connected viewers
pub fn set_viewers(count: usize) {
    VIEWERS.set(count as i64);
}

/// Record score deliveries: queued, and dropped for full or closed sessions
pub fn add_scores_sent(delivered: usize, dropped: usize) {
    SCORES_SENT
        .with_label_values(&["delivered"])
        .inc_by(delivered as u64);
    SCORES_SENT
        .with_label_values(&["dropped"])
        .inc_by(dropped as u64);
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_metrics_recording() {
        let metrics = TallyMetrics::new("test-backend");
        metrics.inc_connect_attempt();
        metrics.set_link_state(&LinkState::Connected);
        metrics.inc_poll_ok();
        metrics.inc_poll_error();
        metrics.set_last_publish(1_700_000_000);
        set_viewers(3);
        add_scores_sent(3, 1);

        let output = encode_metrics().unwrap();
        assert!(output.contains("tally_polls_total"));
        assert!(output.contains("tally_backend_connected{backend=\"test-backend\"} 1"));
    }
}
