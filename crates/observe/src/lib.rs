#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use machine_monitor_types::{Observation, ObservabilitySink};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn observe(&self, _observation: &Observation<'_>) {}
}

/// Forwards observations to `tracing`: orphans and fetch failures at warn,
/// stale drops at debug.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn observe(&self, observation: &Observation<'_>) {
        match observation {
            Observation::OrphanEvent { event } => tracing::warn!(
                subject = %event.subject_id,
                timestamp = event.timestamp,
                kind = ?event.kind,
                reference = %event.reference,
                "discarding close event without a pending interval"
            ),
            Observation::FetchFailed {
                resource,
                token,
                error,
            } => tracing::warn!(resource, token, error, "fetch failed"),
            Observation::StaleResponseDropped {
                resource,
                token,
                current_token,
            } => tracing::debug!(resource, token, current_token, "dropping stale response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub observations_total: u64,
    pub orphan_events_total: u64,
    pub fetch_failures_total: u64,
    pub stale_responses_total: u64,
    pub last_fetch_error: Option<String>,
}

#[derive(Debug, Default)]
struct MetricsState {
    observations_total: AtomicU64,
    orphan_events_total: AtomicU64,
    fetch_failures_total: AtomicU64,
    stale_responses_total: AtomicU64,
    last_fetch_error: Mutex<Option<String>>,
}

/// Counts observations; clones share the same counters, so one handle can be
/// given to a component and another kept for reading.
#[derive(Clone, Debug, Default)]
pub struct MetricsSink {
    state: Arc<MetricsState>,
    forward_to_tracing: bool,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracing(mut self) -> Self {
        self.forward_to_tracing = true;
        self
    }

    pub fn snapshot(&self) -> Result<MetricsSnapshot, String> {
        let last_fetch_error = self
            .state
            .last_fetch_error
            .lock()
            .map_err(|_| "metrics sink state lock poisoned".to_string())?
            .to_owned();
        Ok(MetricsSnapshot {
            observations_total: self.state.observations_total.load(Ordering::Relaxed),
            orphan_events_total: self.state.orphan_events_total.load(Ordering::Relaxed),
            fetch_failures_total: self.state.fetch_failures_total.load(Ordering::Relaxed),
            stale_responses_total: self.state.stale_responses_total.load(Ordering::Relaxed),
            last_fetch_error,
        })
    }
}

impl ObservabilitySink for MetricsSink {
    fn observe(&self, observation: &Observation<'_>) {
        self.state
            .observations_total
            .fetch_add(1, Ordering::Relaxed);
        match observation {
            Observation::OrphanEvent { .. } => {
                self.state
                    .orphan_events_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            Observation::FetchFailed { error, .. } => {
                self.state
                    .fetch_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                if let Ok(mut last) = self.state.last_fetch_error.lock() {
                    *last = Some((*error).to_string());
                }
            }
            Observation::StaleResponseDropped { .. } => {
                self.state
                    .stale_responses_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.forward_to_tracing {
            TracingSink.observe(observation);
        }
    }
}
