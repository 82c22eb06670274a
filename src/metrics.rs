use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub transport_errors: u64,
    pub http_status_errors: u64,
    pub api_errors: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

/// Per-client counters; every method is a no-op when metrics are disabled.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Option<Arc<ClientMetricsInner>>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    transport_errors: AtomicU64,
    http_status_errors: AtomicU64,
    api_errors: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<ClientMetricsInner>>,
}

impl ClientMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        if enabled {
            Self {
                inner: Some(Arc::new(ClientMetricsInner::default())),
            }
        } else {
            Self::default()
        }
    }

    pub(crate) fn record_request_started(&self) -> InFlightGuard {
        match &self.inner {
            Some(inner) => {
                inner.requests_started.fetch_add(1, Ordering::Relaxed);
                inner.in_flight.fetch_add(1, Ordering::Relaxed);
                InFlightGuard {
                    inner: Some(Arc::clone(inner)),
                }
            }
            None => InFlightGuard { inner: None },
        }
    }

    pub(crate) fn record_response_status(&self, status: u16) {
        self.add_status_count(status);
    }

    pub(crate) fn record_success(&self, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub(crate) fn record_failure(&self, error: &Error, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        let key = match error {
            Error::Timeout { .. } => {
                inner.timeouts.fetch_add(1, Ordering::Relaxed);
                "timeout".to_owned()
            }
            Error::Cancelled { .. } => {
                inner.cancellations.fetch_add(1, Ordering::Relaxed);
                "cancelled".to_owned()
            }
            Error::Transport { kind, .. } => {
                inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                format!("transport:{kind}")
            }
            Error::HttpStatus { status, .. } => {
                inner.http_status_errors.fetch_add(1, Ordering::Relaxed);
                format!("http_status:{status}")
            }
            Error::Api(api) => {
                inner.api_errors.fetch_add(1, Ordering::Relaxed);
                format!("api:{}", api.kind())
            }
            other => other.code().as_str().to_owned(),
        };
        self.add_error_count(key);
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return ClientMetricsSnapshot::default();
        };

        let latency_samples = inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            requests_started: inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: inner.requests_failed.load(Ordering::Relaxed),
            timeouts: inner.timeouts.load(Ordering::Relaxed),
            cancellations: inner.cancellations.load(Ordering::Relaxed),
            transport_errors: inner.transport_errors.load(Ordering::Relaxed),
            http_status_errors: inner.http_status_errors.load(Ordering::Relaxed),
            api_errors: inner.api_errors.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut status_counts = lock_unpoisoned(&inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut error_counts = lock_unpoisoned(&inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
