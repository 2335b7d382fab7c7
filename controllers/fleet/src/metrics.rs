//! Prometheus metrics for the fleet controller
//!
//! Metrics live in a registry owned by the handle rather than the process
//! global one, so every reconciler (and every test) gets its own set.

use std::sync::Arc;

use crds::IntentKind;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::ControllerError;

/// Reconcile outcome label values
pub mod outcome {
    /// Pass finished without error
    pub const SUCCESS: &str = "success";
    /// Pass failed and will be retried
    pub const RETRY: &str = "retry";
    /// Pass failed and waits for a spec change
    pub const FATAL: &str = "fatal";
}

#[derive(Debug)]
struct Inner {
    registry: Registry,
    reconcile_total: IntCounterVec,
    units_created_total: IntCounterVec,
    active_captures: IntGauge,
}

/// Cheap, cloneable handle to the controller's metrics
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

impl Metrics {
    /// Create and register all metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "fleetcap_reconcile_total",
                "Reconcile passes by intent kind and outcome",
            ),
            &["kind", "result"],
        )?;
        let units_created_total = IntCounterVec::new(
            Opts::new(
                "fleetcap_units_created_total",
                "Jobs and CronJobs created by intent kind",
            ),
            &["kind"],
        )?;
        let active_captures = IntGauge::new(
            "fleetcap_active_captures",
            "Packet captures currently running",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(units_created_total.clone()))?;
        registry.register(Box::new(active_captures.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                reconcile_total,
                units_created_total,
                active_captures,
            }),
        })
    }

    /// Count one reconcile pass
    pub fn record_reconcile(&self, kind: IntentKind, result: &Result<(), &ControllerError>) {
        let label = match result {
            Ok(()) => outcome::SUCCESS,
            Err(e) if e.is_not_found() => outcome::SUCCESS,
            Err(e) if e.is_retryable() => outcome::RETRY,
            Err(_) => outcome::FATAL,
        };
        self.inner
            .reconcile_total
            .with_label_values(&[kind.kind(), label])
            .inc();
    }

    /// Count one created unit
    pub fn record_unit_created(&self, kind: IntentKind) {
        self.inner
            .units_created_total
            .with_label_values(&[kind.kind()])
            .inc();
    }

    /// A capture process was spawned
    pub fn capture_started(&self) {
        self.inner.active_captures.inc();
    }

    /// A capture process was stopped
    pub fn capture_stopped(&self) {
        self.inner.active_captures.dec();
    }

    /// Current number of running captures
    pub fn active_captures(&self) -> i64 {
        self.inner.active_captures.get()
    }

    /// Current value of `fleetcap_reconcile_total{kind, result}`
    #[cfg(test)]
    pub fn reconcile_count(&self, kind: IntentKind, result: &str) -> u64 {
        self.inner
            .reconcile_total
            .with_label_values(&[kind.kind(), result])
            .get()
    }

    /// Current value of `fleetcap_units_created_total{kind}`
    #[cfg(test)]
    pub fn units_created(&self, kind: IntentKind) -> u64 {
        self.inner
            .units_created_total
            .with_label_values(&[kind.kind()])
            .get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|e| ControllerError::Telemetry(format!("encoding metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Telemetry(format!("metrics are not UTF-8: {e}")))
    }
}
