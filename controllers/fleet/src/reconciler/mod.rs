//! Reconciliation logic for FleetCap intents.
//!
//! - `selector`, `arguments`, `builder`, `dispatcher`: fleet fan-out pipeline
//! - `intent`: AdHocCommand / ScheduledCommand state machine
//! - `capture`: PacketCapture start/stop passes
//! - `data_endpoint`: relay sink Deployment + Service
//! - `status`: conflict-safe status and finalizer writes

pub mod arguments;
pub mod builder;
pub mod capture;
pub mod data_endpoint;
pub mod dispatcher;
pub mod intent;
pub mod selector;
pub mod status;

#[cfg(test)]
mod builder_test;
#[cfg(test)]
mod data_endpoint_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cluster_client::{ClusterClientTrait, IntentRef};
use crds::IntentKind;
use kube_runtime::controller::Action;
use tracing::{debug, warn};

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::runtime::CaptureBackend;
use builder::UnitBuilder;
use capture::CaptureSession;

/// Backoff state for an intent
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles FleetCap intents.
///
/// Holds no per-request state: every operation takes the intent it acts on.
pub struct Reconciler {
    pub(crate) cluster: Box<dyn ClusterClientTrait + Send + Sync>,
    pub(crate) capture_backend: Box<dyn CaptureBackend + Send + Sync>,
    pub(crate) config: ControllerConfig,
    pub(crate) unit_builder: UnitBuilder,
    pub(crate) metrics: Metrics,
    /// Running captures, keyed by the owning PacketCapture
    pub(crate) sessions: tokio::sync::Mutex<HashMap<IntentRef, CaptureSession>>,
    /// Error count tracking per intent (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        cluster: impl ClusterClientTrait + Send + Sync + 'static,
        capture_backend: impl CaptureBackend + Send + Sync + 'static,
        config: ControllerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            cluster: Box::new(cluster),
            capture_backend: Box::new(capture_backend),
            unit_builder: UnitBuilder::new(&config),
            config,
            metrics,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Controller metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn new_backoff_state(&self) -> BackoffState {
        BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
    }

    /// Get the Fibonacci backoff duration for an intent based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| self.new_backoff_state());
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (self.config.backoff_max_secs, 0)
            }
        }
    }

    /// Increment error count for an intent
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(|| self.new_backoff_state())
                .increment_error();
        }
    }

    /// Reset error count for an intent (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    /// Decide what the controller does after a failed pass
    ///
    /// Retryable errors requeue with the intent's next backoff step. A
    /// template error is requeued at the maximum backoff, since only an
    /// outside fix resolves it. Other fatal errors wait for a spec change.
    pub fn error_action(&self, kind: IntentKind, resource_key: &str, error: &ControllerError) -> Action {
        if error.is_not_found() {
            return Action::await_change();
        }
        if matches!(error, ControllerError::Template(_)) {
            warn!(
                "{} {}: {} (retrying in {}s)",
                kind, resource_key, error, self.config.backoff_max_secs
            );
            return Action::requeue(Duration::from_secs(self.config.backoff_max_secs));
        }
        if !error.is_retryable() {
            warn!("{} {}: {} (not retrying)", kind, resource_key, error);
            return Action::await_change();
        }

        self.increment_error(resource_key);
        let (backoff_seconds, error_count) = self.get_backoff_for_resource(resource_key);
        debug!(
            "{} {} failed {} time(s), requeue in {}s: {}",
            kind, resource_key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    }
}
