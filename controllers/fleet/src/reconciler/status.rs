//! Status and finalizer writes
//!
//! Every write re-reads the intent and sends its resourceVersion with the
//! patch. A conflict means someone else wrote in between: re-read and
//! re-apply, a bounded number of times. Writes that would change nothing are
//! skipped so status updates do not trigger needless reconciles.

use cluster_client::{ClusterError, IntentRef, finalizers, resource_version};
use crds::{FINALIZER, IntentPhase};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::Reconciler;
use crate::error::ControllerError;

/// Attempts per write before giving up with a retryable conflict
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Whether a recorded failure was computed from the current spec
///
/// A spec edit bumps `metadata.generation`, which makes an older failure stale.
pub(crate) fn failure_is_current(generation: Option<i64>, observed_generation: Option<i64>) -> bool {
    observed_generation.is_some() && observed_generation == generation
}

#[derive(Clone, Copy)]
enum Target {
    Status,
    Metadata,
}

fn with_version(current: &Value, mut patch: Value) -> Value {
    if let (Some(rv), Some(map)) = (resource_version(current), patch.as_object_mut()) {
        let metadata = map.entry("metadata").or_insert_with(|| json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), json!(rv));
        }
    }
    patch
}

impl Reconciler {
    /// Current raw intent; a missing intent is `ControllerError::NotFound`
    pub(crate) async fn fetch_intent(&self, intent: &IntentRef) -> Result<Value, ControllerError> {
        match self.cluster.get_intent(intent).await {
            Ok(object) => Ok(object),
            Err(ClusterError::NotFound(_)) => Err(ControllerError::NotFound(intent.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<F>(&self, intent: &IntentRef, target: Target, compute: F) -> Result<Option<Value>, ControllerError>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync,
    {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let current = self.fetch_intent(intent).await?;
            let Some(body) = compute(&current) else {
                return Ok(None);
            };

            let result = match target {
                Target::Status => {
                    let patch = with_version(&current, json!({ "status": body }));
                    self.cluster.patch_intent_status(intent, &patch).await
                }
                Target::Metadata => {
                    let patch = with_version(&current, json!({ "metadata": body }));
                    self.cluster.patch_intent(intent, &patch).await
                }
            };

            match result {
                Ok(updated) => return Ok(Some(updated)),
                Err(ClusterError::Conflict(msg)) => {
                    debug!("Conflict writing {} (attempt {}): {}", intent, attempt, msg);
                }
                Err(ClusterError::NotFound(_)) => {
                    return Err(ControllerError::NotFound(intent.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!("Giving up on {} after {} conflicting writes", intent, MAX_CONFLICT_RETRIES);
        Err(ControllerError::Cluster(ClusterError::Conflict(format!(
            "{intent}: {MAX_CONFLICT_RETRIES} conflicting writes"
        ))))
    }

    /// Merge `compute(current)` into `.status`, unless it returns `None`
    pub(crate) async fn update_status<F>(&self, intent: &IntentRef, compute: F) -> Result<Option<Value>, ControllerError>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync,
    {
        self.write(intent, Target::Status, compute).await
    }

    /// Register our finalizer
    pub(crate) async fn add_finalizer(&self, intent: &IntentRef) -> Result<(), ControllerError> {
        self.write(intent, Target::Metadata, |current| {
            let mut list = finalizers(current);
            if list.iter().any(|f| f == FINALIZER) {
                return None;
            }
            list.push(FINALIZER.to_string());
            Some(json!({ "finalizers": list }))
        })
        .await?;
        debug!("Added finalizer to {}", intent);
        Ok(())
    }

    /// Drop our finalizer, leaving any others in place
    pub(crate) async fn remove_finalizer(&self, intent: &IntentRef) -> Result<(), ControllerError> {
        self.write(intent, Target::Metadata, |current| {
            let list = finalizers(current);
            if !list.iter().any(|f| f == FINALIZER) {
                return None;
            }
            let kept: Vec<String> = list.into_iter().filter(|f| f != FINALIZER).collect();
            Some(json!({ "finalizers": kept }))
        })
        .await?;
        debug!("Removed finalizer from {}", intent);
        Ok(())
    }

    /// Set `status.phase` and `status.error` (cleared when `None`)
    pub(crate) async fn set_phase(
        &self,
        intent: &IntentRef,
        phase: IntentPhase,
        error: Option<&str>,
    ) -> Result<(), ControllerError> {
        self.update_status(intent, |current| {
            let same_phase = current.pointer("/status/phase").and_then(Value::as_str) == Some(phase.as_str());
            let same_error = current.pointer("/status/error").and_then(Value::as_str) == error;
            if same_phase && same_error {
                return None;
            }
            Some(json!({ "phase": phase.as_str(), "error": error }))
        })
        .await?;
        Ok(())
    }

    /// Append `entry` to the string list at `.status.<field>` unless present
    pub(crate) async fn append_status_entry(
        &self,
        intent: &IntentRef,
        field: &str,
        entry: &str,
    ) -> Result<(), ControllerError> {
        self.update_status(intent, |current| {
            let mut list: Vec<String> = current
                .pointer(&format!("/status/{field}"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if list.iter().any(|existing| existing == entry) {
                return None;
            }
            list.push(entry.to_string());
            Some(json!({ field: list }))
        })
        .await?;
        Ok(())
    }

    /// Record a fatal error against the spec generation it came from
    pub(crate) async fn record_failure(
        &self,
        intent: &IntentRef,
        error: &ControllerError,
        generation: Option<i64>,
    ) -> Result<(), ControllerError> {
        warn!("{} failed: {}", intent, error);
        let message = error.to_string();
        self.update_status(intent, |current| {
            let desired = json!({
                "phase": IntentPhase::Failed.as_str(),
                "error": message,
                "observedGeneration": generation,
            });
            let unchanged = ["phase", "error", "observedGeneration"]
                .iter()
                .all(|field| current.pointer(&format!("/status/{field}")).unwrap_or(&Value::Null) == &desired[*field]);
            if unchanged {
                return None;
            }
            Some(desired)
        })
        .await?;
        Ok(())
    }
}
