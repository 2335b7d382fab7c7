//! Kubernetes resource watchers.
//!
//! Every intent kind gets its own `kube_runtime::Controller` built by the
//! generic `watch_resource()` helper. The runtime serializes reconciles of
//! one object and bounds concurrency per kind; this module adds the intent
//! bookkeeping around each pass: metrics, backoff reset on success, a vanished
//! intent counted as success, and the retry decision in the error policy.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crds::{AdHocCommand, DataEndpoint, IntentKind, PacketCapture, ScheduledCommand};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{Controller, watcher};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::health::HealthRegistry;
use crate::reconciler::Reconciler;

/// Events for one object arriving within this window are reconciled once
const DEBOUNCE: Duration = Duration::from_secs(1);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff key of an object: `<kind>/<namespace>/<name>`
fn resource_key<K: ResourceExt>(kind: IntentKind, object: &K) -> String {
    format!(
        "{}/{}/{}",
        kind,
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// The reconcile_fn matches the reconciler's own signature:
/// `async fn reconcile_x(&self, intent: &K) -> Result<Action, ControllerError>`
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: IntentKind,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + Debug + DeserializeOwned,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(kind, obj.as_ref());
        ctx.error_action(kind, &key, error)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(kind, obj.as_ref());
            debug!("Reconciling {}", key);

            let result = reconcile_fn(ctx.clone(), obj).await;
            ctx.metrics().record_reconcile(kind, &result.as_ref().map(|_| ()));

            match result {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) if e.is_not_found() => {
                    debug!("{} is gone: {}", key, e);
                    ctx.reset_error(&key);
                    Ok(Action::await_change())
                }
                Err(e) => {
                    error!("Reconciliation failed for {} ({}): {}", key, e.label(), e);
                    Err(e)
                }
            }
        }
    };

    let runtime_config = RuntimeConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(runtime_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("{} {} reconciled", kind, obj.name),
                Err(e) => warn!("{} controller: {}", kind, e),
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{kind} watch stream ended")))
}

/// Watches FleetCap intents for changes.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    health: HealthRegistry,
    concurrency: u16,
    ad_hoc_command_api: Api<AdHocCommand>,
    scheduled_command_api: Api<ScheduledCommand>,
    packet_capture_api: Api<PacketCapture>,
    data_endpoint_api: Api<DataEndpoint>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        health: HealthRegistry,
        concurrency: u16,
        ad_hoc_command_api: Api<AdHocCommand>,
        scheduled_command_api: Api<ScheduledCommand>,
        packet_capture_api: Api<PacketCapture>,
        data_endpoint_api: Api<DataEndpoint>,
    ) -> Self {
        Self {
            reconciler,
            health,
            concurrency,
            ad_hoc_command_api,
            scheduled_command_api,
            packet_capture_api,
            data_endpoint_api,
        }
    }

    async fn supervise<K, F>(&self, api: Api<K>, reconcile_fn: F, kind: IntentKind) -> Result<(), ControllerError>
    where
        K: Resource + Clone + Send + Sync + 'static + Debug + DeserializeOwned,
        K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
        F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
    {
        self.health.register(kind.kind()).await;
        let result = watch_resource(api, self.reconciler.clone(), reconcile_fn, kind, self.concurrency).await;
        if let Err(e) = &result {
            self.health.set_unhealthy(kind.kind(), e.to_string()).await;
        }
        result
    }

    /// Starts watching AdHocCommand resources.
    pub async fn watch_ad_hoc_commands(&self) -> Result<(), ControllerError> {
        self.supervise(
            self.ad_hoc_command_api.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_ad_hoc_command(&resource).await })
            },
            IntentKind::AdHocCommand,
        )
        .await
    }

    /// Starts watching ScheduledCommand resources.
    pub async fn watch_scheduled_commands(&self) -> Result<(), ControllerError> {
        self.supervise(
            self.scheduled_command_api.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_scheduled_command(&resource).await })
            },
            IntentKind::ScheduledCommand,
        )
        .await
    }

    /// Starts watching PacketCapture resources.
    pub async fn watch_packet_captures(&self) -> Result<(), ControllerError> {
        self.supervise(
            self.packet_capture_api.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_packet_capture(&resource).await })
            },
            IntentKind::PacketCapture,
        )
        .await
    }

    /// Starts watching DataEndpoint resources.
    pub async fn watch_data_endpoints(&self) -> Result<(), ControllerError> {
        self.supervise(
            self.data_endpoint_api.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_data_endpoint(&resource).await })
            },
            IntentKind::DataEndpoint,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::AdHocCommandSpec;

    #[test]
    fn test_resource_key() {
        let mut intent = AdHocCommand::new("sweep", AdHocCommandSpec::default());
        intent.metadata.namespace = Some("ns1".to_string());
        assert_eq!(
            resource_key(IntentKind::AdHocCommand, &intent),
            "AdHocCommand/ns1/sweep"
        );
    }
}
