//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster
//! client, the capture backend and the reconciler together, starts one
//! watcher per intent kind plus the probe server, and runs until any of them
//! exits.
//!
//! The controller manages four CRD types:
//! - AdHocCommand: one Job per matching pod
//! - ScheduledCommand: one CronJob per matching pod
//! - PacketCapture: tcpdump inside one pod's network namespace
//! - DataEndpoint: the relay sink Deployment + Service

use std::sync::Arc;

use cluster_client::KubeClusterClient;
use crds::{AdHocCommand, DataEndpoint, PacketCapture, ScheduledCommand};
use kube::{Api, Client, Resource};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::health::{self, HealthRegistry, ProbeState};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::runtime::NsenterBackend;
use crate::watcher::Watcher;

type Task = JoinHandle<Result<(), ControllerError>>;

/// `Api` scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Main controller for FleetCap intents.
#[derive(Debug)]
pub struct Controller {
    ad_hoc_command_watcher: Task,
    scheduled_command_watcher: Task,
    packet_capture_watcher: Task,
    data_endpoint_watcher: Task,
    probe_server: Task,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing FleetCap controller");

        let kube_client = Client::try_default().await?;
        let cluster = KubeClusterClient::new(kube_client.clone());
        let backend = NsenterBackend::new(&config);
        let metrics = Metrics::new()
            .map_err(|e| ControllerError::Telemetry(format!("registering metrics: {e}")))?;
        let health = HealthRegistry::new();

        let namespace = config.watch_namespace.as_deref();
        let ad_hoc_command_api: Api<AdHocCommand> = scoped_api(&kube_client, namespace);
        let scheduled_command_api: Api<ScheduledCommand> = scoped_api(&kube_client, namespace);
        let packet_capture_api: Api<PacketCapture> = scoped_api(&kube_client, namespace);
        let data_endpoint_api: Api<DataEndpoint> = scoped_api(&kube_client, namespace);

        let probe_addr = config.probe_addr;
        let concurrency = config.reconcile_concurrency;
        let reconciler = Arc::new(Reconciler::new(cluster, backend, config, metrics.clone()));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            health.clone(),
            concurrency,
            ad_hoc_command_api,
            scheduled_command_api,
            packet_capture_api,
            data_endpoint_api,
        ));

        let ad_hoc_command_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_ad_hoc_commands().await })
        };
        let scheduled_command_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_scheduled_commands().await })
        };
        let packet_capture_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_packet_captures().await })
        };
        let data_endpoint_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_data_endpoints().await })
        };

        let probe_state = Arc::new(ProbeState {
            health: health.clone(),
            metrics,
        });
        let probe_server = tokio::spawn(health::serve(probe_addr, probe_state));

        health.set_ready(true).await;
        info!("FleetCap controller started");

        Ok(Self {
            ad_hoc_command_watcher,
            scheduled_command_watcher,
            packet_capture_watcher,
            data_endpoint_watcher,
            probe_server,
        })
    }

    /// Runs until a watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        // Wait for any task to exit (they should run forever)
        tokio::select! {
            result = &mut self.ad_hoc_command_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AdHocCommand watcher panicked: {e}")))??;
            }
            result = &mut self.scheduled_command_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ScheduledCommand watcher panicked: {e}")))??;
            }
            result = &mut self.packet_capture_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("PacketCapture watcher panicked: {e}")))??;
            }
            result = &mut self.data_endpoint_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("DataEndpoint watcher panicked: {e}")))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Telemetry(format!("probe server panicked: {e}")))??;
            }
        }
        Ok(())
    }
}
