//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data, an in-memory capture
//! backend, and a reconciler wired to both mocks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;

pub use cluster_client::{ClusterError, IntentRef, MockClusterClient};
pub use crds::*;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::runtime::{CaptureBackend, CaptureCommand, CaptureProcess};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Labels from `key=value` pairs
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// A pod in phase `phase` scheduled on `node`
pub fn pod_in_phase(name: &str, namespace: &str, node: Option<&str>, pod_labels: &[(&str, &str)], phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pod_labels)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                container_id: Some(format!("cri-o://{name}-ctr")),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A running pod scheduled on `node`; its container id is `<name>-ctr`
pub fn running_pod(name: &str, namespace: &str, node: &str, pod_labels: &[(&str, &str)]) -> Pod {
    pod_in_phase(name, namespace, Some(node), pod_labels, "Running")
}

/// The `ps -ef` AdHocCommand used throughout the tests
pub fn ad_hoc_command(name: &str, namespace: &str, selector: &[(&str, &str)], target_namespace: &str) -> AdHocCommand {
    let mut intent = AdHocCommand::new(
        name,
        AdHocCommandSpec {
            command: "ps".to_string(),
            args: "-ef".to_string(),
            label_selector: labels(selector),
            target_namespace: target_namespace.to_string(),
        },
    );
    intent.metadata.namespace = Some(namespace.to_string());
    intent
}

/// A ScheduledCommand every five minutes with a relay sink
pub fn scheduled_command(name: &str, namespace: &str, selector: &[(&str, &str)], target_namespace: &str) -> ScheduledCommand {
    let mut intent = ScheduledCommand::new(
        name,
        ScheduledCommandSpec {
            command: "tcpdump".to_string(),
            args: "-i eth0".to_string(),
            label_selector: labels(selector),
            target_namespace: target_namespace.to_string(),
            schedule: "*/5 * * * *".to_string(),
            timer: Some("30s".to_string()),
            data_service_ip: Some("10.96.0.50".to_string()),
            data_service_port: None,
        },
    );
    intent.metadata.namespace = Some(namespace.to_string());
    intent
}

/// A PacketCapture of `pod`'s `interface` for `duration` seconds
pub fn packet_capture(name: &str, namespace: &str, pod: &str, interface: &str, duration: Option<u64>) -> PacketCapture {
    let mut capture = PacketCapture::new(
        name,
        PacketCaptureSpec {
            pod_name: pod.to_string(),
            if_name: interface.to_string(),
            duration,
            packet_count: None,
            file_size: None,
            pcap_file_path: Some("/tmp/fleetcap-test".to_string()),
            target_namespace: None,
        },
    );
    capture.metadata.namespace = Some(namespace.to_string());
    capture
}

/// A DataEndpoint with default ports
pub fn data_endpoint(name: &str, namespace: &str) -> DataEndpoint {
    let mut endpoint = DataEndpoint::new(
        name,
        DataEndpointSpec {
            port: DEFAULT_RELAY_PORT,
            service_name: None,
            service_port: DEFAULT_RELAY_PORT,
            file_path: "/pcap".to_string(),
            image: None,
        },
    );
    endpoint.metadata.namespace = Some(namespace.to_string());
    endpoint
}

/// Current stored state of an intent, as the watcher would deliver it
pub fn reload<K: DeserializeOwned>(mock: &MockClusterClient, intent: &IntentRef) -> K {
    mock.intent_as(intent)
        .unwrap_or_else(|| panic!("{intent} is not stored"))
}

/// Reconciler with default configuration over the given mocks
pub fn test_reconciler(mock: MockClusterClient, backend: MockCaptureBackend) -> Reconciler {
    test_reconciler_with_config(mock, backend, ControllerConfig::default())
}

/// Reconciler with a custom configuration over the given mocks
pub fn test_reconciler_with_config(
    mock: MockClusterClient,
    backend: MockCaptureBackend,
    config: ControllerConfig,
) -> Reconciler {
    let metrics = Metrics::new().unwrap();
    Reconciler::new(mock, backend, config, metrics)
}

/// In-memory capture backend
///
/// Clones share state, so a test keeps one handle and gives the reconciler
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureBackend {
    pids: Arc<Mutex<HashMap<String, u32>>>,
    interfaces: Arc<Mutex<HashSet<(u32, String)>>>,
    spawned: Arc<Mutex<Vec<(u32, CaptureCommand)>>>,
    stops: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockCaptureBackend {
    /// Backend that knows no containers
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a container id to a pid whose namespace has `interfaces`
    pub fn add_container(&self, container_id: &str, pid: u32, interfaces: &[&str]) {
        lock(&self.pids).insert(container_id.to_string(), pid);
        let mut known = lock(&self.interfaces);
        for interface in interfaces {
            known.insert((pid, (*interface).to_string()));
        }
    }

    /// Captures spawned so far
    pub fn spawned(&self) -> Vec<(u32, CaptureCommand)> {
        lock(&self.spawned).clone()
    }

    /// Number of capture processes stopped
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of calls to `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == operation).count()
    }

    fn record(&self, operation: &str) {
        lock(&self.calls).push(operation.to_string());
    }
}

#[async_trait]
impl CaptureBackend for MockCaptureBackend {
    async fn container_pid(&self, container_id: &str) -> Result<u32, ControllerError> {
        self.record("container_pid");
        lock(&self.pids)
            .get(container_id)
            .copied()
            .ok_or_else(|| ControllerError::Runtime(format!("no such container {container_id}")))
    }

    async fn interface_exists(&self, pid: u32, interface: &str) -> Result<bool, ControllerError> {
        self.record("interface_exists");
        Ok(lock(&self.interfaces).contains(&(pid, interface.to_string())))
    }

    async fn spawn_capture(
        &self,
        pid: u32,
        command: &CaptureCommand,
    ) -> Result<Box<dyn CaptureProcess>, ControllerError> {
        self.record("spawn_capture");
        lock(&self.spawned).push((pid, command.clone()));
        Ok(Box::new(MockCaptureProcess {
            pid,
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Capture process that only counts stops
#[derive(Debug)]
pub struct MockCaptureProcess {
    pid: u32,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureProcess for MockCaptureProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn stop(&mut self) -> Result<(), ControllerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
