//! Instance selection
//!
//! Resolves a label selector in one namespace to the pods that can be targeted
//! right now. Results are a snapshot taken on every pass; nothing is cached.

use std::collections::BTreeMap;

use cluster_client::label_selector;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::Reconciler;
use crate::error::ControllerError;

/// A running pod matched by a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInstance {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Node the pod is scheduled on
    pub node_name: Option<String>,
    /// Container ids with the `<runtime>://` prefix removed
    pub container_ids: Vec<String>,
}

impl TargetInstance {
    /// Snapshot a pod, or `None` when it is not a valid target
    ///
    /// Only pods in phase `Running` that are not being deleted qualify.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        if pod.metadata.deletion_timestamp.is_some() {
            return None;
        }
        let status = pod.status.as_ref()?;
        if status.phase.as_deref() != Some("Running") {
            return None;
        }

        let container_ids = status
            .container_statuses
            .iter()
            .flatten()
            .filter_map(|cs| cs.container_id.as_deref())
            .map(strip_runtime_prefix)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Some(Self {
            name: pod.metadata.name.clone()?,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            container_ids,
        })
    }
}

/// Strip the `cri-o://`, `containerd://`, `docker://` style prefix
pub fn strip_runtime_prefix(container_id: &str) -> &str {
    container_id
        .split_once("://")
        .map_or(container_id, |(_, id)| id)
}

impl Reconciler {
    /// List the running pods matching `labels` in `namespace`, in listing order
    pub async fn select_instances(
        &self,
        labels: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Vec<TargetInstance>, ControllerError> {
        let selector = label_selector(labels);
        let pods = self
            .cluster
            .list_pods(namespace, &selector)
            .await
            .map_err(|source| ControllerError::UpstreamQuery {
                namespace: namespace.to_string(),
                source,
            })?;

        let listed = pods.len();
        let instances: Vec<TargetInstance> = pods.iter().filter_map(TargetInstance::from_pod).collect();
        debug!(
            "Selector '{}' in {} matched {} pods, {} running",
            selector,
            namespace,
            listed,
            instances.len()
        );

        if instances.is_empty() {
            return Err(ControllerError::EmptyResult {
                selector,
                namespace: namespace.to_string(),
            });
        }
        Ok(instances)
    }
}
