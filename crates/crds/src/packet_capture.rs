//! PacketCapture CRD
//!
//! Captures traffic on one interface of one pod by entering the pod's network
//! namespace from the controller's node. The capture is time-boxed: status
//! records a deadline and a later reconcile pass stops it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::phase::IntentPhase;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetcap.microscaler.io",
    version = "v1alpha1",
    kind = "PacketCapture",
    namespaced,
    status = "PacketCaptureStatus",
    shortname = "pcap",
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".spec.podName"}"#,
    printcolumn = r#"{"name":"Interface","type":"string","jsonPath":".spec.ifName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PacketCaptureSpec {
    /// Target pod
    pub pod_name: String,

    /// Interface inside the pod's network namespace
    pub if_name: String,

    /// Capture length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    /// Stop after this many packets (`tcpdump -c`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_count: Option<u64>,

    /// Rotate the output file at this size in millions of bytes (`tcpdump -C`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    /// Directory the artifact is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_file_path: Option<String>,

    /// Namespace of the target pod (defaults to the intent's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PacketCaptureStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: IntentPhase,

    /// When the capture process was spawned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,

    /// When the capture should be stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,

    /// When the capture was stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Full path of the produced artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_file_path: Option<String>,

    /// Last fatal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Generation the recorded phase and error were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
