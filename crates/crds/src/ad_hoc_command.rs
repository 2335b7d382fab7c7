//! AdHocCommand CRD
//!
//! Runs a command once in every running pod matched by a label selector. One
//! Job is created per matched pod, pinned to that pod's node.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::phase::IntentPhase;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetcap.microscaler.io",
    version = "v1alpha1",
    kind = "AdHocCommand",
    namespaced,
    status = "AdHocCommandStatus",
    shortname = "ahc",
    printcolumn = r#"{"name":"Command","type":"string","jsonPath":".spec.command"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AdHocCommandSpec {
    /// Command the agent runs inside each target (e.g. `ps`, `tcpdump`)
    pub command: String,

    /// Argument blob passed to the command as one string
    #[serde(default)]
    pub args: String,

    /// Pods carrying all of these labels are targeted
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,

    /// Namespace the selector is evaluated in
    pub target_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdHocCommandStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: IntentPhase,

    /// Names of the Jobs created so far, append-only
    #[serde(default)]
    pub job_list: Vec<String>,

    /// Last fatal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Generation the recorded phase and error were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
