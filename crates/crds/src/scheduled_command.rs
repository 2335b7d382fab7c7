//! ScheduledCommand CRD
//!
//! Recurring variant of AdHocCommand: one CronJob per matched pod. Captured
//! data can be streamed to a DataEndpoint via `dataServiceIP`/`dataServicePort`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::phase::IntentPhase;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetcap.microscaler.io",
    version = "v1alpha1",
    kind = "ScheduledCommand",
    namespaced,
    status = "ScheduledCommandStatus",
    shortname = "sc",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCommandSpec {
    /// Command the agent runs inside each target
    pub command: String,

    /// Argument blob passed to the command as one string
    #[serde(default)]
    pub args: String,

    /// Pods carrying all of these labels are targeted
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,

    /// Namespace the selector is evaluated in
    pub target_namespace: String,

    /// Cron expression
    pub schedule: String,

    /// How long each run lasts, passed to the agent as `-t`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<String>,

    /// Address of the capture-data sink
    #[serde(
        rename = "dataServiceIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_service_ip: Option<String>,

    /// Port of the capture-data sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_service_port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCommandStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: IntentPhase,

    /// Names of the CronJobs created so far, append-only
    #[serde(default)]
    pub cron_job_list: Vec<String>,

    /// Last fatal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Generation the recorded phase and error were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
