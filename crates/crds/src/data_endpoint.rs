//! DataEndpoint CRD
//!
//! Deploys the capture-data relay sink that agents stream captured bytes to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::phase::IntentPhase;

/// Port the relay sink listens on unless told otherwise
pub const DEFAULT_RELAY_PORT: i32 = 51001;

fn default_port() -> i32 {
    DEFAULT_RELAY_PORT
}

fn default_file_path() -> String {
    "/pcap".to_string()
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetcap.microscaler.io",
    version = "v1alpha1",
    kind = "DataEndpoint",
    namespaced,
    status = "DataEndpointStatus",
    shortname = "de",
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.serviceAddress"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataEndpointSpec {
    /// Container port the sink listens on
    #[serde(default = "default_port")]
    pub port: i32,

    /// Service name (defaults to the intent's name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Service port exposed in-cluster
    #[serde(default = "default_port")]
    pub service_port: i32,

    /// Directory the sink writes received data to
    #[serde(default = "default_file_path")]
    pub file_path: String,

    /// Sink image (defaults to the controller's configured image)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataEndpointStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: IntentPhase,

    /// Name of the sink Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Name of the sink Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// `host:port` agents should stream to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,

    /// Last fatal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Generation the recorded phase and error were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
