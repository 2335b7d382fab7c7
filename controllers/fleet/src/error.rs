//! Controller-specific error types.
//!
//! Lower layers return these without deciding what happens next. Only the
//! watcher's error policy turns them into a requeue or a wait, through
//! `ControllerError::is_retryable`.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the FleetCap controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside the cluster abstraction (startup, watch)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster API call failed (transport, permission, conflict exhaustion)
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// The intent being reconciled no longer exists
    #[error("Intent not found: {0}")]
    NotFound(String),

    /// The selector matched no running pods
    #[error("No running pods match selector '{selector}' in namespace {namespace}")]
    EmptyResult {
        /// Rendered label selector
        selector: String,
        /// Namespace the selector was evaluated in
        namespace: String,
    },

    /// Listing pods failed
    #[error("Pod query in namespace {namespace} failed: {source}")]
    UpstreamQuery {
        /// Namespace that was listed
        namespace: String,
        /// Underlying cluster error
        #[source]
        source: ClusterError,
    },

    /// The capture target exists but cannot be entered yet
    #[error("Capture target not ready: {0}")]
    TargetNotReady(String),

    /// A unit with the wanted name exists but belongs to another owner
    #[error("Execution unit {unit} is owned by {owner}")]
    UnitConflict {
        /// Unit name
        unit: String,
        /// Owner of the existing unit
        owner: String,
    },

    /// An execution unit could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// The requested interface does not exist in the target's network namespace
    #[error("Interface {interface} not found in pod {pod}")]
    InterfaceNotFound {
        /// Requested interface
        interface: String,
        /// Target pod
        pod: String,
    },

    /// crictl, nsenter or tcpdump failed
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// Intent spec cannot be acted on
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics or probe server failure
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Intent object did not decode
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControllerError {
    /// Whether the failed pass should be retried with backoff
    ///
    /// Fatal errors are recorded in the intent's status. `Template` is still
    /// requeued at the slowest backoff; the rest wait for a spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Kube(_)
            | ControllerError::Cluster(_)
            | ControllerError::EmptyResult { .. }
            | ControllerError::UpstreamQuery { .. }
            | ControllerError::TargetNotReady(_)
            | ControllerError::Runtime(_)
            | ControllerError::UnitConflict { .. }
            | ControllerError::Watch(_) => true,
            ControllerError::NotFound(_)
            | ControllerError::Template(_)
            | ControllerError::InterfaceNotFound { .. }
            | ControllerError::InvalidSpec(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::Telemetry(_)
            | ControllerError::Serialization(_) => false,
        }
    }

    /// True when the intent itself is gone; the pass counts as a success
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound(_))
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Cluster(_) => "cluster",
            ControllerError::NotFound(_) => "not_found",
            ControllerError::EmptyResult { .. } => "empty_result",
            ControllerError::UpstreamQuery { .. } => "upstream_query",
            ControllerError::TargetNotReady(_) => "target_not_ready",
            ControllerError::UnitConflict { .. } => "unit_conflict",
            ControllerError::Template(_) => "template",
            ControllerError::InterfaceNotFound { .. } => "interface_not_found",
            ControllerError::Runtime(_) => "runtime",
            ControllerError::InvalidSpec(_) => "invalid_spec",
            ControllerError::InvalidConfig(_) => "invalid_config",
            ControllerError::Telemetry(_) => "telemetry",
            ControllerError::Watch(_) => "watch",
            ControllerError::Serialization(_) => "serialization",
        }
    }
}
