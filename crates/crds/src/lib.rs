//! FleetCap CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the FleetCap controller.
//!
//! Every intent kind lives in the `fleetcap.microscaler.io/v1alpha1` API group,
//! is namespaced, and exposes a status subresource written only by the controller.

pub mod ad_hoc_command;
pub mod data_endpoint;
pub mod intent_kind;
pub mod packet_capture;
pub mod phase;
pub mod scheduled_command;

pub use ad_hoc_command::*;
pub use data_endpoint::*;
pub use intent_kind::*;
pub use packet_capture::*;
pub use phase::*;
pub use scheduled_command::*;

/// API group shared by every FleetCap CRD
pub const API_GROUP: &str = "fleetcap.microscaler.io";

/// API version shared by every FleetCap CRD
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer registered on every intent before derived resources are created
pub const FINALIZER: &str = "fleetcap.microscaler.io/finalizer";

/// Label carried by every resource the controller renders, naming the owning intent
pub const INTENT_LABEL: &str = "fleetcap.microscaler.io/intent";

/// Label naming the intent kind that rendered a resource
pub const INTENT_KIND_LABEL: &str = "fleetcap.microscaler.io/intent-kind";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on rendered resources
pub const MANAGED_BY: &str = "fleet-controller";
