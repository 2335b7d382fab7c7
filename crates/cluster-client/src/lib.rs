//! Cluster API Client
//!
//! The subset of the Kubernetes API the FleetCap controllers need, behind a
//! trait so reconcilers can be unit tested against an in-memory cluster.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, IntentRef, KubeClusterClient};
//! use crds::IntentKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default().await?;
//!
//! // Running pods behind a selector
//! let pods = client.list_pods("default", "app=worker").await?;
//!
//! // Raw intent object, for status patches with a resourceVersion precondition
//! let intent = IntentRef::new(IntentKind::AdHocCommand, "default", "ps-all");
//! let object = client.get_intent(&intent).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
