//! ClusterClient trait for mocking
//!
//! Abstracts the handful of Kubernetes API calls the FleetCap reconcilers make,
//! so unit tests can run against an in-memory cluster.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, Service};
use serde_json::Value;

use crate::error::ClusterError;
use crate::models::IntentRef;

/// Trait for Kubernetes API operations used by the controllers
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Namespaced objects passed to `create_*` must carry `metadata.namespace`.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Pods
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;

    // Execution units
    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError>;
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob, ClusterError>;
    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, ClusterError>;
    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // Relay sink
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;
    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    // Intents, as raw JSON so one code path serves every kind
    async fn get_intent(&self, intent: &IntentRef) -> Result<Value, ClusterError>;

    /// JSON merge patch of the main resource (metadata only in practice)
    async fn patch_intent(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError>;

    /// JSON merge patch of the status subresource
    async fn patch_intent_status(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError>;
}
