//! Kubernetes API client
//!
//! Implements `ClusterClientTrait` on top of `kube::Client`. Intents are
//! addressed through `DynamicObject` so status and finalizer patches share one
//! code path for every kind.

use std::fmt::Debug;

use crds::{AdHocCommand, DataEndpoint, IntentKind, PacketCapture, ScheduledCommand};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::IntentRef;

/// Kubernetes API client used by the controllers
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing `kube::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn intent_api(&self, intent: &IntentRef) -> Api<DynamicObject> {
        let resource = match intent.kind {
            IntentKind::AdHocCommand => ApiResource::erase::<AdHocCommand>(&()),
            IntentKind::ScheduledCommand => ApiResource::erase::<ScheduledCommand>(&()),
            IntentKind::PacketCapture => ApiResource::erase::<PacketCapture>(&()),
            IntentKind::DataEndpoint => ApiResource::erase::<DataEndpoint>(&()),
        };
        Api::namespaced_with(self.client.clone(), &intent.namespace, &resource)
    }

    async fn create_namespaced<K>(&self, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let namespace = object.meta().namespace.as_deref().ok_or_else(|| {
            ClusterError::InvalidRequest(format!(
                "{} {:?} has no namespace",
                K::kind(&()),
                object.meta().name
            ))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        debug!(
            "Creating {} {}/{}",
            K::kind(&()),
            namespace,
            object.meta().name.as_deref().unwrap_or_default()
        );
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn delete_namespaced<K>(&self, namespace: &str, name: &str) -> Result<(), ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        debug!("Deleting {} {}/{}", K::kind(&()), namespace, name);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let pods = api.list(&params).await?;
        debug!(
            "Listed {} pods in {} matching '{}'",
            pods.items.len(),
            namespace,
            label_selector
        );
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        self.create_namespaced(job).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete_namespaced::<Job>(namespace, name).await
    }

    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        self.create_namespaced(cron_job).await
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, ClusterError> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete_namespaced::<CronJob>(namespace, name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        self.create_namespaced(deployment).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        self.create_namespaced(service).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_intent(&self, intent: &IntentRef) -> Result<Value, ClusterError> {
        let object = self.intent_api(intent).get(&intent.name).await?;
        Ok(serde_json::to_value(object)?)
    }

    async fn patch_intent(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError> {
        debug!("Patching {}", intent);
        let object = self
            .intent_api(intent)
            .patch(&intent.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(serde_json::to_value(object)?)
    }

    async fn patch_intent_status(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError> {
        debug!("Patching status of {}", intent);
        let object = self
            .intent_api(intent)
            .patch_status(&intent.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(serde_json::to_value(object)?)
    }
}
