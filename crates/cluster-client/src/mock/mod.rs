//! Mock ClusterClient for unit testing
//!
//! In-memory cluster implementing `ClusterClientTrait`. It enforces the API
//! server behaviors the reconcilers depend on: `AlreadyExists` on duplicate
//! creates, `NotFound` on missing objects, resourceVersion preconditions on
//! patches, and removal of a deleted intent once its last finalizer is gone.
//!
//! Failures can be injected per operation with `fail_next`, and every call is
//! recorded so tests can assert on what was (or was not) invoked.

mod helpers;

pub use helpers::{merge_patch, selector_matches};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crds::IntentKind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::{IntentRef, finalizers, resource_version};

type Key = (String, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of<K: Resource>(object: &K) -> Result<Key, ClusterError> {
    let meta = object.meta();
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(ClusterError::InvalidRequest(
            "object needs both namespace and name".to_string(),
        )),
    }
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    pub(crate) pods: Arc<Mutex<Vec<Pod>>>,
    pub(crate) jobs: Arc<Mutex<BTreeMap<Key, Job>>>,
    pub(crate) cron_jobs: Arc<Mutex<BTreeMap<Key, CronJob>>>,
    pub(crate) deployments: Arc<Mutex<BTreeMap<Key, Deployment>>>,
    pub(crate) services: Arc<Mutex<BTreeMap<Key, Service>>>,
    pub(crate) intents: Arc<Mutex<BTreeMap<IntentRef, Value>>>,
    // Queued errors per operation name, popped one per call
    pub(crate) failures: Arc<Mutex<HashMap<String, VecDeque<ClusterError>>>>,
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    pub(crate) next_version: Arc<Mutex<u64>>,
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pod (for test setup). Listing returns pods in insertion order.
    pub fn add_pod(&self, pod: Pod) {
        lock(&self.pods).push(pod);
    }

    /// Remove a pod (for test setup)
    pub fn remove_pod(&self, namespace: &str, name: &str) {
        lock(&self.pods).retain(|p| {
            p.metadata.namespace.as_deref() != Some(namespace) || p.metadata.name.as_deref() != Some(name)
        });
    }

    /// Store a typed intent (for test setup) and return its address
    ///
    /// A resourceVersion and uid are assigned when missing.
    pub fn add_intent<K>(&self, intent: &K) -> IntentRef
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind: IntentKind = K::kind(&())
            .parse()
            .unwrap_or_else(|e| panic!("mock only stores FleetCap intents: {e}"));
        let value = serde_json::to_value(intent)
            .unwrap_or_else(|e| panic!("intent must serialize: {e}"));
        self.insert_intent(kind, value)
    }

    /// Store a raw intent object (for test setup) and return its address
    pub fn insert_intent(&self, kind: IntentKind, mut object: Value) -> IntentRef {
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = self.next_version();
        merge_patch(
            &mut object,
            &json!({"metadata": {"namespace": &namespace, "resourceVersion": version}}),
        );
        if object.pointer("/metadata/generation").is_none() {
            merge_patch(&mut object, &json!({"metadata": {"generation": 1}}));
        }
        if object.pointer("/metadata/uid").is_none() {
            merge_patch(
                &mut object,
                &json!({"metadata": {"uid": format!("uid-{}-{}", kind.plural(), name)}}),
            );
        }
        let intent = IntentRef::new(kind, namespace, name);
        lock(&self.intents).insert(intent.clone(), object);
        intent
    }

    /// Raw stored intent, if it still exists
    pub fn intent(&self, intent: &IntentRef) -> Option<Value> {
        lock(&self.intents).get(intent).cloned()
    }

    /// Stored intent decoded as its typed CRD
    pub fn intent_as<K: DeserializeOwned>(&self, intent: &IntentRef) -> Option<K> {
        self.intent(intent)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Simulate `kubectl delete`: set deletionTimestamp, or remove outright
    /// when no finalizers are present
    pub fn mark_intent_deleted(&self, intent: &IntentRef) {
        let mut intents = lock(&self.intents);
        let Some(object) = intents.get_mut(intent) else {
            return;
        };
        if finalizers(object).is_empty() {
            intents.remove(intent);
            return;
        }
        let version = self.next_version();
        merge_patch(
            object,
            &json!({"metadata": {
                "deletionTimestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                "resourceVersion": version,
            }}),
        );
    }

    /// Simulate a user editing the spec: merge `spec` and bump the generation
    pub fn edit_intent_spec(&self, intent: &IntentRef, spec: &Value) {
        let version = self.next_version();
        if let Some(object) = lock(&self.intents).get_mut(intent) {
            let generation = object
                .pointer("/metadata/generation")
                .and_then(Value::as_i64)
                .unwrap_or(0)
                + 1;
            merge_patch(
                object,
                &json!({
                    "metadata": {"generation": generation, "resourceVersion": version},
                    "spec": spec,
                }),
            );
        }
    }

    /// Simulate a concurrent writer by bumping the stored resourceVersion
    pub fn bump_resource_version(&self, intent: &IntentRef) {
        let version = self.next_version();
        if let Some(object) = lock(&self.intents).get_mut(intent) {
            merge_patch(object, &json!({"metadata": {"resourceVersion": version}}));
        }
    }

    /// Jobs currently stored
    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.jobs).values().cloned().collect()
    }

    /// CronJobs currently stored
    pub fn cron_jobs(&self) -> Vec<CronJob> {
        lock(&self.cron_jobs).values().cloned().collect()
    }

    /// Deployments currently stored
    pub fn deployments(&self) -> Vec<Deployment> {
        lock(&self.deployments).values().cloned().collect()
    }

    /// Services currently stored
    pub fn services(&self) -> Vec<Service> {
        lock(&self.services).values().cloned().collect()
    }

    /// Make the next call to `operation` fail with `error`
    ///
    /// Operation names are the trait method names (e.g. `"create_job"`).
    pub fn fail_next(&self, operation: &str, error: ClusterError) {
        lock(&self.failures)
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Number of times `operation` was called
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == operation).count()
    }

    /// Every call in order
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn next_version(&self) -> String {
        let mut version = lock(&self.next_version);
        *version += 1;
        version.to_string()
    }

    fn record(&self, operation: &str) -> Result<(), ClusterError> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn create_in<K>(store: &Mutex<BTreeMap<Key, K>>, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let key = key_of(object)?;
        let mut store = lock(store);
        if store.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!(
                "{} \"{}\" already exists",
                K::kind(&()),
                key.1
            )));
        }
        store.insert(key, object.clone());
        Ok(object.clone())
    }

    fn get_in<K>(store: &Mutex<BTreeMap<Key, K>>, namespace: &str, name: &str) -> Result<K, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        lock(store)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", K::kind(&()), name)))
    }

    fn delete_in<K>(store: &Mutex<BTreeMap<Key, K>>, namespace: &str, name: &str) -> Result<(), ClusterError>
    where
        K: Resource<DynamicType = ()>,
    {
        lock(store)
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", K::kind(&()), name)))
    }

    /// Apply a merge patch to an intent, honoring the resourceVersion precondition
    fn patch_stored(&self, intent: &IntentRef, patch: &Value, status_only: bool) -> Result<Value, ClusterError> {
        let mut intents = lock(&self.intents);
        let object = intents
            .get_mut(intent)
            .ok_or_else(|| ClusterError::NotFound(format!("{intent} not found")))?;

        if let Some(expected) = resource_version(patch) {
            if resource_version(object) != Some(expected) {
                return Err(ClusterError::Conflict(format!(
                    "the object has been modified; please apply your changes to the latest version ({intent})"
                )));
            }
        }

        let mut effective = patch.clone();
        if let Value::Object(map) = &mut effective {
            if status_only {
                map.retain(|k, _| k == "status");
            } else {
                map.remove("status");
            }
        }
        merge_patch(object, &effective);
        let version = self.next_version();
        merge_patch(object, &json!({"metadata": {"resourceVersion": version}}));

        let result = object.clone();
        let deleting = result.pointer("/metadata/deletionTimestamp").is_some();
        if deleting && finalizers(&result).is_empty() {
            intents.remove(intent);
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.record("list_pods")?;
        Ok(lock(&self.pods)
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.record("get_pod")?;
        lock(&self.pods)
            .iter()
            .find(|p| {
                p.metadata.namespace.as_deref() == Some(namespace)
                    && p.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("pods \"{name}\" not found")))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        self.record("create_job")?;
        Self::create_in(&self.jobs, job)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        self.record("get_job")?;
        Self::get_in(&self.jobs, namespace, name)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_job")?;
        Self::delete_in(&self.jobs, namespace, name)
    }

    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        self.record("create_cron_job")?;
        Self::create_in(&self.cron_jobs, cron_job)
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, ClusterError> {
        self.record("get_cron_job")?;
        Self::get_in(&self.cron_jobs, namespace, name)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_cron_job")?;
        Self::delete_in(&self.cron_jobs, namespace, name)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        self.record("create_deployment")?;
        Self::create_in(&self.deployments, deployment)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        self.record("create_service")?;
        Self::create_in(&self.services, service)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.record("get_service")?;
        lock(&self.services)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("services \"{name}\" not found")))
    }

    async fn get_intent(&self, intent: &IntentRef) -> Result<Value, ClusterError> {
        self.record("get_intent")?;
        self.intent(intent)
            .ok_or_else(|| ClusterError::NotFound(format!("{intent} not found")))
    }

    async fn patch_intent(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError> {
        self.record("patch_intent")?;
        self.patch_stored(intent, patch, false)
    }

    async fn patch_intent_status(&self, intent: &IntentRef, patch: &Value) -> Result<Value, ClusterError> {
        self.record("patch_intent_status")?;
        self.patch_stored(intent, patch, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn job(ns: &str, name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sample_intent(mock: &MockClusterClient) -> IntentRef {
        mock.insert_intent(
            IntentKind::AdHocCommand,
            json!({"metadata": {"name": "ps-all", "namespace": "ops"}, "spec": {}}),
        )
    }

    #[tokio::test]
    async fn test_duplicate_create_is_already_exists() {
        let mock = MockClusterClient::new();
        mock.create_job(&job("ops", "fleet-job-a")).await.unwrap();
        let err = mock.create_job(&job("ops", "fleet-job-a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(mock.jobs().len(), 1);
        assert_eq!(mock.call_count("create_job"), 2);
    }

    #[tokio::test]
    async fn test_get_job_reads_stored_object() {
        let mock = MockClusterClient::new();
        mock.create_job(&job("ops", "fleet-job-a")).await.unwrap();
        assert_eq!(
            mock.get_job("ops", "fleet-job-a").await.unwrap().metadata.name.as_deref(),
            Some("fleet-job-a")
        );
        assert!(mock.get_job("other", "fleet-job-a").await.unwrap_err().is_not_found());
        assert!(mock.get_cron_job("ops", "fleet-job-a").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_spec_edit_bumps_generation() {
        let mock = MockClusterClient::new();
        let intent = sample_intent(&mock);
        assert_eq!(
            mock.intent(&intent).unwrap().pointer("/metadata/generation"),
            Some(&json!(1))
        );

        mock.edit_intent_spec(&intent, &json!({"command": "ss"}));

        let stored = mock.intent(&intent).unwrap();
        assert_eq!(stored.pointer("/metadata/generation"), Some(&json!(2)));
        assert_eq!(stored.pointer("/spec/command"), Some(&json!("ss")));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let mock = MockClusterClient::new();
        let err = mock.delete_cron_job("ops", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let mock = MockClusterClient::new();
        let intent = sample_intent(&mock);
        let current = mock.get_intent(&intent).await.unwrap();
        let rv = resource_version(&current).unwrap().to_string();

        mock.bump_resource_version(&intent);
        let err = mock
            .patch_intent_status(
                &intent,
                &json!({"metadata": {"resourceVersion": rv}, "status": {"phase": "Active"}}),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_status_patch_only_touches_status() {
        let mock = MockClusterClient::new();
        let intent = sample_intent(&mock);
        let updated = mock
            .patch_intent_status(
                &intent,
                &json!({"metadata": {"finalizers": ["x"]}, "status": {"phase": "Pending"}}),
            )
            .await
            .unwrap();
        assert_eq!(updated["status"]["phase"], "Pending");
        assert!(finalizers(&updated).is_empty());
    }

    #[tokio::test]
    async fn test_removing_last_finalizer_of_deleted_intent_removes_it() {
        let mock = MockClusterClient::new();
        let intent = sample_intent(&mock);
        mock.patch_intent(&intent, &json!({"metadata": {"finalizers": ["f"]}}))
            .await
            .unwrap();
        mock.mark_intent_deleted(&intent);
        assert!(mock.intent(&intent).is_some());

        mock.patch_intent(&intent, &json!({"metadata": {"finalizers": []}}))
            .await
            .unwrap();
        assert!(mock.intent(&intent).is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockClusterClient::new();
        mock.fail_next(
            "list_pods",
            ClusterError::Api {
                code: 500,
                message: "etcd unavailable".to_string(),
            },
        );
        assert!(mock.list_pods("ops", "").await.is_err());
        assert!(mock.list_pods("ops", "").await.unwrap().is_empty());
    }
}
