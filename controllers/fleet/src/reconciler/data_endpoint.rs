//! DataEndpoint reconciler
//!
//! Keeps a one-replica relay sink Deployment and its Service in the intent's
//! namespace, both owned by the intent so deletion cascades. Every pass
//! re-applies both (an existing object is left as is) and refreshes the
//! advertised address in status.

use std::time::Duration;

use cluster_client::{ClusterError, IntentRef};
use crds::{DataEndpoint, IntentKind, IntentPhase};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, SecurityContext,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::Reconciler;
use super::dispatcher::{intent_labels, owner_reference};
use super::intent::{has_finalizer, intent_ref};
use super::status::failure_is_current;
use crate::error::ControllerError;

/// Requeue after registering the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Container and service port name
const PORT_NAME: &str = "grpc";
const CONTAINER_NAME: &str = "data-endpoint";
const DATA_VOLUME: &str = "relay-data";

/// Objects rendered for one DataEndpoint
#[derive(Debug, Clone)]
pub struct RelaySink {
    /// Sink pods
    pub deployment: Deployment,
    /// In-cluster address of the sink
    pub service: Service,
}

fn valid_port(name: &str, port: i32) -> Result<i32, ControllerError> {
    if (1..=65535).contains(&port) {
        Ok(port)
    } else {
        Err(ControllerError::InvalidSpec(format!("{name} {port} is out of range")))
    }
}

/// Render the Deployment and Service for `endpoint`
pub fn render_relay_sink(
    endpoint: &DataEndpoint,
    namespace: &str,
    owner: OwnerReference,
    default_image: &str,
) -> Result<RelaySink, ControllerError> {
    let spec = &endpoint.spec;
    let port = valid_port("port", spec.port)?;
    let service_port = valid_port("servicePort", spec.service_port)?;
    if spec.file_path.is_empty() {
        return Err(ControllerError::InvalidSpec("filePath must not be empty".to_string()));
    }

    let name = endpoint.name_any();
    let service_name = spec
        .service_name
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| name.clone());
    let labels = intent_labels(IntentKind::DataEndpoint, &name);
    let meta = |object_name: &str| ObjectMeta {
        name: Some(object_name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    };

    let image = spec
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .unwrap_or(default_image);

    let deployment = Deployment {
        metadata: meta(&name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(image.to_string()),
                        command: Some(vec!["/server".to_string()]),
                        args: Some(vec![port.to_string(), spec.file_path.clone()]),
                        ports: Some(vec![ContainerPort {
                            name: Some(PORT_NAME.to_string()),
                            container_port: port,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![VolumeMount {
                            name: DATA_VOLUME.to_string(),
                            mount_path: spec.file_path.clone(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: DATA_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };

    let service = Service {
        metadata: meta(&service_name),
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: service_port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };

    Ok(RelaySink { deployment, service })
}

/// `clusterIP:port`, or the service DNS name when no IP is allocated yet
pub fn service_address(service: &Service, port: i32) -> String {
    let cluster_ip = service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None");
    match cluster_ip {
        Some(ip) => format!("{ip}:{port}"),
        None => format!(
            "{}.{}.svc:{port}",
            service.metadata.name.as_deref().unwrap_or_default(),
            service.metadata.namespace.as_deref().unwrap_or_default()
        ),
    }
}

impl Reconciler {
    /// Reconcile a DataEndpoint
    pub async fn reconcile_data_endpoint(&self, endpoint: &DataEndpoint) -> Result<Action, ControllerError> {
        let ir = intent_ref(IntentKind::DataEndpoint, endpoint)?;
        debug!("Reconciling {}", ir);

        if endpoint.meta().deletion_timestamp.is_some() {
            if !has_finalizer(endpoint) {
                return Ok(Action::await_change());
            }
            // Deployment and Service go with their owner
            self.set_phase(&ir, IntentPhase::Terminating, None).await?;
            self.remove_finalizer(&ir).await?;
            info!("Released {}", ir);
            return Ok(Action::await_change());
        }

        if !has_finalizer(endpoint) {
            self.add_finalizer(&ir).await?;
            self.set_phase(&ir, IntentPhase::Pending, None).await?;
            info!("Registered finalizer on {}", ir);
            return Ok(Action::requeue(FINALIZER_REQUEUE));
        }

        let generation = endpoint.meta().generation;
        let status = endpoint.status.clone().unwrap_or_default();
        if status.phase == IntentPhase::Failed && failure_is_current(generation, status.observed_generation) {
            debug!("{} failed for this spec, waiting for a change", ir);
            return Ok(Action::await_change());
        }

        let uid = endpoint
            .uid()
            .ok_or_else(|| ControllerError::InvalidSpec(format!("{ir} has no uid")))?;
        let owner = owner_reference(IntentKind::DataEndpoint, &ir.name, &uid);
        let sink = match render_relay_sink(endpoint, &ir.namespace, owner, &self.config.data_endpoint_image) {
            Ok(sink) => sink,
            Err(e) => {
                self.record_failure(&ir, &e, generation).await?;
                return Err(e);
            }
        };

        self.ensure_relay_sink(&ir, &sink).await?;

        let deployment_name = sink.deployment.name_any();
        let service_name = sink.service.name_any();
        let service = self.cluster.get_service(&ir.namespace, &service_name).await?;
        let address = service_address(&service, endpoint.spec.service_port);

        self.update_status(&ir, |current| {
            let desired = json!({
                "phase": IntentPhase::Active.as_str(),
                "deploymentName": deployment_name,
                "serviceName": service_name,
                "serviceAddress": address,
                "observedGeneration": generation,
            });
            if status_matches(current, &desired) {
                return None;
            }
            let mut patch = desired;
            patch["error"] = Value::Null;
            Some(patch)
        })
        .await?;

        debug!("{} serves at {}", ir, address);
        Ok(Action::await_change())
    }

    async fn ensure_relay_sink(&self, ir: &IntentRef, sink: &RelaySink) -> Result<(), ControllerError> {
        match self.cluster.create_deployment(&sink.deployment).await {
            Ok(_) => info!("Created deployment {}/{} for {}", ir.namespace, sink.deployment.name_any(), ir),
            Err(ClusterError::AlreadyExists(_)) => debug!("Deployment {} already exists", sink.deployment.name_any()),
            Err(e) => return Err(e.into()),
        }
        match self.cluster.create_service(&sink.service).await {
            Ok(_) => info!("Created service {}/{} for {}", ir.namespace, sink.service.name_any(), ir),
            Err(ClusterError::AlreadyExists(_)) => debug!("Service {} already exists", sink.service.name_any()),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

fn status_matches(current: &Value, desired: &Value) -> bool {
    let Some(desired) = desired.as_object() else {
        return false;
    };
    desired
        .iter()
        .all(|(field, value)| current.pointer(&format!("/status/{field}")).unwrap_or(&Value::Null) == value)
        && current
            .pointer("/status/error")
            .is_none_or(Value::is_null)
}
