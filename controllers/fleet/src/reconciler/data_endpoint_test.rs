//! Unit tests for the DataEndpoint reconciler

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Service, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kube::ResourceExt;
    use kube_runtime::controller::Action;
    use serde_json::json;

    use crate::error::ControllerError;
    use crate::reconciler::Reconciler;
    use crate::reconciler::data_endpoint::{render_relay_sink, service_address};
    use crate::reconciler::dispatcher::owner_reference;
    use crate::test_utils::*;

    async fn pass(mock: &MockClusterClient, reconciler: &Reconciler, ir: &IntentRef) -> Result<Action, ControllerError> {
        let stored: DataEndpoint = reload(mock, ir);
        reconciler.reconcile_data_endpoint(&stored).await
    }

    #[tokio::test]
    async fn test_deploys_relay_sink_and_reports_address() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(mock.clone(), MockCaptureBackend::new());
        let ir = mock.add_intent(&data_endpoint("relay", "ops"));

        pass(&mock, &reconciler, &ir).await.unwrap();
        assert!(mock.deployments().is_empty());
        let action = pass(&mock, &reconciler, &ir).await.unwrap();
        assert_eq!(action, Action::await_change());

        let deployments = mock.deployments();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].name_any(), "relay");
        assert_eq!(deployments[0].owner_references()[0].uid, "uid-dataendpoints-relay");

        let services = mock.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name_any(), "relay");
        assert_eq!(services[0].owner_references()[0].kind, "DataEndpoint");

        let status = reload::<DataEndpoint>(&mock, &ir).status.unwrap();
        assert_eq!(status.phase, IntentPhase::Active);
        assert_eq!(status.deployment_name.as_deref(), Some("relay"));
        assert_eq!(status.service_name.as_deref(), Some("relay"));
        assert_eq!(status.service_address.as_deref(), Some("relay.ops.svc:51001"));
    }

    #[tokio::test]
    async fn test_repeated_pass_changes_nothing() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(mock.clone(), MockCaptureBackend::new());
        let ir = mock.add_intent(&data_endpoint("relay", "ops"));
        pass(&mock, &reconciler, &ir).await.unwrap();
        pass(&mock, &reconciler, &ir).await.unwrap();
        let status_writes = mock.call_count("patch_intent_status");

        pass(&mock, &reconciler, &ir).await.unwrap();

        assert_eq!(mock.deployments().len(), 1);
        assert_eq!(mock.services().len(), 1);
        assert_eq!(mock.call_count("patch_intent_status"), status_writes);
    }

    #[tokio::test]
    async fn test_invalid_port_is_recorded() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(mock.clone(), MockCaptureBackend::new());
        let mut endpoint = data_endpoint("relay", "ops");
        endpoint.spec.port = 70000;
        let ir = mock.add_intent(&endpoint);
        pass(&mock, &reconciler, &ir).await.unwrap();

        let err = pass(&mock, &reconciler, &ir).await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidSpec(_)));
        let status = reload::<DataEndpoint>(&mock, &ir).status.unwrap();
        assert_eq!(status.phase, IntentPhase::Failed);
        assert!(status.error.unwrap().contains("70000"));
        assert!(mock.deployments().is_empty());

        let action = pass(&mock, &reconciler, &ir).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(mock.deployments().is_empty());
    }

    #[tokio::test]
    async fn test_corrected_port_recovers() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(mock.clone(), MockCaptureBackend::new());
        let mut endpoint = data_endpoint("relay", "ops");
        endpoint.spec.port = 70000;
        let ir = mock.add_intent(&endpoint);
        pass(&mock, &reconciler, &ir).await.unwrap();
        pass(&mock, &reconciler, &ir).await.unwrap_err();

        mock.edit_intent_spec(&ir, &json!({"port": 51001}));
        pass(&mock, &reconciler, &ir).await.unwrap();

        assert_eq!(mock.deployments().len(), 1);
        let status = reload::<DataEndpoint>(&mock, &ir).status.unwrap();
        assert_eq!(status.phase, IntentPhase::Active);
        assert_eq!(status.error, None);
        assert_eq!(status.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_deletion_releases_finalizer() {
        let mock = MockClusterClient::new();
        let reconciler = test_reconciler(mock.clone(), MockCaptureBackend::new());
        let ir = mock.add_intent(&data_endpoint("relay", "ops"));
        pass(&mock, &reconciler, &ir).await.unwrap();
        pass(&mock, &reconciler, &ir).await.unwrap();

        mock.mark_intent_deleted(&ir);
        pass(&mock, &reconciler, &ir).await.unwrap();

        assert!(mock.intent(&ir).is_none());
    }

    #[test]
    fn test_render_relay_sink() {
        let mut endpoint = data_endpoint("relay", "ops");
        endpoint.spec.service_name = Some("pcap-sink".to_string());
        endpoint.spec.service_port = 9000;
        let owner = owner_reference(IntentKind::DataEndpoint, "relay", "uid-1");

        let sink = render_relay_sink(&endpoint, "ops", owner, "sink:latest").unwrap();

        let spec = sink.deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.as_ref().unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.name, "data-endpoint");
        assert_eq!(container.image.as_deref(), Some("sink:latest"));
        assert_eq!(container.args, Some(vec!["51001".to_string(), "/pcap".to_string()]));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 51001);
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/pcap"
        );
        assert_eq!(spec.selector.match_labels, spec.template.metadata.as_ref().unwrap().labels);

        assert_eq!(sink.service.name_any(), "pcap-sink");
        let port = &sink.service.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 9000);
        assert_eq!(port.target_port, Some(IntOrString::Int(51001)));
    }

    #[test]
    fn test_render_requires_file_path() {
        let mut endpoint = data_endpoint("relay", "ops");
        endpoint.spec.file_path = String::new();
        let owner = owner_reference(IntentKind::DataEndpoint, "relay", "uid-1");
        assert!(matches!(
            render_relay_sink(&endpoint, "ops", owner, "sink:latest"),
            Err(ControllerError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_service_address_prefers_cluster_ip() {
        let mut service = Service {
            metadata: ObjectMeta {
                name: Some("relay".to_string()),
                namespace: Some("ops".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.96.0.50".to_string()),
                ..Default::default()
            }),
            status: None,
        };
        assert_eq!(service_address(&service, 51001), "10.96.0.50:51001");

        service.spec.as_mut().unwrap().cluster_ip = Some("None".to_string());
        assert_eq!(service_address(&service, 51001), "relay.ops.svc:51001");
    }
}
