//! Unit tests for execution unit rendering

#[cfg(test)]
mod tests {
    use crate::config::{ConcurrencyPolicy, ControllerConfig};
    use crate::error::ControllerError;
    use crate::reconciler::arguments::{AgentArgs, CommandIntent};
    use crate::reconciler::builder::*;
    use crate::reconciler::selector::TargetInstance;

    fn target(name: &str, node: Option<&str>) -> TargetInstance {
        TargetInstance {
            name: name.to_string(),
            namespace: "ns1".to_string(),
            node_name: node.map(str::to_string),
            container_ids: vec![format!("{name}-ctr")],
        }
    }

    fn args_for(target: &TargetInstance) -> AgentArgs {
        AgentArgs::assemble(&CommandIntent {
            command: "ps".to_string(),
            args: "-ef".to_string(),
            timer: None,
            sink: None,
        })
        .targeting(&target.name, &target.namespace)
    }

    fn builder() -> UnitBuilder {
        UnitBuilder::new(&ControllerConfig::default())
    }

    #[test]
    fn test_one_shot_unit() {
        let target = target("w-1", Some("n1"));
        let unit = builder().build(&args_for(&target), &target, None).unwrap();

        let Workload::OneShot(job) = &unit.workload else {
            panic!("expected a Job");
        };
        assert_eq!(unit.name(), "fleet-job-w-1");
        assert!(!unit.is_recurring());
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(0));

        let pod = unit.pod_spec().unwrap();
        assert_eq!(pod.node_name.as_deref(), Some("n1"));
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("fleetcap-agent"));

        let container = &pod.containers[0];
        assert_eq!(container.name, "podtracer");
        assert_eq!(container.image.as_deref(), Some("ghcr.io/microscaler/podtracer:latest"));
        assert_eq!(container.command, Some(vec!["/usr/bin/podtracer".to_string()]));
        assert_eq!(
            container.security_context.as_ref().and_then(|s| s.privileged),
            Some(true)
        );
        assert_eq!(
            unit.agent_args(),
            vec!["run", "ps", "-a", "-ef", "--pod", "w-1", "-n", "ns1"]
        );

        let volumes: Vec<&str> = pod
            .volumes
            .iter()
            .flatten()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(volumes, vec!["proc", "runtime-sock", "pcap-data"]);

        let socket = pod
            .volumes
            .iter()
            .flatten()
            .find(|v| v.name == "runtime-sock")
            .and_then(|v| v.host_path.as_ref())
            .unwrap();
        assert_eq!(socket.path, "/var/run/crio/crio.sock");
        assert_eq!(socket.type_.as_deref(), Some("Socket"));

        let mounts: Vec<&str> = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(mounts, vec!["/host/proc", "/var/run/crio/crio.sock", "/pcap-data"]);
    }

    #[test]
    fn test_recurring_unit() {
        let target = target("w-2", Some("n2"));
        let unit = builder()
            .build(&args_for(&target), &target, Some("*/5 * * * *"))
            .unwrap();

        let Workload::Recurring(cron_job) = &unit.workload else {
            panic!("expected a CronJob");
        };
        assert_eq!(unit.name(), "fleet-cronjob-w-2");
        assert!(unit.is_recurring());
        let spec = cron_job.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "*/5 * * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Replace"));

        let pod = unit.pod_spec().unwrap();
        assert_eq!(pod.node_name.as_deref(), Some("n2"));
        let kubeconfig = pod
            .volumes
            .iter()
            .flatten()
            .find(|v| v.name == "kubeconfig")
            .and_then(|v| v.secret.as_ref())
            .unwrap();
        assert_eq!(kubeconfig.secret_name.as_deref(), Some("podtracer-kubeconfig"));
        assert!(
            pod.containers[0]
                .volume_mounts
                .iter()
                .flatten()
                .any(|m| m.mount_path == "/root/.kube")
        );
    }

    #[test]
    fn test_concurrency_policy_follows_config() {
        let config = ControllerConfig {
            cron_concurrency_policy: ConcurrencyPolicy::Forbid,
            ..Default::default()
        };
        let target = target("w-1", Some("n1"));
        let unit = UnitBuilder::new(&config)
            .build(&args_for(&target), &target, Some("0 * * * *"))
            .unwrap();
        let Workload::Recurring(cron_job) = &unit.workload else {
            panic!("expected a CronJob");
        };
        assert_eq!(
            cron_job.spec.as_ref().unwrap().concurrency_policy.as_deref(),
            Some("Forbid")
        );
    }

    #[test]
    fn test_missing_node_is_template_error() {
        for node in [None, Some("")] {
            let target = target("w-1", node);
            let err = builder().build(&args_for(&target), &target, None).unwrap_err();
            assert!(matches!(err, ControllerError::Template(_)));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_empty_args_is_template_error() {
        let target = target("w-1", Some("n1"));
        let err = builder()
            .build(&AgentArgs::default(), &target, None)
            .unwrap_err();
        assert!(matches!(err, ControllerError::Template(_)));
    }

    #[test]
    fn test_unit_name_sanitizes() {
        assert_eq!(unit_name(JOB_PREFIX, "W_1", MAX_JOB_NAME), "fleet-job-w-1");
        assert_eq!(unit_name(JOB_PREFIX, "web.0", MAX_JOB_NAME), "fleet-job-web.0");
    }

    #[test]
    fn test_name_hash_is_fnv1a() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_long_unit_names_stay_distinct_and_bounded() {
        let long = "a".repeat(80);
        let first = unit_name(CRON_JOB_PREFIX, &format!("{long}-x"), MAX_CRON_JOB_NAME);
        let second = unit_name(CRON_JOB_PREFIX, &format!("{long}-y"), MAX_CRON_JOB_NAME);

        assert!(first.len() <= MAX_CRON_JOB_NAME);
        assert!(second.len() <= MAX_CRON_JOB_NAME);
        assert!(first.starts_with("fleet-cronjob-aaaa"));
        assert_ne!(first, second);
        assert_eq!(
            unit_name(CRON_JOB_PREFIX, &format!("{long}-x"), MAX_CRON_JOB_NAME),
            first
        );
    }
}
