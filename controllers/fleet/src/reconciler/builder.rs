//! Execution unit rendering
//!
//! Turns assembled agent arguments plus one target into a Job, or into a
//! CronJob when a schedule is given. The pod runs the privileged agent on the
//! target's node with the host mounts it needs to find and enter the target:
//!
//! | volume      | source                         | mount          |
//! |-------------|--------------------------------|----------------|
//! | proc        | hostPath `/proc` (Directory)   | `/host/proc`   |
//! | runtime-sock| hostPath socket (Socket)       | same path      |
//! | pcap-data   | emptyDir                       | `/pcap-data`   |
//! | kubeconfig  | secret (recurring units only)  | `/root/.kube`  |

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, HostPathVolumeSource, PodSpec, PodTemplateSpec,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::arguments::AgentArgs;
use super::selector::TargetInstance;
use crate::config::{ConcurrencyPolicy, ControllerConfig};
use crate::error::ControllerError;

/// Name prefix of one-shot units
pub const JOB_PREFIX: &str = "fleet-job";
/// Name prefix of recurring units
pub const CRON_JOB_PREFIX: &str = "fleet-cronjob";

/// Longest Job name that still fits the `job-name` label
pub const MAX_JOB_NAME: usize = 63;
/// Longest CronJob name; the controller appends 11 characters to spawned Jobs
pub const MAX_CRON_JOB_NAME: usize = 52;

const PROC_VOLUME: &str = "proc";
const SOCKET_VOLUME: &str = "runtime-sock";
const PCAP_VOLUME: &str = "pcap-data";
const KUBECONFIG_VOLUME: &str = "kubeconfig";

/// Rendered workload
#[derive(Debug, Clone)]
pub enum Workload {
    /// Runs once
    OneShot(Job),
    /// Runs on a schedule
    Recurring(CronJob),
}

/// One rendered unit bound to one target
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    /// The instance this unit acts on
    pub target: TargetInstance,
    /// The Job or CronJob
    pub workload: Workload,
}

impl ExecutionUnit {
    /// Object name of the workload
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// True for CronJob units
    pub fn is_recurring(&self) -> bool {
        matches!(self.workload, Workload::Recurring(_))
    }

    /// Workload metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match &self.workload {
            Workload::OneShot(job) => &job.metadata,
            Workload::Recurring(cron_job) => &cron_job.metadata,
        }
    }

    /// Mutable workload metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match &mut self.workload {
            Workload::OneShot(job) => &mut job.metadata,
            Workload::Recurring(cron_job) => &mut cron_job.metadata,
        }
    }

    /// Pod spec the workload will run
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        let job_spec = match &self.workload {
            Workload::OneShot(job) => job.spec.as_ref(),
            Workload::Recurring(cron_job) => cron_job
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref()),
        };
        job_spec.and_then(|s| s.template.spec.as_ref())
    }

    /// Agent arguments of the first container
    pub fn agent_args(&self) -> Vec<String> {
        self.pod_spec()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.args.clone())
            .unwrap_or_default()
    }
}

/// Renders execution units from controller configuration
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    image: String,
    binary: String,
    entrypoint: String,
    service_account: String,
    runtime_socket: String,
    kubeconfig_secret: String,
    concurrency_policy: ConcurrencyPolicy,
}

impl UnitBuilder {
    /// Builder using the configured image, socket and policy
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            image: config.agent_image.clone(),
            binary: config.agent_binary.clone(),
            entrypoint: config.agent_entrypoint(),
            service_account: config.agent_service_account.clone(),
            runtime_socket: config.runtime_socket.clone(),
            kubeconfig_secret: config.kubeconfig_secret.clone(),
            concurrency_policy: config.cron_concurrency_policy,
        }
    }

    /// Render one unit for `target`
    ///
    /// `args` must already carry the targeting flags. The unit's namespace and
    /// owner are left for the dispatcher to fill in.
    pub fn build(
        &self,
        args: &AgentArgs,
        target: &TargetInstance,
        schedule: Option<&str>,
    ) -> Result<ExecutionUnit, ControllerError> {
        if target.name.is_empty() {
            return Err(ControllerError::Template("target instance has no name".to_string()));
        }
        let node_name = target
            .node_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ControllerError::Template(format!("pod {} has no node assigned", target.name))
            })?;
        if args.is_empty() {
            return Err(ControllerError::Template(format!(
                "no agent arguments for pod {}",
                target.name
            )));
        }

        let recurring = schedule.is_some();
        let job_spec = JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(self.pod_spec(args, node_name, recurring)),
            },
            ..Default::default()
        };

        let workload = match schedule {
            None => Workload::OneShot(Job {
                metadata: ObjectMeta {
                    name: Some(unit_name(JOB_PREFIX, &target.name, MAX_JOB_NAME)),
                    ..Default::default()
                },
                spec: Some(job_spec),
                status: None,
            }),
            Some(schedule) => Workload::Recurring(CronJob {
                metadata: ObjectMeta {
                    name: Some(unit_name(CRON_JOB_PREFIX, &target.name, MAX_CRON_JOB_NAME)),
                    ..Default::default()
                },
                spec: Some(CronJobSpec {
                    schedule: schedule.to_string(),
                    concurrency_policy: Some(self.concurrency_policy.as_str().to_string()),
                    job_template: JobTemplateSpec {
                        metadata: None,
                        spec: Some(job_spec),
                    },
                    ..Default::default()
                }),
                status: None,
            }),
        };

        Ok(ExecutionUnit {
            target: target.clone(),
            workload,
        })
    }

    fn pod_spec(&self, args: &AgentArgs, node_name: &str, recurring: bool) -> PodSpec {
        let mut volumes = vec![
            host_path_volume(PROC_VOLUME, "/proc", "Directory"),
            host_path_volume(SOCKET_VOLUME, &self.runtime_socket, "Socket"),
            Volume {
                name: PCAP_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        ];
        let mut mounts = vec![
            mount(PROC_VOLUME, "/host/proc"),
            mount(SOCKET_VOLUME, &self.runtime_socket),
            mount(PCAP_VOLUME, "/pcap-data"),
        ];

        // Recurring runs query the API server for their target again
        if recurring {
            volumes.push(Volume {
                name: KUBECONFIG_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(self.kubeconfig_secret.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(mount(KUBECONFIG_VOLUME, "/root/.kube"));
        }

        PodSpec {
            node_name: Some(node_name.to_string()),
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(self.service_account.clone()),
            containers: vec![Container {
                name: self.binary.clone(),
                image: Some(self.image.clone()),
                command: Some(vec![self.entrypoint.clone()]),
                args: Some(args.to_args()),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }
    }
}

fn host_path_volume(name: &str, path: &str, kind: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some(kind.to_string()),
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// `<prefix>-<instance>` as a valid object name no longer than `max_len`
///
/// Invalid characters become `-`. Names over the limit keep a readable head
/// and end in an 8-digit hash of the full name, so distinct instances keep
/// distinct unit names.
pub fn unit_name(prefix: &str, instance: &str, max_len: usize) -> String {
    let raw = format!("{prefix}-{instance}");
    let sanitized: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches(|c| c == '-' || c == '.').to_string();

    if sanitized.len() <= max_len {
        return sanitized;
    }

    let suffix = format!("{:08x}", fnv1a(raw.as_bytes()));
    let head_len = max_len.saturating_sub(suffix.len() + 1);
    let head = sanitized[..head_len].trim_end_matches(|c| c == '-' || c == '.');
    format!("{head}-{suffix}")
}

/// 32-bit FNV-1a; stable across releases, unlike std's `DefaultHasher`
pub(crate) fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}
