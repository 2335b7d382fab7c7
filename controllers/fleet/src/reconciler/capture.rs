//! PacketCapture reconciler
//!
//! A capture is two passes over the same object rather than one long wait:
//!
//! 1. start (no `startTime`): resolve the target container, enter its network
//!    namespace, check the interface, spawn tcpdump and persist `startTime`,
//!    `deadline` and `pcapFilePath`, then requeue at the deadline.
//! 2. stop (`startTime` set, deadline reached): stop the process and persist
//!    `endTime` with phase `Completed`.
//!
//! `startTime` is the guard against entering the namespace twice. A pass that
//! still sees no `startTime` while this controller holds a session for the
//! intent waits for the cache instead, and the start is only persisted when
//! the stored object has no `startTime` yet. Once `endTime` is set, or the
//! capture failed for the current spec generation, further passes do nothing.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use cluster_client::{ClusterError, IntentRef};
use crds::{IntentKind, IntentPhase, PacketCapture, PacketCaptureStatus};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use tracing::{debug, info, warn};

use super::Reconciler;
use super::intent::{has_finalizer, intent_ref};
use super::selector::TargetInstance;
use super::status::failure_is_current;
use crate::error::ControllerError;
use crate::relay::{artifact_path, relay_object_name};
use crate::runtime::{CaptureCommand, CaptureProcess};

/// Requeue after registering the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Shortest requeue while waiting for a deadline
const MIN_STOP_REQUEUE: Duration = Duration::from_secs(1);

/// A running capture owned by one PacketCapture
#[derive(Debug)]
pub struct CaptureSession {
    /// The tcpdump process
    pub(crate) process: Box<dyn CaptureProcess>,
    /// Target pod
    pub pod: String,
    /// Artifact being written
    pub pcap_file_path: String,
    /// When the capture is due to stop
    pub deadline: DateTime<Utc>,
}

fn validate(capture: &PacketCapture, default_duration: Duration) -> Result<Duration, ControllerError> {
    let spec = &capture.spec;
    if spec.pod_name.trim().is_empty() {
        return Err(ControllerError::InvalidSpec("podName must not be empty".to_string()));
    }
    if spec.if_name.trim().is_empty() {
        return Err(ControllerError::InvalidSpec("ifName must not be empty".to_string()));
    }
    match spec.duration {
        Some(0) => Err(ControllerError::InvalidSpec("duration must be positive".to_string())),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default_duration),
    }
}

/// Time left until `deadline`, never shorter than `MIN_STOP_REQUEUE`
fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or_default().max(MIN_STOP_REQUEUE)
}

impl Reconciler {
    /// Reconcile a PacketCapture
    pub async fn reconcile_packet_capture(&self, capture: &PacketCapture) -> Result<Action, ControllerError> {
        let ir = intent_ref(IntentKind::PacketCapture, capture)?;
        debug!("Reconciling {}", ir);

        if capture.meta().deletion_timestamp.is_some() {
            if !has_finalizer(capture) {
                return Ok(Action::await_change());
            }
            return self.terminate_capture(capture, &ir).await;
        }

        if !has_finalizer(capture) {
            self.add_finalizer(&ir).await?;
            self.set_phase(&ir, IntentPhase::Pending, None).await?;
            info!("Registered finalizer on {}", ir);
            return Ok(Action::requeue(FINALIZER_REQUEUE));
        }

        let status = capture.status.clone().unwrap_or_default();
        if status.end_time.is_some() {
            debug!("{} is finished ({}), nothing to do", ir, status.phase);
            return Ok(Action::await_change());
        }
        if status.phase == IntentPhase::Failed
            && failure_is_current(capture.meta().generation, status.observed_generation)
        {
            debug!("{} failed for this spec, waiting for a change", ir);
            return Ok(Action::await_change());
        }

        match status.start_time {
            None => self.start_capture(capture, &ir).await,
            Some(start_time) => self.stop_capture_if_due(capture, &ir, &status, start_time).await,
        }
    }

    async fn start_capture(&self, capture: &PacketCapture, ir: &IntentRef) -> Result<Action, ControllerError> {
        let running_until = self.sessions.lock().await.get(ir).map(|s| s.deadline);
        if let Some(deadline) = running_until {
            debug!("{} is already capturing, its start is not visible yet", ir);
            return Ok(Action::requeue(remaining_until(deadline, Utc::now())));
        }

        let generation = capture.meta().generation;
        let duration = match validate(capture, self.config.capture_default_duration) {
            Ok(duration) => duration,
            Err(e) => {
                self.record_failure(ir, &e, generation).await?;
                return Err(e);
            }
        };
        let spec = &capture.spec;
        let namespace = spec
            .target_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&ir.namespace);

        let pod = match self.cluster.get_pod(namespace, &spec.pod_name).await {
            Ok(pod) => pod,
            Err(ClusterError::NotFound(_)) => {
                return Err(ControllerError::TargetNotReady(format!(
                    "pod {namespace}/{} does not exist",
                    spec.pod_name
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let target = TargetInstance::from_pod(&pod).ok_or_else(|| {
            ControllerError::TargetNotReady(format!("pod {namespace}/{} is not running", spec.pod_name))
        })?;
        let container_id = target.container_ids.first().ok_or_else(|| {
            ControllerError::TargetNotReady(format!("pod {namespace}/{} has no started container", spec.pod_name))
        })?;

        let pid = self.capture_backend.container_pid(container_id).await?;
        if !self
            .capture_backend
            .interface_exists(pid, &spec.if_name)
            .await?
        {
            let err = ControllerError::InterfaceNotFound {
                interface: spec.if_name.clone(),
                pod: spec.pod_name.clone(),
            };
            self.record_failure(ir, &err, generation).await?;
            return Err(err);
        }

        let start_time = Utc::now().trunc_subsecs(0);
        let deadline = start_time
            + chrono::Duration::from_std(duration)
                .map_err(|e| ControllerError::InvalidSpec(format!("duration: {e}")))?;
        let dir = spec
            .pcap_file_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.config.capture_output_dir);
        let path = artifact_path(dir, &spec.pod_name, start_time);

        let command = CaptureCommand {
            interface: spec.if_name.clone(),
            output_path: path.clone(),
            packet_count: spec.packet_count,
            file_size: spec.file_size,
        };
        let mut process = self.capture_backend.spawn_capture(pid, &command).await?;

        let persisted = self
            .update_status(ir, |current| {
                if current.pointer("/status/startTime").is_some_and(|v| !v.is_null()) {
                    return None;
                }
                Some(json!({
                    "phase": IntentPhase::Active.as_str(),
                    "startTime": start_time,
                    "deadline": deadline,
                    "pcapFilePath": path,
                    "error": null,
                    "observedGeneration": generation,
                }))
            })
            .await;
        match persisted {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("{} was already started, discarding duplicate capture {}", ir, path);
                if let Err(e) = process.stop().await {
                    warn!("Failed to stop duplicate capture for {}: {}", ir, e);
                }
                return Ok(Action::requeue(MIN_STOP_REQUEUE));
            }
            Err(e) => {
                warn!("Could not record start of {}, stopping capture: {}", ir, e);
                if let Err(stop_err) = process.stop().await {
                    warn!("Failed to stop orphaned capture for {}: {}", ir, stop_err);
                }
                return Err(e);
            }
        }

        let capture_pid = process.id();
        self.sessions.lock().await.insert(
            ir.clone(),
            CaptureSession {
                process,
                pod: spec.pod_name.clone(),
                pcap_file_path: path.clone(),
                deadline,
            },
        );
        self.metrics.capture_started();
        info!(
            "Started capture {} on {}/{} {} until {} -> {} (pid {:?})",
            ir, namespace, spec.pod_name, spec.if_name, deadline, path, capture_pid
        );
        Ok(Action::requeue(duration))
    }

    async fn stop_capture_if_due(
        &self,
        capture: &PacketCapture,
        ir: &IntentRef,
        status: &PacketCaptureStatus,
        start_time: DateTime<Utc>,
    ) -> Result<Action, ControllerError> {
        let deadline = match status.deadline {
            Some(deadline) => deadline,
            None => {
                let duration = capture
                    .spec
                    .duration
                    .map_or(self.config.capture_default_duration, Duration::from_secs);
                start_time + chrono::Duration::from_std(duration).unwrap_or_default()
            }
        };

        let now = Utc::now();
        if now < deadline {
            let remaining = remaining_until(deadline, now);
            debug!("{} captures for another {:?}", ir, remaining);
            return Ok(Action::requeue(remaining));
        }

        self.stop_session(ir).await;

        let end_time = now.trunc_subsecs(0);
        self.update_status(ir, |_| {
            Some(json!({
                "phase": IntentPhase::Completed.as_str(),
                "endTime": end_time,
                "error": null,
            }))
        })
        .await?;

        let artifact = status.pcap_file_path.as_deref().unwrap_or_default();
        info!(
            "Capture {} complete: {} (relay object {})",
            ir,
            artifact,
            relay_object_name(&capture.spec.pod_name, artifact)
        );
        Ok(Action::await_change())
    }

    /// Stop and forget the session for `ir`; true when one was running
    async fn stop_session(&self, ir: &IntentRef) -> bool {
        let session = self.sessions.lock().await.remove(ir);
        let Some(mut session) = session else {
            debug!("No running capture for {}", ir);
            return false;
        };
        if let Err(e) = session.process.stop().await {
            warn!("Failed to stop capture {} ({}): {}", ir, session.pcap_file_path, e);
        }
        self.metrics.capture_stopped();
        debug!(
            "Stopped capture {} on {} (due {}), {} still running",
            ir,
            session.pod,
            session.deadline,
            self.metrics.active_captures()
        );
        true
    }

    async fn terminate_capture(&self, capture: &PacketCapture, ir: &IntentRef) -> Result<Action, ControllerError> {
        if self.stop_session(ir).await {
            info!("Cancelled running capture {}", ir);
        }

        let started = capture.status.as_ref().is_some_and(|s| s.start_time.is_some() && s.end_time.is_none());
        if started {
            let end_time = Utc::now().trunc_subsecs(0);
            self.update_status(ir, |_| Some(json!({ "endTime": end_time })))
                .await?;
        }

        self.set_phase(ir, IntentPhase::Terminating, None).await?;
        self.remove_finalizer(ir).await?;
        info!("Released {}", capture.name_any());
        Ok(Action::await_change())
    }
}
