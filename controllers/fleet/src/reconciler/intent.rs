//! AdHocCommand / ScheduledCommand reconciler
//!
//! Both kinds share one state machine, differing only in the workload kind
//! and in the status list the created unit names go to:
//!
//! ```text
//! Unregistered -> FinalizerPending -> Dispatching -> Observing -> Terminating -> Removed
//! ```
//!
//! The finalizer is registered in a pass of its own; nothing is dispatched
//! before it is visible. Each created unit is recorded in status right away,
//! so a crash mid-fanout resumes from what the cluster already holds.

use std::collections::BTreeMap;
use std::time::Duration;

use cluster_client::{ClusterError, IntentRef};
use crds::{AdHocCommand, FINALIZER, IntentKind, IntentPhase, ScheduledCommand};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use super::Reconciler;
use super::arguments::{CommandIntent, DataSink};
use super::builder::{ExecutionUnit, Workload};
use super::dispatcher::{DispatchRequest, owner_reference};
use crate::error::ControllerError;

/// Requeue after registering the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Common view of the command intent kinds
pub trait FleetIntent: ResourceExt + Send + Sync {
    /// CRD kind
    const KIND: IntentKind;
    /// Status field holding created unit names
    const UNIT_LIST_FIELD: &'static str;

    /// What to run
    fn command_intent(&self) -> CommandIntent;
    /// Pod selector
    fn selector(&self) -> &BTreeMap<String, String>;
    /// Namespace the selector applies to
    fn target_namespace(&self) -> &str;
    /// Cron schedule, for recurring kinds
    fn schedule(&self) -> Option<&str>;
    /// Phase from status
    fn phase(&self) -> Option<IntentPhase>;
    /// Unit names from status
    fn recorded_units(&self) -> Vec<String>;
}

impl FleetIntent for AdHocCommand {
    const KIND: IntentKind = IntentKind::AdHocCommand;
    const UNIT_LIST_FIELD: &'static str = "jobList";

    fn command_intent(&self) -> CommandIntent {
        CommandIntent {
            command: self.spec.command.clone(),
            args: self.spec.args.clone(),
            timer: None,
            sink: None,
        }
    }

    fn selector(&self) -> &BTreeMap<String, String> {
        &self.spec.label_selector
    }

    fn target_namespace(&self) -> &str {
        &self.spec.target_namespace
    }

    fn schedule(&self) -> Option<&str> {
        None
    }

    fn phase(&self) -> Option<IntentPhase> {
        self.status.as_ref().map(|s| s.phase)
    }

    fn recorded_units(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.job_list.clone())
            .unwrap_or_default()
    }
}

impl FleetIntent for ScheduledCommand {
    const KIND: IntentKind = IntentKind::ScheduledCommand;
    const UNIT_LIST_FIELD: &'static str = "cronJobList";

    fn command_intent(&self) -> CommandIntent {
        CommandIntent {
            command: self.spec.command.clone(),
            args: self.spec.args.clone(),
            timer: self.spec.timer.clone().filter(|t| !t.is_empty()),
            sink: self
                .spec
                .data_service_ip
                .as_ref()
                .filter(|ip| !ip.is_empty())
                .map(|ip| DataSink {
                    address: ip.clone(),
                    port: self.spec.data_service_port.clone().filter(|p| !p.is_empty()),
                }),
        }
    }

    fn selector(&self) -> &BTreeMap<String, String> {
        &self.spec.label_selector
    }

    fn target_namespace(&self) -> &str {
        &self.spec.target_namespace
    }

    fn schedule(&self) -> Option<&str> {
        Some(&self.spec.schedule)
    }

    fn phase(&self) -> Option<IntentPhase> {
        self.status.as_ref().map(|s| s.phase)
    }

    fn recorded_units(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.cron_job_list.clone())
            .unwrap_or_default()
    }
}

/// Address of a typed intent
pub(crate) fn intent_ref<K: ResourceExt>(kind: IntentKind, intent: &K) -> Result<IntentRef, ControllerError> {
    let namespace = intent
        .namespace()
        .ok_or_else(|| ControllerError::InvalidSpec(format!("{kind} {} has no namespace", intent.name_any())))?;
    Ok(IntentRef::new(kind, namespace, intent.name_any()))
}

pub(crate) fn has_finalizer<K: ResourceExt>(intent: &K) -> bool {
    intent.finalizers().iter().any(|f| f == FINALIZER)
}

/// Whether the object names the intent with `uid` among its owners
fn owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    !uid.is_empty()
        && meta
            .owner_references
            .iter()
            .flatten()
            .any(|owner| owner.uid == uid)
}

fn owner_description(meta: &ObjectMeta) -> String {
    meta.owner_references
        .iter()
        .flatten()
        .next()
        .map_or_else(|| "no intent".to_string(), |owner| format!("{}/{}", owner.kind, owner.name))
}

impl Reconciler {
    /// Reconcile an AdHocCommand
    pub async fn reconcile_ad_hoc_command(&self, intent: &AdHocCommand) -> Result<Action, ControllerError> {
        self.reconcile_fleet_intent(intent).await
    }

    /// Reconcile a ScheduledCommand
    pub async fn reconcile_scheduled_command(&self, intent: &ScheduledCommand) -> Result<Action, ControllerError> {
        self.reconcile_fleet_intent(intent).await
    }

    async fn reconcile_fleet_intent<I: FleetIntent>(&self, intent: &I) -> Result<Action, ControllerError> {
        let ir = intent_ref(I::KIND, intent)?;
        debug!("Reconciling {}", ir);

        if intent.meta().deletion_timestamp.is_some() {
            if !has_finalizer(intent) {
                debug!("{} is being deleted and holds no finalizer of ours", ir);
                return Ok(Action::await_change());
            }
            return self.terminate_fleet_intent(intent, &ir).await;
        }

        if !has_finalizer(intent) {
            self.add_finalizer(&ir).await?;
            self.set_phase(&ir, IntentPhase::Pending, None).await?;
            info!("Registered finalizer on {}", ir);
            return Ok(Action::requeue(FINALIZER_REQUEUE));
        }

        if intent.phase() == Some(IntentPhase::Active) {
            // Selector is not re-evaluated once units exist
            debug!("{} is active, nothing to do", ir);
            return Ok(Action::await_change());
        }

        let uid = intent
            .uid()
            .ok_or_else(|| ControllerError::InvalidSpec(format!("{ir} has no uid")))?;
        let request = DispatchRequest {
            owner: owner_reference(I::KIND, &ir.name, &uid),
            namespace: &ir.namespace,
            labels: intent.selector(),
            target_namespace: intent.target_namespace(),
            command: intent.command_intent(),
            schedule: intent.schedule(),
        };

        let units = match self.dispatch(&request).await {
            Ok(units) => units,
            Err(e) => {
                if !e.is_retryable() {
                    self.record_failure(&ir, &e, intent.meta().generation).await?;
                }
                return Err(e);
            }
        };

        let mut recorded = intent.recorded_units();
        for unit in &units {
            let created = match self.create_unit(unit, &uid).await {
                Ok(created) => created,
                Err(e @ ControllerError::UnitConflict { .. }) => {
                    warn!("{}: {}", ir, e);
                    self.set_phase(&ir, IntentPhase::Pending, Some(&e.to_string()))
                        .await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            if created {
                self.metrics.record_unit_created(I::KIND);
            }
            let name = unit.name().to_string();
            if !recorded.contains(&name) {
                self.append_status_entry(&ir, I::UNIT_LIST_FIELD, &name)
                    .await?;
                recorded.push(name);
            }
        }

        self.set_phase(&ir, IntentPhase::Active, None).await?;
        info!("{} dispatched {} units", ir, units.len());
        Ok(Action::await_change())
    }

    /// Create one unit; `Ok(false)` when this intent already owns it
    async fn create_unit(&self, unit: &ExecutionUnit, uid: &str) -> Result<bool, ControllerError> {
        let result = match &unit.workload {
            Workload::OneShot(job) => self.cluster.create_job(job).await.map(|_| ()),
            Workload::Recurring(cron_job) => self.cluster.create_cron_job(cron_job).await.map(|_| ()),
        };
        match result {
            Ok(()) => {
                debug!("{} runs {:?}", unit.name(), unit.agent_args());
                info!(
                    "Created {} for pod {}/{} on node {}",
                    unit.name(),
                    unit.target.namespace,
                    unit.target.name,
                    unit.target.node_name.as_deref().unwrap_or_default()
                );
                Ok(true)
            }
            Err(ClusterError::AlreadyExists(_)) => {
                let namespace = unit.metadata().namespace.as_deref().unwrap_or_default();
                let existing = self
                    .stored_unit_metadata(unit.is_recurring(), namespace, unit.name())
                    .await?;
                if !owned_by(&existing, uid) {
                    return Err(ControllerError::UnitConflict {
                        unit: unit.name().to_string(),
                        owner: owner_description(&existing),
                    });
                }
                debug!("{} already exists", unit.name());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of a stored Job, or CronJob when `recurring`
    async fn stored_unit_metadata(&self, recurring: bool, namespace: &str, name: &str) -> Result<ObjectMeta, ClusterError> {
        if recurring {
            Ok(self.cluster.get_cron_job(namespace, name).await?.metadata)
        } else {
            Ok(self.cluster.get_job(namespace, name).await?.metadata)
        }
    }

    async fn terminate_fleet_intent<I: FleetIntent>(&self, intent: &I, ir: &IntentRef) -> Result<Action, ControllerError> {
        info!("Cleaning up {}", ir);
        let uid = intent.uid().unwrap_or_default();
        let recurring = I::KIND == IntentKind::ScheduledCommand;
        for name in intent.recorded_units() {
            match self.stored_unit_metadata(recurring, &ir.namespace, &name).await {
                Ok(meta) if !owned_by(&meta, &uid) => {
                    warn!(
                        "Leaving {}/{} in place, it is owned by {}",
                        ir.namespace,
                        name,
                        owner_description(&meta)
                    );
                    continue;
                }
                Ok(_) => {}
                Err(ClusterError::NotFound(_)) => {
                    debug!("{}/{} already gone", ir.namespace, name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let result = if recurring {
                self.cluster.delete_cron_job(&ir.namespace, &name).await
            } else {
                self.cluster.delete_job(&ir.namespace, &name).await
            };
            match result {
                Ok(()) => debug!("Deleted {}/{}", ir.namespace, name),
                Err(ClusterError::NotFound(_)) => debug!("{}/{} already gone", ir.namespace, name),
                Err(e) => {
                    warn!("Failed to delete {}/{}: {}", ir.namespace, name, e);
                    return Err(e.into());
                }
            }
        }

        self.set_phase(ir, IntentPhase::Terminating, None).await?;
        self.remove_finalizer(ir).await?;
        info!("Released {}", ir);
        Ok(Action::await_change())
    }
}
