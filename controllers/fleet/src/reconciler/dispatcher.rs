//! Fleet dispatch
//!
//! Select, assemble once, then build one unit per instance with the owning
//! intent recorded as controller owner reference. Creating the units is the
//! caller's job; dispatching twice yields the same names.

use std::collections::BTreeMap;

use crds::{INTENT_KIND_LABEL, INTENT_LABEL, IntentKind, MANAGED_BY, MANAGED_BY_LABEL};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use super::Reconciler;
use super::arguments::{AgentArgs, CommandIntent};
use super::builder::ExecutionUnit;
use crate::error::ControllerError;

/// Everything needed to fan an intent out
#[derive(Debug, Clone)]
pub struct DispatchRequest<'a> {
    /// Back-reference to the owning intent
    pub owner: OwnerReference,
    /// Namespace the units are created in (the intent's own)
    pub namespace: &'a str,
    /// Pod label selector
    pub labels: &'a BTreeMap<String, String>,
    /// Namespace the selector is evaluated in
    pub target_namespace: &'a str,
    /// What to run
    pub command: CommandIntent,
    /// Cron schedule for recurring units
    pub schedule: Option<&'a str>,
}

/// Controller owner reference for an intent
pub fn owner_reference(kind: IntentKind, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: kind.api_version(),
        kind: kind.kind().to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels stamped on every unit an intent owns
pub fn intent_labels(kind: IntentKind, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INTENT_LABEL.to_string(), name.to_string()),
        (INTENT_KIND_LABEL.to_string(), kind.kind().to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

impl Reconciler {
    /// Render one execution unit per selected instance, in selector order
    pub async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Vec<ExecutionUnit>, ControllerError> {
        let instances = self
            .select_instances(request.labels, request.target_namespace)
            .await?;

        let base = AgentArgs::assemble(&request.command);
        let kind: IntentKind = request
            .owner
            .kind
            .parse()
            .map_err(|e| ControllerError::Template(format!("owner reference: {e}")))?;
        let labels = intent_labels(kind, &request.owner.name);

        let mut units = Vec::with_capacity(instances.len());
        for instance in &instances {
            let args = base.targeting(&instance.name, &instance.namespace);
            let mut unit = self.unit_builder.build(&args, instance, request.schedule)?;

            let meta = unit.metadata_mut();
            meta.namespace = Some(request.namespace.to_string());
            meta.labels = Some(labels.clone());
            meta.owner_references = Some(vec![request.owner.clone()]);
            units.push(unit);
        }
        Ok(units)
    }
}
