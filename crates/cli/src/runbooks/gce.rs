//! Compute Engine runbooks.

use std::sync::Arc;

use gcpdiag_engine::{
    DiagnosticTree, Operator, ParameterSpecs, Parameters, Step, TreeBuilder,
    messages::{SKIPPED_REASON, UNCERTAIN_REASON, UNCERTAIN_REMEDIATION},
    steps::{EndStep, HumanTask, ResourceAttributeCheck, resource_ref_of},
};
use gcpdiag_types::{ParameterSpec, ParameterType, StepKind};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::snapshot::ResourceSnapshot;

pub const VM_RUNNING: &str = "gce::vm_running";
pub const VM_STATUS: &str = "gce::vm_status";

pub const MESSAGES: &str = r#"
gce::vm_running:
  step_name: Verify that the VM is running
  success_reason: The instance {instance_name} is {actual}.
  failure_reason: The instance {instance_name} is {actual}; it is expected to be {expected}.
  failure_remediation: >-
    Start the instance with
    `gcloud compute instances start {instance_name} --zone {zone} --project {project_id}`
    and retest.
gce::vm_status:
  step_name: Check the VM lifecycle state
  uncertain_reason: The instance {instance_name} is in the transitional state {status}.
  uncertain_remediation: Wait for the pending operation on the instance to finish, then retest.
  skipped_reason: "The instance could not be inspected: {error}"
"#;

/// Diagnoses why a Compute Engine VM is not running.
pub struct VmRunningState {
    snapshot: Arc<ResourceSnapshot>,
}

impl VmRunningState {
    pub fn new(snapshot: Arc<ResourceSnapshot>) -> Self {
        Self { snapshot }
    }
}

impl DiagnosticTree for VmRunningState {
    fn build_tree(&self, builder: &mut TreeBuilder) -> anyhow::Result<()> {
        let start = builder.add_start(ResolveInstance {
            snapshot: Arc::clone(&self.snapshot),
        })?;
        builder.add_step(
            start,
            VmStatusGateway {
                snapshot: Arc::clone(&self.snapshot),
            },
        )?;
        builder.add_end(EndStep)?;
        Ok(())
    }

    fn description(&self) -> String {
        "Diagnoses why a Compute Engine VM is not running.\n\n\
         Resolves the instance from its name or id, reads its lifecycle state, \
         and checks that it is RUNNING. A stopped instance gets a manual start task."
            .into()
    }

    fn parameters(&self) -> ParameterSpecs {
        let mut specs = ParameterSpecs::new();
        specs.insert(
            "project_id".into(),
            ParameterSpec::new(ParameterType::String, "Project hosting the instance").required(),
        );
        specs.insert(
            "zone".into(),
            ParameterSpec::new(ParameterType::String, "Zone of the instance; required with instance_name").ignorecase(),
        );
        specs.insert("instance_name".into(), ParameterSpec::new(ParameterType::String, "Name of the instance"));
        specs.insert("instance_id".into(), ParameterSpec::new(ParameterType::String, "Numeric id of the instance"));
        specs.insert(
            "name".into(),
            ParameterSpec::new(ParameterType::String, "Name of the instance").deprecated_for("instance_name"),
        );
        specs
    }

    fn keywords(&self) -> Vec<String> {
        ["gce", "vm", "instance", "status"].map(String::from).to_vec()
    }

    /// Accepts zones given as `projects/p/zones/z` paths.
    fn legacy_parameter_handler(&self, parameters: &mut Parameters) {
        if let Some(Value::String(zone)) = parameters.get_mut("zone")
            && let Some((_, name)) = zone.rsplit_once('/')
        {
            *zone = name.to_string();
        }
    }
}

/// Finds the instance and publishes its name, zone, and id for later steps.
struct ResolveInstance {
    snapshot: Arc<ResourceSnapshot>,
}

impl Step for ResolveInstance {
    fn kind(&self) -> StepKind {
        StepKind::Start
    }

    fn label(&self) -> Option<String> {
        Some("Resolve the instance".into())
    }

    fn execute(&self, op: &Operator) -> anyhow::Result<()> {
        let project = op.project_resource();
        let project_id = op.context().project_id.clone();
        let lookup = match (op.get_str("instance_name"), op.get_str("instance_id")) {
            (Some(name), _) => match op.get_str("zone") {
                Some(zone) => self.snapshot.instance(&project_id, &zone, &name),
                None => {
                    op.add_skipped(&project, "instance_name was given without a zone; pass -p zone=<zone>.")?;
                    return Ok(());
                }
            },
            (None, Some(id)) => self.snapshot.instance_by_id(&project_id, &id),
            (None, None) => {
                op.add_skipped(&project, "Neither instance_name nor instance_id was given.")?;
                return Ok(());
            }
        };

        match lookup {
            Ok(instance) => {
                let name = instance.get("name").and_then(Value::as_str).unwrap_or_default();
                let zone = instance
                    .get("zone")
                    .and_then(Value::as_str)
                    .map(|zone| zone.rsplit('/').next().unwrap_or(zone));
                if !op.context().matches_resource(zone, &labels_of(&instance), name) {
                    let subject = resource_ref_of(&instance).unwrap_or(project);
                    op.add_skipped(
                        &subject,
                        format!(
                            "The instance {name} in {} is outside the requested locations or labels.",
                            zone.unwrap_or("an unknown zone")
                        ),
                    )?;
                    return Ok(());
                }
                if !name.is_empty() {
                    op.put("instance_name", name);
                }
                if let Some(zone) = zone {
                    op.put("zone", zone);
                }
                if let Some(id) = instance.get("id") {
                    op.put("instance_id", id.clone());
                }
                op.put("instance_resolved", true);
            }
            Err(error) if error.is_not_found() => {
                op.add_skipped(&project, format!("The instance does not exist: {}", error.message))?;
            }
            Err(error) => {
                op.add_uncertain(
                    &project,
                    format!("The instance could not be looked up: {error}"),
                    "Check that the Compute Engine API is enabled and that you can read instances in the project.",
                )?;
            }
        }
        Ok(())
    }
}

/// Chooses the checks that fit the instance's lifecycle state.
struct VmStatusGateway {
    snapshot: Arc<ResourceSnapshot>,
}

impl Step for VmStatusGateway {
    fn kind(&self) -> StepKind {
        StepKind::Gateway
    }

    fn template(&self) -> Option<&str> {
        Some(VM_STATUS)
    }

    fn execute(&self, op: &Operator) -> anyhow::Result<()> {
        if op.get_bool("instance_resolved") != Some(true) {
            debug!("instance was not resolved; no checks to run");
            return Ok(());
        }
        let zone = op.get_str("zone").unwrap_or_default();
        let name = op.get_str("instance_name").unwrap_or_default();

        let instance = match self.snapshot.instance(&op.context().project_id, &zone, &name) {
            Ok(instance) => instance,
            Err(error) => {
                let error = error.to_string();
                let reason = op
                    .prep_msg(SKIPPED_REASON, &[("error", error.as_str())])
                    .unwrap_or_else(|_| format!("The instance could not be inspected: {error}"));
                op.add_skipped(&op.project_resource(), reason)?;
                return Ok(());
            }
        };
        let subject = resource_ref_of(&instance).unwrap_or_else(|| op.project_resource());
        let status = instance.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN");

        match status {
            "RUNNING" => op.add_child(running_check(Arc::clone(&self.snapshot)))?,
            "TERMINATED" | "STOPPED" | "SUSPENDED" => {
                op.add_child(running_check(Arc::clone(&self.snapshot)))?;
                op.add_child(
                    HumanTask::new(
                        "Start the VM",
                        format!("Start {name} in {zone}, wait until it reports RUNNING, then continue."),
                    )
                    .for_resource(&subject),
                )?;
            }
            transitional => {
                let args = [("status", transitional)];
                let reason = op
                    .prep_msg(UNCERTAIN_REASON, &args)
                    .unwrap_or_else(|_| format!("The instance is in the transitional state {transitional}."));
                let remediation = op
                    .prep_msg(UNCERTAIN_REMEDIATION, &args)
                    .unwrap_or_else(|_| "Wait for the pending operation to finish, then retest.".into());
                op.add_uncertain(&subject, reason, remediation)?;
            }
        }
        Ok(())
    }
}

fn labels_of(instance: &Value) -> IndexMap<String, String> {
    instance
        .get("labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|value| (key.clone(), value.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn running_check(snapshot: Arc<ResourceSnapshot>) -> ResourceAttributeCheck {
    ResourceAttributeCheck::new(
        move |op: &Operator| {
            let zone = op.get_str("zone").unwrap_or_default();
            let name = op.get_str("instance_name").unwrap_or_default();
            snapshot.instance(&op.context().project_id, &zone, &name)
        },
        "status",
        "RUNNING",
    )
    .with_template(VM_RUNNING)
}
