//! Offline resource snapshot answering the queries built-in runbooks make.
//!
//! ```json
//! {
//!   "projects": {
//!     "demo": {
//!       "instances": [
//!         { "name": "web-1", "id": "123", "zone": "us-central1-a", "status": "RUNNING" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! A project missing from the snapshot answers every query with a 403, the
//! way the API does for a project the caller cannot see.

use std::{fs, path::Path};

use anyhow::{Context as _, Result};
use gcpdiag_engine::GcpApiError;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

const COMPUTE: &str = "compute";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    projects: IndexMap<String, ProjectSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectSnapshot {
    #[serde(default)]
    instances: Vec<Value>,
}

impl ResourceSnapshot {
    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source).context("resource snapshot is not valid JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Self::from_json_str(&source).with_context(|| format!("invalid snapshot {}", path.display()))
    }

    /// Looks an instance up by zone and name.
    pub fn instance(&self, project_id: &str, zone: &str, name: &str) -> Result<Value, GcpApiError> {
        let project = self.project(project_id)?;
        project
            .instances
            .iter()
            .find(|instance| text_field(instance, "name") == Some(name) && zone_of(instance) == Some(zone))
            .map(|instance| with_self_link(project_id, instance))
            .ok_or_else(|| GcpApiError::not_found(COMPUTE, format!("instance '{name}' was not found in {project_id}/{zone}")))
    }

    /// Looks an instance up by numeric id across all zones.
    pub fn instance_by_id(&self, project_id: &str, id: &str) -> Result<Value, GcpApiError> {
        let project = self.project(project_id)?;
        project
            .instances
            .iter()
            .find(|instance| id_of(instance).as_deref() == Some(id))
            .map(|instance| with_self_link(project_id, instance))
            .ok_or_else(|| GcpApiError::not_found(COMPUTE, format!("no instance with id {id} in project {project_id}")))
    }

    fn project(&self, project_id: &str) -> Result<&ProjectSnapshot, GcpApiError> {
        self.projects.get(project_id).ok_or_else(|| {
            GcpApiError::new(
                403,
                COMPUTE,
                format!("project '{project_id}' is not in the snapshot or the caller lacks access"),
            )
        })
    }
}

fn text_field<'a>(resource: &'a Value, field: &str) -> Option<&'a str> {
    resource.get(field).and_then(Value::as_str)
}

/// Zone name; the API returns it as a URL ending in `zones/<zone>`.
fn zone_of(instance: &Value) -> Option<&str> {
    text_field(instance, "zone").map(|zone| zone.rsplit('/').next().unwrap_or(zone))
}

fn id_of(instance: &Value) -> Option<String> {
    match instance.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn with_self_link(project_id: &str, instance: &Value) -> Value {
    let mut instance = instance.clone();
    if instance.get("selfLink").is_none()
        && let (Some(zone), Some(name)) = (zone_of(&instance), text_field(&instance, "name"))
    {
        let link = format!("https://compute.googleapis.com/compute/v1/projects/{project_id}/zones/{zone}/instances/{name}");
        if let Value::Object(fields) = &mut instance {
            fields.insert("selfLink".into(), Value::String(link));
        }
    }
    instance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ResourceSnapshot {
        ResourceSnapshot::from_json_str(
            r#"{
                "projects": {
                    "demo": {
                        "instances": [
                            { "name": "web-1", "id": 101, "zone": "projects/demo/zones/us-central1-a", "status": "RUNNING" },
                            { "name": "web-1", "id": "102", "zone": "us-central1-b", "status": "TERMINATED" }
                        ]
                    }
                }
            }"#,
        )
        .expect("snapshot")
    }

    #[test]
    fn finds_instances_by_zone_and_name() {
        let instance = snapshot().instance("demo", "us-central1-b", "web-1").expect("instance");
        assert_eq!(instance["status"], "TERMINATED");
        assert_eq!(
            instance["selfLink"],
            "https://compute.googleapis.com/compute/v1/projects/demo/zones/us-central1-b/instances/web-1"
        );
    }

    #[test]
    fn finds_instances_by_numeric_or_string_id() {
        let snapshot = snapshot();
        assert_eq!(snapshot.instance_by_id("demo", "101").expect("by number")["status"], "RUNNING");
        assert_eq!(snapshot.instance_by_id("demo", "102").expect("by string")["status"], "TERMINATED");
    }

    #[test]
    fn missing_instances_are_not_found_and_missing_projects_are_forbidden() {
        let snapshot = snapshot();
        let missing = snapshot.instance("demo", "us-central1-a", "db-1").expect_err("missing instance");
        assert!(missing.is_not_found());

        let forbidden = snapshot.instance("other", "us-central1-a", "web-1").expect_err("missing project");
        assert_eq!(forbidden.status, 403);
    }
}
