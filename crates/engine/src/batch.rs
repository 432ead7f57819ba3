//! Batch specifications: several runbook invocations in one YAML file.
//!
//! ```yaml
//! - runbook: gce/vm-running-state
//!   parameters:
//!     project_id: demo
//!     instance_name: web-1
//!     zone: us-central1-a
//! - runbook: gce/vm-running-state
//!   parameters: { project_id: demo, instance_name: db-1, zone: us-central1-b }
//! ```

use std::{fs, path::Path};

use anyhow::{Context as _, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{context::Context, runner::RunRequest};

/// One entry of a batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub runbook: String,
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
}

impl BatchRun {
    /// Converts the entry into a request sharing the scope in `context`.
    pub fn into_request(self, context: &Context) -> RunRequest {
        RunRequest::new(self.runbook)
            .with_context(context.clone())
            .with_parameters(self.parameters)
    }
}

pub fn parse_batch_spec(source: &str) -> Result<Vec<BatchRun>> {
    let runs: Vec<BatchRun> = serde_yaml::from_str(source).context("batch spec is not a list of {runbook, parameters} entries")?;
    if let Some(index) = runs.iter().position(|run| run.runbook.trim().is_empty()) {
        anyhow::bail!("batch entry {} has an empty runbook id", index + 1);
    }
    Ok(runs)
}

pub fn load_batch_spec(path: &Path) -> Result<Vec<BatchRun>> {
    let source = fs::read_to_string(path).with_context(|| format!("failed to read batch spec {}", path.display()))?;
    parse_batch_spec(&source).with_context(|| format!("invalid batch spec {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_entries_in_order() {
        let runs = parse_batch_spec(
            r#"
- runbook: gce/vm-running-state
  parameters:
    project_id: demo
    retries: 2
- runbook: gce/other
"#,
        )
        .expect("parse");

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].parameters["retries"], json!(2));
        assert!(runs[1].parameters.is_empty());

        let request = runs[0].clone().into_request(&Context::new("demo"));
        assert_eq!(request.runbook, "gce/vm-running-state");
        assert_eq!(request.context.project_id, "demo");
    }

    #[test]
    fn rejects_empty_runbook_ids_and_bad_shapes() {
        assert!(parse_batch_spec("- runbook: ''\n").is_err());
        assert!(parse_batch_spec("runbook: gce/x\n").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("batch.yaml");
        fs::write(&path, "- runbook: gce/vm-running-state\n").expect("write");
        assert_eq!(load_batch_spec(&path).expect("load").len(), 1);
        assert!(load_batch_spec(&directory.path().join("missing.yaml")).is_err());
    }
}
