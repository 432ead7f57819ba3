//! Built-in runbook content.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use gcpdiag_engine::{MessageCatalog, RunbookError, TreeRegistry};

use crate::snapshot::ResourceSnapshot;

pub mod gce;

/// Registers every built-in tree, backed by `snapshot` for resource queries.
pub fn registry(snapshot: Arc<ResourceSnapshot>) -> Result<TreeRegistry, RunbookError> {
    let mut registry = TreeRegistry::new();
    registry.register_with("gce/vm-running-state", move || Box::new(gce::VmRunningState::new(Arc::clone(&snapshot))))?;
    Ok(registry)
}

/// Message templates of every built-in tree.
pub fn messages() -> Result<MessageCatalog> {
    MessageCatalog::from_yaml_str(gce::MESSAGES).context("built-in gce messages are not valid YAML")
}
