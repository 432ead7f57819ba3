//! Message templates used by steps to phrase reasons and remediations.
//!
//! A catalog maps a template key such as `gce::vm_status` to named blocks:
//!
//! ```yaml
//! gce::vm_status:
//!   step_name: Verify that {instance_name} is running
//!   failure_reason: The instance {instance_name} is in state {status}.
//!   failure_remediation: Start the instance with `gcloud compute instances start {instance_name}`.
//!   success_reason: The instance {instance_name} is running.
//! ```
//!
//! Blocks may carry suffixes (`failure_reason_a1`) for alternative phrasings.

use gcpdiag_util::render_placeholders;
use indexmap::IndexMap;

use crate::error::RunbookError;

pub const STEP_NAME: &str = "step_name";
pub const FAILURE_REASON: &str = "failure_reason";
pub const FAILURE_REMEDIATION: &str = "failure_remediation";
pub const SUCCESS_REASON: &str = "success_reason";
pub const UNCERTAIN_REASON: &str = "uncertain_reason";
pub const UNCERTAIN_REMEDIATION: &str = "uncertain_remediation";
pub const SKIPPED_REASON: &str = "skipped_reason";

/// Template key → block name → text.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    templates: IndexMap<String, IndexMap<String, String>>,
}

impl MessageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        let templates: IndexMap<String, IndexMap<String, String>> = serde_yaml::from_str(source)?;
        let templates = templates
            .into_iter()
            .map(|(key, blocks)| {
                let blocks = blocks
                    .into_iter()
                    .map(|(block, text)| (block, text.trim_end().to_string()))
                    .collect();
                (key, blocks)
            })
            .collect();
        Ok(Self { templates })
    }

    pub fn insert(&mut self, template: impl Into<String>, block: impl Into<String>, text: impl Into<String>) {
        self.templates
            .entry(template.into())
            .or_default()
            .insert(block.into(), text.into());
    }

    /// Adds every block of `other`; blocks already present are replaced.
    pub fn merge(&mut self, other: MessageCatalog) {
        for (template, blocks) in other.templates {
            self.templates.entry(template).or_default().extend(blocks);
        }
    }

    pub fn contains(&self, template: &str) -> bool {
        self.templates.contains_key(template)
    }

    pub fn block(&self, template: &str, block: &str) -> Option<&str> {
        self.templates.get(template)?.get(block).map(String::as_str)
    }

    /// Renders one block, substituting `{name}` placeholders through `lookup`.
    /// Placeholders `lookup` cannot resolve are left as written.
    pub fn render<F>(&self, template: &str, block: &str, lookup: F) -> Result<String, RunbookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = self.block(template, block).ok_or_else(|| RunbookError::UnknownTemplate {
            template: template.to_string(),
            block: block.to_string(),
        })?;
        Ok(render_placeholders(text, lookup))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
gce::vm_status:
  step_name: Verify that {instance_name} is running
  failure_reason: |
    The instance {instance_name} is in state {status}.
  failure_reason_a1: The instance {instance_name} does not exist.
"#;

    #[test]
    fn loads_yaml_and_renders_blocks() {
        let catalog = MessageCatalog::from_yaml_str(CATALOG).expect("parse catalog");
        let rendered = catalog
            .render("gce::vm_status", FAILURE_REASON, |name| match name {
                "instance_name" => Some("vm-1".into()),
                "status" => Some("TERMINATED".into()),
                _ => None,
            })
            .expect("render");
        assert_eq!(rendered, "The instance vm-1 is in state TERMINATED.");
        assert!(catalog.block("gce::vm_status", "failure_reason_a1").is_some());
    }

    #[test]
    fn unknown_blocks_are_errors() {
        let catalog = MessageCatalog::from_yaml_str(CATALOG).expect("parse catalog");
        let error = catalog.render("gce::vm_status", SUCCESS_REASON, |_| None).expect_err("missing block");
        assert!(matches!(error, RunbookError::UnknownTemplate { .. }));
    }

    #[test]
    fn merge_replaces_existing_blocks() {
        let mut catalog = MessageCatalog::from_yaml_str(CATALOG).expect("parse catalog");
        let mut other = MessageCatalog::new();
        other.insert("gce::vm_status", STEP_NAME, "Check {instance_name}");
        other.insert("gce::disk", STEP_NAME, "Check disks");
        catalog.merge(other);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.block("gce::vm_status", STEP_NAME), Some("Check {instance_name}"));
        assert!(catalog.block("gce::vm_status", "failure_reason_a1").is_some());
    }
}
