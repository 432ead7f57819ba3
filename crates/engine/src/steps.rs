//! Built-in steps available to every runbook.

use gcpdiag_types::{PromptRequest, PromptResponse, Resource, ResourceRef, StepKind};
use serde_json::Value;
use tracing::debug;

use crate::{
    error::GcpApiError,
    messages::{FAILURE_REASON, FAILURE_REMEDIATION, SUCCESS_REASON},
    operator::Operator,
    step::Step,
};

/// Entry point that performs no checks of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartStep;

impl Step for StartStep {
    fn kind(&self) -> StepKind {
        StepKind::Start
    }

    fn label(&self) -> Option<String> {
        Some("Start".into())
    }

    fn execute(&self, _op: &Operator) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Terminal step asking whether the investigation solved the problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndStep;

impl Step for EndStep {
    fn kind(&self) -> StepKind {
        StepKind::End
    }

    fn label(&self) -> Option<String> {
        Some("End".into())
    }

    fn execute(&self, op: &Operator) -> anyhow::Result<()> {
        if op.is_auto() {
            return Ok(());
        }
        let response = op.prompt(&PromptRequest::confirmation("Is your issue resolved?"))?;
        if response == PromptResponse::No {
            op.info("Rerun with different parameters, or attach the generated report when contacting support.");
        }
        Ok(())
    }
}

/// A check only a human can perform.
///
/// Continue (or yes) records ok; stop or no answer records skipped; retest
/// runs the step again, or records skipped once no retests are left. Auto
/// runs record skipped without asking.
#[derive(Debug, Clone)]
pub struct HumanTask {
    label: String,
    instructions: String,
    resource: Option<ResourceRef>,
}

impl HumanTask {
    pub fn new(label: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: instructions.into(),
            resource: None,
        }
    }

    pub fn for_resource(mut self, resource: &dyn Resource) -> Self {
        self.resource = Some(resource.to_resource_ref());
        self
    }
}

impl Step for HumanTask {
    fn label(&self) -> Option<String> {
        Some(self.label.clone())
    }

    fn execute(&self, op: &Operator) -> anyhow::Result<()> {
        let resource = self.resource.clone().unwrap_or_else(|| op.project_resource());
        if op.is_auto() {
            op.add_skipped(&resource, format!("Manual check '{}' is not performed in auto mode.", self.label))?;
            return Ok(());
        }

        match op.prompt(&PromptRequest::human_task(&self.instructions))? {
            PromptResponse::Continue | PromptResponse::Yes => {
                op.add_ok(&resource, format!("Manual check '{}' was completed.", self.label))?;
            }
            PromptResponse::Retest if op.is_final_attempt() => {
                op.add_skipped(&resource, format!("Manual check '{}' was not completed; no retests are left.", self.label))?;
            }
            PromptResponse::Retest => debug!(step = %self.label, "manual check will be repeated"),
            other => {
                op.add_skipped(&resource, format!("Manual check '{}' was not completed ({other:?}).", self.label))?;
            }
        }
        Ok(())
    }
}

/// Fetches a resource and reads one of its attributes.
pub type ResourceQuery = Box<dyn Fn(&Operator) -> Result<Value, GcpApiError> + Send + Sync>;

/// Compares one attribute of a fetched resource with an expected value.
///
/// A resource the backend reports as missing yields skipped; other backend
/// errors yield uncertain.
pub struct ResourceAttributeCheck {
    query: ResourceQuery,
    attribute: String,
    expected: Value,
    label: Option<String>,
    template: Option<String>,
}

impl ResourceAttributeCheck {
    /// `attribute` is a dotted path such as `status` or `disks.0.boot`.
    pub fn new(
        query: impl Fn(&Operator) -> Result<Value, GcpApiError> + Send + Sync + 'static,
        attribute: impl Into<String>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            query: Box::new(query),
            attribute: attribute.into(),
            expected: expected.into(),
            label: None,
            template: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Phrases outcomes with the `success_reason`, `failure_reason`, and
    /// `failure_remediation` blocks of `template`. The blocks receive
    /// `{attribute}`, `{expected}`, and `{actual}`.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

impl Step for ResourceAttributeCheck {
    fn label(&self) -> Option<String> {
        self.label.clone()
    }

    fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    fn execute(&self, op: &Operator) -> anyhow::Result<()> {
        let resource = match (self.query)(op) {
            Ok(resource) => resource,
            Err(error) if error.is_not_found() => {
                op.add_skipped(&op.project_resource(), format!("The resource could not be found: {}", error.message))?;
                return Ok(());
            }
            Err(error) => {
                op.add_uncertain(
                    &op.project_resource(),
                    format!("The resource could not be read: {error}"),
                    "Check that the API is enabled and that you are allowed to read the resource, then rerun.",
                )?;
                return Ok(());
            }
        };

        let subject = resource_ref_of(&resource).unwrap_or_else(|| op.project_resource());
        let actual = lookup_path(&resource, &self.attribute).cloned().unwrap_or(Value::Null);
        let expected = value_text(&self.expected);
        let actual_text = value_text(&actual);
        let args = [
            ("attribute", self.attribute.as_str()),
            ("expected", expected.as_str()),
            ("actual", actual_text.as_str()),
        ];

        if actual == self.expected {
            let reason = op
                .prep_msg(SUCCESS_REASON, &args)
                .unwrap_or_else(|_| format!("{} is {expected}.", self.attribute));
            op.add_ok(&subject, reason)?;
        } else {
            let reason = op
                .prep_msg(FAILURE_REASON, &args)
                .unwrap_or_else(|_| format!("{} is {actual_text}, expected {expected}.", self.attribute));
            let remediation = op
                .prep_msg(FAILURE_REMEDIATION, &args)
                .unwrap_or_else(|_| format!("Change {} to {expected}.", self.attribute));
            op.add_failed(&subject, reason, remediation)?;
        }
        Ok(())
    }
}

/// Resolves a dotted path; numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        })
}

/// Builds a resource reference from the `selfLink` of an API object.
pub fn resource_ref_of(resource: &Value) -> Option<ResourceRef> {
    let self_link = resource.get("selfLink").and_then(Value::as_str)?;
    let path = self_link
        .find("projects/")
        .map(|start| &self_link[start..])
        .unwrap_or(self_link);
    Some(ResourceRef::from_full_path(path))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "unset".to_string(),
        other => other.to_string(),
    }
}
