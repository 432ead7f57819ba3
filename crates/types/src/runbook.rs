//! Core runbook vocabulary: evaluation statuses, step kinds, resource
//! references, and the prompt contract between a step and a human.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Terminal status of a single resource evaluation.
///
/// A status is assigned exactly once when the evaluation is recorded and never
/// transitions afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The check passed.
    Ok,
    /// The check found a problem.
    Failed,
    /// The check could not decide; surfaced like a failure.
    Uncertain,
    /// The check did not apply or could not run.
    Skipped,
}

impl Status {
    /// Every status, in reporting order.
    pub const ALL: [Status; 4] = [Status::Ok, Status::Failed, Status::Uncertain, Status::Skipped];

    /// Returns true for statuses that make a run count as failed; `uncertain` is one of them.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::Uncertain)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Failed => "failed",
            Status::Uncertain => "uncertain",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of step variants in a diagnostic tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Entry point of a tree; exactly one per tree.
    Start,
    /// A single check that records outcomes.
    #[default]
    Step,
    /// Decides at run time which subtree(s) to attach.
    Gateway,
    /// Fixed fan-out of sibling checks.
    Composite,
    /// Terminal step, visited after every other step.
    End,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Start => "start",
            StepKind::Step => "step",
            StepKind::Gateway => "gateway",
            StepKind::Composite => "composite",
            StepKind::End => "end",
        };
        f.write_str(label)
    }
}

/// Owned snapshot of the resource an evaluation refers to.
///
/// Evaluations hold a copy of the reference rather than the resource itself,
/// so recording an outcome never mutates the underlying resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Full API path, e.g. `projects/p/zones/z/instances/vm`.
    pub full_path: String,
    /// Compact path shown to users, e.g. `p/z/vm`.
    pub short_path: String,
}

impl ResourceRef {
    pub fn new(full_path: impl Into<String>, short_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            short_path: short_path.into(),
        }
    }

    /// Builds a reference from a full API path, deriving the short path by
    /// dropping the collection segments.
    ///
    /// ```rust
    /// use gcpdiag_types::ResourceRef;
    ///
    /// let resource = ResourceRef::from_full_path("projects/demo/zones/us-central1-a/instances/vm-1");
    /// assert_eq!(resource.short_path, "demo/us-central1-a/vm-1");
    /// ```
    pub fn from_full_path(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        let short_path = short_path_of(&full_path);
        Self { full_path, short_path }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_path)
    }
}

fn short_path_of(full_path: &str) -> String {
    let trimmed = match full_path.strip_prefix("//") {
        Some(rest) => rest.split_once('/').map(|(_, path)| path).unwrap_or(rest),
        None => full_path,
    };
    let segments: Vec<&str> = trimmed.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.len() < 2 || segments.len() % 2 != 0 {
        return trimmed.to_string();
    }
    segments.iter().skip(1).step_by(2).copied().collect::<Vec<_>>().join("/")
}

/// Anything a step can evaluate.
pub trait Resource {
    fn full_path(&self) -> String;

    fn short_path(&self) -> String {
        short_path_of(&self.full_path())
    }

    fn to_resource_ref(&self) -> ResourceRef {
        ResourceRef::new(self.full_path(), self.short_path())
    }
}

impl Resource for ResourceRef {
    fn full_path(&self) -> String {
        self.full_path.clone()
    }

    fn short_path(&self) -> String {
        self.short_path.clone()
    }
}

/// Kind of question put to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptKind {
    /// yes / no / uncertain.
    Confirmation,
    /// continue / stop / retest, or a custom option set.
    HumanTask,
}

/// Answer recorded for a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptResponse {
    Yes,
    No,
    Uncertain,
    Continue,
    Stop,
    Retest,
    /// Key of a custom option supplied with the prompt.
    Custom(String),
    /// EOF, empty input, or a prompt that was never shown.
    NoAnswer,
}

impl PromptResponse {
    /// Responses that mean the human did not carry out the suggested remediation.
    pub fn skips_remediation(&self) -> bool {
        matches!(self, PromptResponse::Continue | PromptResponse::Stop | PromptResponse::NoAnswer)
    }
}

/// A question for the human operator with its accepted answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub message: String,
    /// Answer key → description, in display order.
    pub options: IndexMap<String, String>,
}

impl PromptRequest {
    pub fn confirmation(message: impl Into<String>) -> Self {
        let mut options = IndexMap::new();
        options.insert("y".to_string(), "Yes".to_string());
        options.insert("n".to_string(), "No".to_string());
        options.insert("u".to_string(), "Unsure".to_string());
        Self {
            kind: PromptKind::Confirmation,
            message: message.into(),
            options,
        }
    }

    pub fn human_task(message: impl Into<String>) -> Self {
        let mut options = IndexMap::new();
        options.insert("r".to_string(), "Retest current step".to_string());
        options.insert("c".to_string(), "Continue".to_string());
        options.insert("s".to_string(), "Stop this runbook".to_string());
        Self {
            kind: PromptKind::HumanTask,
            message: message.into(),
            options,
        }
    }

    /// Replaces the default option set.
    pub fn with_options(mut self, options: IndexMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Maps a raw answer onto a response, or `None` when it is not one of the options.
    ///
    /// Matching is case-insensitive against option keys. Keys that carry a
    /// standard meaning for this prompt kind resolve to that meaning; any other
    /// accepted key resolves to [`PromptResponse::Custom`].
    pub fn resolve(&self, answer: &str) -> Option<PromptResponse> {
        let answer = answer.trim().to_lowercase();
        let key = self.options.keys().find(|key| key.to_lowercase() == answer)?;
        let standard = match (self.kind, key.to_lowercase().as_str()) {
            (PromptKind::Confirmation, "y" | "yes") => Some(PromptResponse::Yes),
            (PromptKind::Confirmation, "n" | "no") => Some(PromptResponse::No),
            (PromptKind::Confirmation, "u" | "unsure") => Some(PromptResponse::Uncertain),
            (PromptKind::HumanTask, "c" | "continue") => Some(PromptResponse::Continue),
            (PromptKind::HumanTask, "s" | "stop") => Some(PromptResponse::Stop),
            (PromptKind::HumanTask, "r" | "retest") => Some(PromptResponse::Retest),
            _ => None,
        };
        Some(standard.unwrap_or_else(|| PromptResponse::Custom(key.clone())))
    }
}

/// Whether a run may stop and ask a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Interactive,
    /// `auto` runs: prompts are never shown and remediation is always marked skipped.
    NonInteractive,
}

impl ExecutionMode {
    pub fn from_auto(auto: bool) -> Self {
        if auto {
            ExecutionMode::NonInteractive
        } else {
            ExecutionMode::Interactive
        }
    }

    pub fn is_auto(self) -> bool {
        self == ExecutionMode::NonInteractive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_and_uncertain_count_as_failures() {
        assert!(Status::Failed.is_failure());
        assert!(Status::Uncertain.is_failure());
        assert!(!Status::Ok.is_failure());
        assert!(!Status::Skipped.is_failure());
    }

    #[test]
    fn short_path_drops_collection_segments() {
        let resource = ResourceRef::from_full_path("//compute.googleapis.com/projects/demo/zones/z1/instances/vm");
        assert_eq!(resource.short_path, "demo/z1/vm");

        let odd = ResourceRef::from_full_path("projects/demo/zones");
        assert_eq!(odd.short_path, "projects/demo/zones");
    }

    #[test]
    fn human_task_answers_resolve_case_insensitively() {
        let prompt = PromptRequest::human_task("fix it");
        assert_eq!(prompt.resolve("C"), Some(PromptResponse::Continue));
        assert_eq!(prompt.resolve(" r "), Some(PromptResponse::Retest));
        assert_eq!(prompt.resolve("x"), None);
    }

    #[test]
    fn custom_options_resolve_to_custom_keys() {
        let mut options = IndexMap::new();
        options.insert("a".to_string(), "Option A".to_string());
        options.insert("s".to_string(), "Stop".to_string());
        let prompt = PromptRequest::human_task("pick").with_options(options);
        assert_eq!(prompt.resolve("a"), Some(PromptResponse::Custom("a".into())));
        assert_eq!(prompt.resolve("s"), Some(PromptResponse::Stop));
        assert_eq!(prompt.resolve("c"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Uncertain).expect("serialize status");
        assert_eq!(json, "\"uncertain\"");
    }
}
