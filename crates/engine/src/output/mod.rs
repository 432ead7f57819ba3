//! Rendering of step outcomes and human prompts.
//!
//! Every renderer implements [`Output`]. The engine never writes to a
//! terminal directly; it goes through the run's
//! [`InteractionInterface`](crate::interface::InteractionInterface), which
//! forwards to the configured renderer.

use std::collections::BTreeMap;

use gcpdiag_types::{PromptRequest, PromptResponse, ResourceRef, Status, StepKind};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub mod api;
pub mod terminal;

pub use api::{ApiOutput, LogBuffer, OutputEvent};
pub use terminal::TerminalOutput;

/// Rendering surface shared by the terminal and API renderers.
pub trait Output: Send + Sync {
    /// Announces the `index`-th step of the run (1-based).
    fn start_step(&self, index: usize, execution_id: &str, name: &str, kind: StepKind);

    /// Replaces the transient progress line.
    fn update_progress(&self, message: &str);

    fn print_ok(&self, resource: Option<&ResourceRef>, reason: &str);

    fn print_failed(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>);

    fn print_uncertain(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>);

    fn print_skipped(&self, resource: Option<&ResourceRef>, reason: &str);

    fn info(&self, message: &str);

    /// Asks the human and returns the answer. Must return
    /// [`PromptResponse::NoAnswer`] on EOF or empty input instead of blocking
    /// or failing.
    fn prompt(&self, request: &PromptRequest) -> PromptResponse;

    fn print_summary(&self, runbook: &str, totals: &BTreeMap<Status, usize>);

    /// Destination for `tracing` output while this renderer is active.
    fn log_writer(&self) -> BoxMakeWriter;
}

/// Dispatches a recorded outcome to the matching `print_*` method.
pub(crate) fn print_outcome(
    output: &dyn Output,
    status: Status,
    resource: Option<&ResourceRef>,
    reason: &str,
    remediation: Option<&str>,
) {
    match status {
        Status::Ok => output.print_ok(resource, reason),
        Status::Failed => output.print_failed(resource, reason, remediation),
        Status::Uncertain => output.print_uncertain(resource, reason, remediation),
        Status::Skipped => output.print_skipped(resource, reason),
    }
}
