//! The boundary between steps and the outside world.
//!
//! [`InteractionInterface`] records each outcome into the run's report,
//! renders it through the configured [`Output`], and decides whether a human
//! gets asked about it.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use gcpdiag_types::{ExecutionMode, PromptRequest, PromptResponse, ResourceRef, Status, StepKind};
use tracing::debug;

use crate::{
    error::RunbookError,
    output::{Output, print_outcome},
    report::{ReportManager, ResourceEvaluation, StepResult},
};

const DEFAULT_HUMAN_TASK_MESSAGE: &str = "How would you like to proceed?";

/// A recorded outcome on its way to the report.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: Status,
    pub resource: Option<ResourceRef>,
    pub reason: String,
    pub remediation: Option<String>,
    /// Message of the HUMAN_TASK prompt shown for failed and uncertain outcomes.
    pub human_task_msg: Option<String>,
    /// Whether a failed or uncertain outcome may prompt the human.
    pub prompt: bool,
}

impl Outcome {
    pub fn new(status: Status, resource: Option<ResourceRef>, reason: impl Into<String>) -> Self {
        Self {
            status,
            resource,
            reason: reason.into(),
            remediation: None,
            human_task_msg: None,
            prompt: true,
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_human_task_msg(mut self, message: impl Into<String>) -> Self {
        self.human_task_msg = Some(message.into());
        self
    }

    /// Records the outcome without asking the human; the remediation is marked skipped.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = false;
        self
    }
}

/// Per-run recording and prompting surface.
pub struct InteractionInterface {
    run_id: String,
    mode: ExecutionMode,
    output: Arc<dyn Output>,
    reports: Arc<ReportManager>,
    steps_started: AtomicUsize,
}

impl InteractionInterface {
    pub fn new(run_id: impl Into<String>, mode: ExecutionMode, output: Arc<dyn Output>, reports: Arc<ReportManager>) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            output,
            reports,
            steps_started: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn output(&self) -> &dyn Output {
        self.output.as_ref()
    }

    pub fn reports(&self) -> &ReportManager {
        &self.reports
    }

    /// Opens a step result in the report and announces the step.
    pub fn start_step(&self, execution_id: &str, step_id: &str, name: &str, kind: StepKind) -> Result<(), RunbookError> {
        self.reports
            .open_step(&self.run_id, StepResult::new(execution_id, step_id, name, kind))?;
        let index = self.steps_started.fetch_add(1, Ordering::SeqCst) + 1;
        self.output.start_step(index, execution_id, name, kind);
        Ok(())
    }

    pub fn finish_step(&self, execution_id: &str) -> Result<(), RunbookError> {
        self.reports.close_step(&self.run_id, execution_id)?;
        Ok(())
    }

    /// Renders and records `outcome` for the step `execution_id`.
    ///
    /// Failed and uncertain outcomes prompt the human with a HUMAN_TASK
    /// question unless the run is in auto mode. The answer is stored on the
    /// evaluation and returned. In auto mode the remediation is always marked
    /// skipped.
    pub fn record(&self, execution_id: &str, outcome: Outcome) -> Result<Option<PromptResponse>, RunbookError> {
        print_outcome(
            self.output.as_ref(),
            outcome.status,
            outcome.resource.as_ref(),
            &outcome.reason,
            outcome.remediation.as_deref(),
        );

        let (response, remediation_skipped) = if !outcome.status.is_failure() {
            (None, false)
        } else if self.mode.is_auto() || !outcome.prompt {
            (None, true)
        } else {
            let message = outcome.human_task_msg.as_deref().unwrap_or(DEFAULT_HUMAN_TASK_MESSAGE);
            let response = self.output.prompt(&PromptRequest::human_task(message));
            let skipped = response.skips_remediation();
            (Some(response), skipped)
        };

        debug!(
            run_id = %self.run_id,
            step = %execution_id,
            status = %outcome.status,
            remediation_skipped,
            "recorded evaluation"
        );
        let evaluation = ResourceEvaluation::new(outcome.resource, outcome.status, outcome.reason)
            .with_remediation(outcome.remediation, remediation_skipped)
            .with_prompt_response(response.clone());
        self.reports.record(&self.run_id, execution_id, evaluation)?;
        Ok(response)
    }

    /// Asks the human directly. Auto runs never prompt and get `NoAnswer`.
    pub fn prompt(&self, execution_id: Option<&str>, request: &PromptRequest) -> Result<PromptResponse, RunbookError> {
        if self.mode.is_auto() {
            return Ok(PromptResponse::NoAnswer);
        }
        let response = self.output.prompt(request);
        if let Some(execution_id) = execution_id {
            self.reports
                .set_prompt_response(&self.run_id, execution_id, response.clone())?;
        }
        Ok(response)
    }

    pub fn info(&self, message: &str) {
        self.output.info(message);
    }

    pub fn print_summary(&self, runbook: &str) -> Result<(), RunbookError> {
        let totals = self.reports.totals_by_status(&self.run_id)?;
        self.output.print_summary(runbook, &totals);
        Ok(())
    }
}
