//! Result aggregation for runbook runs.
//!
//! Every outcome a step records becomes a [`ResourceEvaluation`] under the
//! [`StepResult`] of the step execution that produced it. A [`Report`] holds
//! all step results of one run; the [`ReportManager`] keeps the reports of
//! concurrent runs apart by run id.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use gcpdiag_types::{ExecutionMode, PromptResponse, ReportDocument, ReportEntry, ResourceRef, Status, StepKind};
use gcpdiag_util::sanitize_file_component;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::{error::ReportError, parameters::Parameters};

/// One outcome for one resource, immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvaluation {
    pub resource: Option<ResourceRef>,
    pub status: Status,
    pub reason: String,
    pub remediation: Option<String>,
    pub remediation_skipped: bool,
    pub prompt_response: Option<PromptResponse>,
    pub recorded_at: DateTime<Utc>,
}

impl ResourceEvaluation {
    pub fn new(resource: Option<ResourceRef>, status: Status, reason: impl Into<String>) -> Self {
        Self {
            resource,
            status,
            reason: reason.into(),
            remediation: None,
            remediation_skipped: false,
            prompt_response: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_remediation(mut self, remediation: Option<String>, skipped: bool) -> Self {
        self.remediation = remediation;
        self.remediation_skipped = skipped;
        self
    }

    pub fn with_prompt_response(mut self, response: Option<PromptResponse>) -> Self {
        self.prompt_response = response;
        self
    }
}

/// Everything one step execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub execution_id: String,
    pub step_id: String,
    pub name: String,
    pub kind: StepKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub evaluations: Vec<ResourceEvaluation>,
    /// Last answer given to a prompt that was not tied to an evaluation.
    pub prompt_response: Option<PromptResponse>,
}

impl StepResult {
    pub fn new(execution_id: impl Into<String>, step_id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            name: name.into(),
            kind,
            start_time: Utc::now(),
            end_time: None,
            evaluations: Vec::new(),
            prompt_response: None,
        }
    }

    /// The most severe status among the evaluations, if any were recorded.
    pub fn overall_status(&self) -> Option<Status> {
        [Status::Failed, Status::Uncertain, Status::Ok, Status::Skipped]
            .into_iter()
            .find(|status| self.evaluations.iter().any(|evaluation| evaluation.status == *status))
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone)]
pub struct Report {
    pub run_id: String,
    pub runbook: String,
    pub parameters: Parameters,
    pub execution_mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    results: IndexMap<String, StepResult>,
}

impl Report {
    pub fn new(run_id: impl Into<String>, runbook: impl Into<String>, parameters: Parameters, execution_mode: ExecutionMode) -> Self {
        Self {
            run_id: run_id.into(),
            runbook: runbook.into(),
            parameters,
            execution_mode,
            started_at: Utc::now(),
            finished_at: None,
            results: IndexMap::new(),
        }
    }

    pub fn open_step(&mut self, result: StepResult) {
        self.results.insert(result.execution_id.clone(), result);
    }

    pub fn step(&self, execution_id: &str) -> Option<&StepResult> {
        self.results.get(execution_id)
    }

    fn step_mut(&mut self, execution_id: &str) -> Result<&mut StepResult, ReportError> {
        let run_id = self.run_id.clone();
        self.results.get_mut(execution_id).ok_or_else(|| ReportError::UnknownStep {
            run_id,
            step: execution_id.to_string(),
        })
    }

    pub fn record(&mut self, execution_id: &str, evaluation: ResourceEvaluation) -> Result<(), ReportError> {
        self.step_mut(execution_id)?.evaluations.push(evaluation);
        Ok(())
    }

    pub fn close_step(&mut self, execution_id: &str) -> Result<(), ReportError> {
        self.step_mut(execution_id)?.end_time = Some(Utc::now());
        Ok(())
    }

    /// Step results in execution order.
    pub fn results(&self) -> impl Iterator<Item = &StepResult> {
        self.results.values()
    }

    pub fn evaluations(&self) -> impl Iterator<Item = (&StepResult, &ResourceEvaluation)> {
        self.results
            .values()
            .flat_map(|result| result.evaluations.iter().map(move |evaluation| (result, evaluation)))
    }

    /// True iff at least one evaluation is `failed` or `uncertain`.
    pub fn any_failed(&self) -> bool {
        self.evaluations().any(|(_, evaluation)| evaluation.status.is_failure())
    }

    /// Count of evaluations per status. Statuses that never occurred are absent.
    pub fn totals_by_status(&self) -> BTreeMap<Status, usize> {
        let mut totals = BTreeMap::new();
        for (_, evaluation) in self.evaluations() {
            *totals.entry(evaluation.status).or_insert(0) += 1;
        }
        totals
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations().count()
    }

    /// Serializable view of the run. In auto mode every remediation is marked skipped.
    pub fn to_document(&self) -> ReportDocument {
        let auto = self.execution_mode.is_auto();
        let results = self
            .evaluations()
            .map(|(step, evaluation)| ReportEntry {
                step: step.execution_id.clone(),
                resource: evaluation.resource.as_ref().map(|resource| resource.short_path.clone()),
                status: evaluation.status,
                reason: evaluation.reason.clone(),
                remediation: evaluation.remediation.clone(),
                remediation_skipped: auto || evaluation.remediation_skipped,
                start_time_utc: step.start_time,
                end_time_utc: step.end_time,
            })
            .collect();

        ReportDocument {
            runbook: self.runbook.clone(),
            run_id: self.run_id.clone(),
            parameters: self.parameters.clone(),
            totals_by_status: self.totals_by_status(),
            execution_mode: self.execution_mode,
            results,
        }
    }
}

/// Reports of every in-flight run, keyed by run id.
#[derive(Debug, Default)]
pub struct ReportManager {
    reports: Mutex<HashMap<String, Report>>,
}

impl ReportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, report: Report) {
        debug!(run_id = %report.run_id, runbook = %report.runbook, "opened report");
        let mut reports = self.reports.lock().expect("report lock poisoned");
        reports.insert(report.run_id.clone(), report);
    }

    fn update<R>(&self, run_id: &str, apply: impl FnOnce(&mut Report) -> Result<R, ReportError>) -> Result<R, ReportError> {
        let mut reports = self.reports.lock().expect("report lock poisoned");
        let report = reports
            .get_mut(run_id)
            .ok_or_else(|| ReportError::UnknownRun(run_id.to_string()))?;
        apply(report)
    }

    pub fn open_step(&self, run_id: &str, result: StepResult) -> Result<(), ReportError> {
        self.update(run_id, |report| {
            report.open_step(result);
            Ok(())
        })
    }

    pub fn record(&self, run_id: &str, execution_id: &str, evaluation: ResourceEvaluation) -> Result<(), ReportError> {
        self.update(run_id, |report| report.record(execution_id, evaluation))
    }

    pub fn set_prompt_response(&self, run_id: &str, execution_id: &str, response: PromptResponse) -> Result<(), ReportError> {
        self.update(run_id, |report| {
            report.step_mut(execution_id)?.prompt_response = Some(response);
            Ok(())
        })
    }

    pub fn close_step(&self, run_id: &str, execution_id: &str) -> Result<(), ReportError> {
        self.update(run_id, |report| report.close_step(execution_id))
    }

    /// Runs `read` against the report for `run_id` while holding the lock.
    pub fn with_report<R>(&self, run_id: &str, read: impl FnOnce(&Report) -> R) -> Result<R, ReportError> {
        let reports = self.reports.lock().expect("report lock poisoned");
        let report = reports.get(run_id).ok_or_else(|| ReportError::UnknownRun(run_id.to_string()))?;
        Ok(read(report))
    }

    pub fn any_failed(&self, run_id: &str) -> Result<bool, ReportError> {
        self.with_report(run_id, Report::any_failed)
    }

    pub fn totals_by_status(&self, run_id: &str) -> Result<BTreeMap<Status, usize>, ReportError> {
        self.with_report(run_id, Report::totals_by_status)
    }

    /// Removes the report from the manager and stamps its finish time.
    pub fn finish(&self, run_id: &str) -> Result<Report, ReportError> {
        let mut reports = self.reports.lock().expect("report lock poisoned");
        let mut report = reports
            .remove(run_id)
            .ok_or_else(|| ReportError::UnknownRun(run_id.to_string()))?;
        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    pub fn active_runs(&self) -> Vec<String> {
        let reports = self.reports.lock().expect("report lock poisoned");
        let mut runs: Vec<String> = reports.keys().cloned().collect();
        runs.sort();
        runs
    }
}

/// File name for a run's report, e.g.
/// `runbook_report_gce_vm_running_state_2024_05_01_13_45_10_UTC_1a2b3c4d.json`.
///
/// The run id's trailing segment keeps runs of one runbook that finish in the
/// same second apart.
pub fn report_file_name(runbook: &str, run_id: &str, at: DateTime<Utc>) -> String {
    let run = run_id.rsplit('-').next().unwrap_or(run_id);
    format!(
        "runbook_report_{}_{}_UTC_{}.json",
        sanitize_file_component(runbook),
        at.format("%Y_%m_%d_%H_%M_%S"),
        sanitize_file_component(run)
    )
}

/// Writes the report as pretty JSON under `directory`, creating it if needed.
pub fn write_report(report: &Report, directory: &Path) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(directory)?;
    let at = report.finished_at.unwrap_or_else(Utc::now);
    let path = directory.join(report_file_name(&report.runbook, &report.run_id, at));
    let json = serde_json::to_string_pretty(&report.to_document())?;
    fs::write(&path, json)?;
    info!(run_id = %report.run_id, path = %path.display(), "wrote runbook report");
    Ok(path)
}

/// Writes the report to `directory`, or prints it to `fallback` when the
/// directory is not writable. Never fails the run.
pub fn persist_report(report: &Report, directory: &Path, fallback: &mut dyn Write) -> Option<PathBuf> {
    match write_report(report, directory) {
        Ok(path) => Some(path),
        Err(error) => {
            warn!(run_id = %report.run_id, directory = %directory.display(), error = %error, "could not write report; printing it instead");
            match serde_json::to_string_pretty(&report.to_document()) {
                Ok(json) => {
                    if let Err(error) = writeln!(fallback, "{json}") {
                        warn!(error = %error, "could not print report");
                    }
                }
                Err(error) => warn!(error = %error, "could not serialize report"),
            }
            None
        }
    }
}
