//! JSON report document written at the end of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runbook::{ExecutionMode, Status};

/// Persisted summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    /// Runbook identifier, e.g. `gce/vm-running-state`.
    pub runbook: String,
    pub run_id: String,
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    /// Count of evaluations per status; statuses that never occurred are absent.
    pub totals_by_status: BTreeMap<Status, usize>,
    pub execution_mode: ExecutionMode,
    pub results: Vec<ReportEntry>,
}

/// One evaluation as it appears in the report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Execution id of the step that produced the evaluation.
    pub step: String,
    /// Short path of the evaluated resource, when there was one.
    pub resource: Option<String>,
    pub status: Status,
    pub reason: String,
    pub remediation: Option<String>,
    pub remediation_skipped: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: Option<DateTime<Utc>>,
}

impl ReportDocument {
    /// Recomputes totals from the entries, for consumers that only have the file.
    pub fn count_entries(&self) -> BTreeMap<Status, usize> {
        let mut totals = BTreeMap::new();
        for entry in &self.results {
            *totals.entry(entry.status).or_insert(0) += 1;
        }
        totals
    }
}
