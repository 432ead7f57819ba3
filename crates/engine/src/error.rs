//! Error taxonomy of the runbook engine.

use thiserror::Error;

/// Errors raised by the engine itself.
#[derive(Debug, Error)]
pub enum RunbookError {
    /// No tree is registered under the requested id.
    #[error("runbook '{id}' was not found. {guidance}")]
    DiagnosticTreeNotFound { id: String, guidance: String },

    /// `build_tree` failed or produced a graph without a start step.
    #[error("failed to construct diagnostic tree '{tree}': {message}")]
    DiagnosticTreeConstructionError { tree: String, message: String },

    /// The tree cannot be registered or used (bad id, duplicate registration).
    #[error("invalid diagnostic tree '{tree}': {message}")]
    InvalidDiagnosticTree { tree: String, message: String },

    /// A step used the engine in a way the traversal contract forbids.
    #[error("invalid step operation in '{step}': {message}")]
    InvalidStepOperation { step: String, message: String },

    #[error("missing required parameter '{name}': {help}")]
    MissingParameter { name: String, help: String },

    #[error("invalid value for parameter '{name}' (expected {expected}): {message}")]
    InvalidParameter { name: String, expected: String, message: String },

    /// An operator-scoped call was made outside of any operator context.
    #[error("no operator found: step operations must run inside an operator context")]
    NoOperatorFound,

    /// A run of a batch panicked outside of any step.
    #[error("run of '{runbook}' panicked")]
    RunPanicked { runbook: String },

    #[error("unknown message template '{template}' (block '{block}')")]
    UnknownTemplate { template: String, block: String },

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Api(#[from] GcpApiError),
}

impl RunbookError {
    pub(crate) fn invalid_step(step: impl Into<String>, message: impl Into<String>) -> Self {
        RunbookError::InvalidStepOperation {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Normalized failure returned by the cloud query layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service} API request failed with status {status}: {message}")]
pub struct GcpApiError {
    /// HTTP status code reported by the backend.
    pub status: u16,
    /// API name, e.g. `compute`.
    pub service: String,
    pub message: String,
    /// Machine-readable reason, e.g. `notFound` or `forbidden`.
    pub reason: Option<String>,
}

impl GcpApiError {
    pub fn new(status: u16, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            service: service.into(),
            message: message.into(),
            reason: None,
        }
    }

    pub fn not_found(service: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(404, service, message);
        error.reason = Some("notFound".into());
        error
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Errors raised while recording or persisting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no report is open for run '{0}'")]
    UnknownRun(String),
    #[error("no step '{step}' is open in run '{run_id}'")]
    UnknownStep { run_id: String, step: String },
}
