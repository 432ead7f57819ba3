//! Strongly typed runbook vocabulary shared across the engine and the CLI.
//!
//! Everything here is plain data: statuses, resource references, prompt
//! kinds and answers, declared parameter contracts, and the JSON report
//! document. Behaviour lives in `gcpdiag-engine`.

pub mod parameter;
pub mod report;
pub mod runbook;

pub use parameter::{ParameterSpec, ParameterType, ParseParameterTypeError};
pub use report::{ReportDocument, ReportEntry};
pub use runbook::{ExecutionMode, PromptKind, PromptRequest, PromptResponse, Resource, ResourceRef, Status, StepKind};
