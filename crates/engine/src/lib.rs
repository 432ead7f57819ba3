//! # gcpdiag runbook engine
//!
//! Builds, validates, and runs diagnostic trees ("runbooks"): typed graphs of
//! steps that inspect cloud resources and record `ok`, `failed`,
//! `uncertain`, or `skipped` outcomes, optionally asking a human what to do
//! about each finding.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use gcpdiag_engine::{
//!     DiagnosticEngine, DiagnosticTree, EngineConfig, Operator, RunRequest, Step, TreeBuilder, TreeRegistry,
//!     output::ApiOutput,
//!     steps::{EndStep, StartStep},
//! };
//! use gcpdiag_types::{ExecutionMode, ParameterSpec, ParameterType};
//!
//! struct ProjectIsReachable;
//!
//! impl Step for ProjectIsReachable {
//!     fn execute(&self, op: &Operator) -> anyhow::Result<()> {
//!         op.add_ok(&op.project_resource(), "The project answered.")?;
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Reachability;
//!
//! impl DiagnosticTree for Reachability {
//!     fn build_tree(&self, builder: &mut TreeBuilder) -> anyhow::Result<()> {
//!         let start = builder.add_start(StartStep)?;
//!         builder.add_step(start, ProjectIsReachable)?;
//!         builder.add_end(EndStep)?;
//!         Ok(())
//!     }
//!
//!     fn description(&self) -> String {
//!         "Checks that the project answers.".into()
//!     }
//!
//!     fn parameters(&self) -> gcpdiag_engine::ParameterSpecs {
//!         let mut specs = gcpdiag_engine::ParameterSpecs::new();
//!         specs.insert("project_id".into(), ParameterSpec::new(ParameterType::String, "Project").required());
//!         specs
//!     }
//! }
//!
//! let mut registry = TreeRegistry::new();
//! registry.register::<Reachability>("demo")?;
//!
//! let config = EngineConfig { mode: ExecutionMode::NonInteractive, ..EngineConfig::default() };
//! let engine = DiagnosticEngine::new(Arc::new(registry), Arc::new(ApiOutput::new()), config);
//! let outcome = engine.run(RunRequest::new("demo/reachability").with_parameter("project_id", "my-project"))?;
//! assert!(!outcome.any_failed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`tree`** / **`step`**: the step graph, its builder, and the step contract
//! - **`operator`** / **`op`**: the per-run dynamic scope and its free-function façade
//! - **`report`**: evaluation records, per-run aggregation, and JSON persistence
//! - **`interface`** / **`output`**: outcome rendering and human prompts
//! - **`registry`**: the id → tree factory table
//! - **`runner`**: traversal, retests, batch runs

pub mod batch;
pub mod context;
pub mod error;
pub mod interface;
pub mod messages;
pub mod op;
pub mod operator;
pub mod output;
pub mod parameters;
pub mod registry;
pub mod report;
pub mod runner;
pub mod step;
pub mod steps;
pub mod tree;

pub use batch::{BatchRun, load_batch_spec, parse_batch_spec};
pub use context::Context;
pub use error::{GcpApiError, ReportError, RunbookError};
pub use interface::{InteractionInterface, Outcome};
pub use messages::MessageCatalog;
pub use operator::{ActiveStep, Operator, OperatorGuard, StepFrame, current_operator, operator_context};
pub use output::{ApiOutput, Output, OutputEvent, TerminalOutput};
pub use parameters::{ParameterSpecs, Parameters, resolve_parameters};
pub use registry::{RegisteredTree, TreeRegistry};
pub use report::{Report, ReportManager, ResourceEvaluation, StepResult, persist_report, report_file_name, write_report};
pub use runner::{DiagnosticEngine, EngineConfig, RunOutcome, RunRequest};
pub use step::Step;
pub use tree::{DiagnosticTree, StepGraph, StepId, TreeBuilder, build_diagnostic_tree};
