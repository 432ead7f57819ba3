//! Runs diagnostic trees.
//!
//! For one request the engine instantiates the tree, validates parameters,
//! builds the step graph, and walks it depth-first: a step's `execute` runs
//! before its children are visited, children a step adds at run time are
//! visited before the step's siblings, and the end step comes last.
//!
//! Failures inside a step never escape as raw errors. A step that returns an
//! error is recorded as skipped and its subtree is not visited; a step that
//! panics is recorded as failed. Traversal then continues with the next
//! sibling. Only [`RunbookError::InvalidStepOperation`] aborts the run.

use std::{
    any::Any,
    io::{self, Write},
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
};

use gcpdiag_types::{ExecutionMode, Status};
use gcpdiag_util::{RunbookConfig, sanitize_file_component};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    context::Context,
    error::{GcpApiError, RunbookError},
    interface::{InteractionInterface, Outcome},
    messages::MessageCatalog,
    operator::{Operator, StepFrame, operator_context},
    output::Output,
    parameters::{Parameters, resolve_parameters},
    report::{Report, ReportManager, persist_report},
    registry::TreeRegistry,
    step::Step,
    tree::{StepGraph, StepId, build_diagnostic_tree},
};

/// Engine settings derived from the user's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    /// Directory for JSON reports of runs with failures; `None` disables writing.
    pub report_dir: Option<PathBuf>,
    /// How often one step may be re-run on a RETEST answer.
    pub max_retests: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Interactive,
            report_dir: None,
            max_retests: gcpdiag_util::config::DEFAULT_MAX_RETESTS,
        }
    }
}

impl From<&RunbookConfig> for EngineConfig {
    fn from(config: &RunbookConfig) -> Self {
        Self {
            mode: ExecutionMode::from_auto(config.auto),
            report_dir: config.report_dir.clone(),
            max_retests: config.max_retests,
        }
    }
}

/// What to run and against which scope.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub runbook: String,
    /// Scope of the run. An empty project id is taken from the `project_id` parameter.
    pub context: Context,
    /// Raw parameters, validated against the tree's declared contract.
    pub parameters: Parameters,
}

impl RunRequest {
    pub fn new(runbook: impl Into<String>) -> Self {
        Self {
            runbook: runbook.into(),
            context: Context::default(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters.extend(parameters);
        self
    }
}

/// Result of one completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    /// Where the JSON report was written, if it was.
    pub report_path: Option<PathBuf>,
}

impl RunOutcome {
    pub fn any_failed(&self) -> bool {
        self.report.any_failed()
    }
}

enum StepExecution {
    Completed(StepFrame),
    /// The step errored; its subtree is not visited.
    Aborted,
}

/// Orchestrates runs of registered trees.
pub struct DiagnosticEngine {
    registry: Arc<TreeRegistry>,
    output: Arc<dyn Output>,
    reports: Arc<ReportManager>,
    messages: Arc<MessageCatalog>,
    config: EngineConfig,
    report_fallback: Mutex<Box<dyn Write + Send>>,
}

impl DiagnosticEngine {
    pub fn new(registry: Arc<TreeRegistry>, output: Arc<dyn Output>, config: EngineConfig) -> Self {
        Self {
            registry,
            output,
            reports: Arc::new(ReportManager::new()),
            messages: Arc::new(MessageCatalog::new()),
            config,
            report_fallback: Mutex::new(Box::new(io::stderr())),
        }
    }

    pub fn with_messages(mut self, messages: MessageCatalog) -> Self {
        self.messages = Arc::new(messages);
        self
    }

    /// Where a report goes when the report directory cannot be written.
    pub fn with_report_fallback(mut self, writer: impl Write + Send + 'static) -> Self {
        self.report_fallback = Mutex::new(Box::new(writer));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TreeRegistry {
        &self.registry
    }

    pub fn reports(&self) -> &ReportManager {
        &self.reports
    }

    /// Id → one-line description of every registered tree.
    pub fn list_trees(&self) -> IndexMap<String, String> {
        self.registry.list()
    }

    /// Runs one tree to completion.
    ///
    /// Lookup, construction, and parameter errors are returned before any step
    /// executes.
    pub fn run(&self, request: RunRequest) -> Result<RunOutcome, RunbookError> {
        self.run_in_mode(request, self.config.mode)
    }

    fn run_in_mode(&self, request: RunRequest, mode: ExecutionMode) -> Result<RunOutcome, RunbookError> {
        let registered = self.registry.get(&request.runbook)?;
        let runbook = registered.id.clone();
        let tree = registered.instantiate();

        let mut graph = build_diagnostic_tree(tree.as_ref(), &runbook)?;

        let RunRequest {
            mut context,
            mut parameters,
            ..
        } = request;
        tree.legacy_parameter_handler(&mut parameters);
        let has_project = parameters.keys().any(|key| key.eq_ignore_ascii_case("project_id"));
        if !context.project_id.is_empty() && !has_project {
            parameters.insert("project_id".into(), Value::String(context.project_id.clone()));
        }
        let specs = tree.parameters();
        let parameters = resolve_parameters(&specs, &parameters)?;
        if context.project_id.is_empty()
            && let Some(Value::String(project_id)) = parameters.get("project_id")
        {
            context.project_id = project_id.clone();
        }
        let context = context.with_parameters(parameters.clone());

        let uuid = Uuid::new_v4().simple().to_string();
        let run_id = format!("{}-{}", sanitize_file_component(&runbook), &uuid[..8]);
        self.reports
            .create(Report::new(&run_id, &runbook, parameters, mode));

        let interface = Arc::new(InteractionInterface::new(
            &run_id,
            mode,
            Arc::clone(&self.output),
            Arc::clone(&self.reports),
        ));
        let operator = Operator::new(&runbook, context, specs, Arc::clone(&self.messages), Arc::clone(&interface));

        info!(runbook = %runbook, run_id = %run_id, mode = ?mode, "starting runbook");
        let traversal = {
            let _scope = operator_context(&operator);
            self.traverse(&mut graph, &operator)
        };
        if let Err(error) = traversal {
            error!(runbook = %runbook, run_id = %run_id, error = %error, "runbook aborted");
            let _ = self.reports.finish(&run_id);
            return Err(error);
        }

        interface.print_summary(&runbook)?;
        let report = self.reports.finish(&run_id)?;
        info!(
            runbook = %runbook,
            run_id = %run_id,
            evaluations = report.evaluation_count(),
            failed = report.any_failed(),
            "runbook finished"
        );

        let report_path = match (&self.config.report_dir, report.any_failed()) {
            (Some(directory), true) => {
                let mut fallback = self.report_fallback.lock().expect("report fallback lock poisoned");
                persist_report(&report, directory, fallback.as_mut())
            }
            _ => None,
        };
        Ok(RunOutcome { report, report_path })
    }

    /// Runs every request on its own thread and returns the outcomes in input order.
    ///
    /// Concurrent runs share one renderer, so batch runs never prompt: every
    /// run executes in [`ExecutionMode::NonInteractive`] whatever the
    /// configured mode.
    pub fn run_batch(&self, requests: Vec<RunRequest>) -> Vec<Result<RunOutcome, RunbookError>> {
        if !self.config.mode.is_auto() {
            warn!("batch runs do not prompt; running every runbook in auto mode");
        }
        info!(runs = requests.len(), "starting batch");
        thread::scope(|scope| {
            let handles: Vec<_> = requests
                .into_iter()
                .map(|request| {
                    let runbook = request.runbook.clone();
                    (runbook, scope.spawn(move || self.run_in_mode(request, ExecutionMode::NonInteractive)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(runbook, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(runbook = %runbook, "batch run panicked");
                        Err(RunbookError::RunPanicked { runbook })
                    })
                })
                .collect()
        })
    }

    fn traverse(&self, graph: &mut StepGraph, op: &Operator) -> Result<(), RunbookError> {
        let start = graph.start().ok_or_else(|| RunbookError::InvalidDiagnosticTree {
            tree: op.runbook().to_string(),
            message: "the tree has no start step".into(),
        })?;
        self.visit(graph, start, op)
    }

    fn visit(&self, graph: &mut StepGraph, id: StepId, op: &Operator) -> Result<(), RunbookError> {
        let mut retests: u32 = 0;
        let children = loop {
            match self.execute_step(graph.step(id), op, self.config.max_retests.saturating_sub(retests))? {
                StepExecution::Completed(frame) if frame.retest_requested() && retests < self.config.max_retests => {
                    retests += 1;
                    info!(run_id = %op.run_id(), step = %frame.step_id, attempt = retests + 1, "retesting step");
                }
                StepExecution::Completed(frame) => break Some(frame.into_children()),
                StepExecution::Aborted => break None,
            }
        };
        let Some(children) = children else {
            return Ok(());
        };

        for child in children {
            graph.attach(id, child);
        }
        for child in graph.children(id).to_vec() {
            self.visit(graph, child, op)?;
        }
        Ok(())
    }

    fn execute_step(&self, step: &dyn Step, op: &Operator, retests_left: u32) -> Result<StepExecution, RunbookError> {
        let execution_id = op.begin_step(step)?;
        op.set_retests_left(retests_left)?;
        debug!(run_id = %op.run_id(), step = %execution_id, kind = %step.kind(), "executing step");

        let aborted = match panic::catch_unwind(AssertUnwindSafe(|| step.execute(op))) {
            Ok(Ok(())) => false,
            Ok(Err(error)) => {
                let error = match error.downcast::<RunbookError>() {
                    Ok(invalid @ RunbookError::InvalidStepOperation { .. }) => {
                        op.end_step()?;
                        return Err(invalid);
                    }
                    Ok(other) => anyhow::Error::new(other),
                    Err(error) => error,
                };
                warn!(run_id = %op.run_id(), step = %execution_id, error = %format!("{error:#}"), "step failed; skipping its subtree");
                let reason = match error.downcast_ref::<GcpApiError>() {
                    Some(api_error) => format!("The step could not query the {} API: {}", api_error.service, api_error.message),
                    None => format!("The step could not complete: {error:#}"),
                };
                op.add_outcome(Outcome::new(Status::Skipped, Some(op.project_resource()), reason))?;
                true
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(run_id = %op.run_id(), step = %execution_id, panic = %message, "step panicked");
                op.add_outcome(
                    Outcome::new(Status::Failed, Some(op.project_resource()), format!("The step crashed: {message}"))
                        .with_remediation("This is a defect in the runbook. Report it together with the generated report.")
                        .without_prompt(),
                )?;
                true
            }
        };

        let frame = op
            .end_step()?
            .ok_or_else(|| RunbookError::invalid_step(&execution_id, "the step frame was removed during execution"))?;
        Ok(if aborted {
            StepExecution::Aborted
        } else {
            StepExecution::Completed(frame)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
