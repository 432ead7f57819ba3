//! The per-run handle a step works through.
//!
//! An [`Operator`] binds the run's [`Context`], its live parameter mapping,
//! the step currently executing, the message catalog, and the
//! [`InteractionInterface`]. The engine passes it to [`Step::execute`]
//! explicitly and also installs it as the thread's current operator with
//! [`operator_context`], so helper code deep inside a step can reach it
//! through [`current_operator`] or the free functions in [`crate::op`].

use std::{
    cell::RefCell,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use gcpdiag_types::{ExecutionMode, PromptRequest, PromptResponse, Resource, ResourceRef, Status, StepKind};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    context::Context,
    error::RunbookError,
    interface::{InteractionInterface, Outcome},
    messages::{MessageCatalog, STEP_NAME},
    parameters::{ParameterSpecs, Parameters},
    step::{Step, humanize_type_name},
};

/// Bookkeeping for the step that is currently executing.
pub struct StepFrame {
    pub execution_id: String,
    pub step_id: String,
    pub name: String,
    pub kind: StepKind,
    pub template: Option<String>,
    recorded: usize,
    children: Vec<Box<dyn Step>>,
    retest_requested: bool,
    retests_left: u32,
    prompt_responses: Vec<PromptResponse>,
}

impl StepFrame {
    /// Frame for `step` with a fresh execution id, named by its label or type.
    pub fn for_step(step: &dyn Step) -> Self {
        let step_id = step.step_id();
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            execution_id: format!("{step_id}.{}", &uuid[..8]),
            name: step.label().unwrap_or_else(|| humanize_type_name(step.type_name())),
            step_id,
            kind: step.kind(),
            template: step.template().map(str::to_string),
            recorded: 0,
            children: Vec::new(),
            retest_requested: false,
            retests_left: 0,
            prompt_responses: Vec::new(),
        }
    }

    /// Number of outcomes recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn children(&self) -> &[Box<dyn Step>] {
        &self.children
    }

    pub fn into_children(self) -> Vec<Box<dyn Step>> {
        self.children
    }

    pub fn child_type_names(&self) -> Vec<&'static str> {
        self.children.iter().map(|child| child.type_name()).collect()
    }

    pub fn retest_requested(&self) -> bool {
        self.retest_requested
    }

    /// How many more times a RETEST answer re-runs this step.
    pub fn retests_left(&self) -> u32 {
        self.retests_left
    }

    pub fn prompt_responses(&self) -> &[PromptResponse] {
        &self.prompt_responses
    }
}

/// Identity of the active step, as seen by code running inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStep {
    pub execution_id: String,
    pub step_id: String,
    pub name: String,
    pub kind: StepKind,
}

struct OperatorInner {
    run_id: String,
    runbook: String,
    context: Context,
    parameters: Mutex<Parameters>,
    specs: ParameterSpecs,
    frame: Mutex<Option<StepFrame>>,
    messages: Arc<MessageCatalog>,
    interface: Arc<InteractionInterface>,
}

/// Cheaply clonable handle to one run's dynamic scope.
#[derive(Clone)]
pub struct Operator {
    inner: Arc<OperatorInner>,
}

impl Operator {
    /// Creates the operator for a run. The live parameter mapping starts as a
    /// copy of `context.parameters`.
    pub fn new(
        runbook: impl Into<String>,
        context: Context,
        specs: ParameterSpecs,
        messages: Arc<MessageCatalog>,
        interface: Arc<InteractionInterface>,
    ) -> Self {
        let parameters = context.parameters.clone();
        Self {
            inner: Arc::new(OperatorInner {
                run_id: interface.run_id().to_string(),
                runbook: runbook.into(),
                context,
                parameters: Mutex::new(parameters),
                specs,
                frame: Mutex::new(None),
                messages,
                interface,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn runbook(&self) -> &str {
        &self.inner.runbook
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn interface(&self) -> &InteractionInterface {
        &self.inner.interface
    }

    pub fn messages(&self) -> &MessageCatalog {
        &self.inner.messages
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.interface.mode()
    }

    pub fn is_auto(&self) -> bool {
        self.mode().is_auto()
    }

    /// The project as a resource, for outcomes that are not about one resource.
    pub fn project_resource(&self) -> ResourceRef {
        let project_id = &self.inner.context.project_id;
        ResourceRef::new(format!("projects/{project_id}"), project_id.clone())
    }

    // Parameters

    /// Looks `key` up in the live parameters, falling back to its declared default.
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = key.to_lowercase();
        let explicit = {
            let parameters = self.inner.parameters.lock().expect("parameter lock poisoned");
            parameters.get(&key).filter(|value| !value.is_null()).cloned()
        };
        explicit.or_else(|| self.inner.specs.get(&key).and_then(|spec| spec.default.clone()))
    }

    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// The value as text; numbers and booleans are formatted.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(flag) => Some(flag),
            Value::String(text) => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(true),
                "false" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Publishes `value` under `key` for every step that runs afterwards.
    pub fn put(&self, key: &str, value: impl Into<Value>) {
        let key = key.to_lowercase();
        let value = value.into();
        debug!(run_id = %self.inner.run_id, parameter = %key, "parameter updated by step");
        self.inner
            .parameters
            .lock()
            .expect("parameter lock poisoned")
            .insert(key, value);
    }

    /// Snapshot of the live parameter mapping.
    pub fn parameters(&self) -> Parameters {
        self.inner.parameters.lock().expect("parameter lock poisoned").clone()
    }

    // Step tracking

    /// Installs `frame` as the active step and returns the frame it replaced.
    pub fn set_step(&self, frame: StepFrame) -> Option<StepFrame> {
        self.inner.frame.lock().expect("step frame lock poisoned").replace(frame)
    }

    pub fn take_step(&self) -> Option<StepFrame> {
        self.inner.frame.lock().expect("step frame lock poisoned").take()
    }

    pub fn step(&self) -> Option<ActiveStep> {
        let frame = self.inner.frame.lock().expect("step frame lock poisoned");
        frame.as_ref().map(|frame| ActiveStep {
            execution_id: frame.execution_id.clone(),
            step_id: frame.step_id.clone(),
            name: frame.name.clone(),
            kind: frame.kind,
        })
    }

    /// Activates `step`, opens its result in the report, and announces it.
    /// Returns the execution id.
    pub fn begin_step(&self, step: &dyn Step) -> Result<String, RunbookError> {
        let mut frame = StepFrame::for_step(step);
        if step.label().is_none()
            && let Some(template) = frame.template.as_deref()
            && let Ok(name) = self.render(template, STEP_NAME, &[])
        {
            frame.name = name;
        }
        let execution_id = frame.execution_id.clone();
        let (step_id, name, kind) = (frame.step_id.clone(), frame.name.clone(), frame.kind);
        if let Some(previous) = self.set_step(frame) {
            warn!(run_id = %self.inner.run_id, step = %previous.execution_id, "replacing a step that was never finished");
        }
        self.inner.interface.start_step(&execution_id, &step_id, &name, kind)?;
        Ok(execution_id)
    }

    /// Deactivates the current step, stamps its end time, and hands back its frame.
    pub fn end_step(&self) -> Result<Option<StepFrame>, RunbookError> {
        let Some(frame) = self.take_step() else {
            return Ok(None);
        };
        self.inner.interface.finish_step(&frame.execution_id)?;
        Ok(Some(frame))
    }

    pub(crate) fn set_retests_left(&self, retests_left: u32) -> Result<(), RunbookError> {
        self.with_frame("set_retests_left", |frame| {
            frame.retests_left = retests_left;
            Ok(())
        })
    }

    /// True when a RETEST answer will not run the active step again.
    pub fn is_final_attempt(&self) -> bool {
        let frame = self.inner.frame.lock().expect("step frame lock poisoned");
        frame.as_ref().is_none_or(|frame| frame.retests_left == 0)
    }

    fn with_frame<R>(
        &self,
        operation: &str,
        apply: impl FnOnce(&mut StepFrame) -> Result<R, RunbookError>,
    ) -> Result<R, RunbookError> {
        let mut frame = self.inner.frame.lock().expect("step frame lock poisoned");
        match frame.as_mut() {
            Some(frame) => apply(frame),
            None => Err(RunbookError::invalid_step(
                "<none>",
                format!("{operation} called while no step is executing"),
            )),
        }
    }

    fn note_response(&self, response: &PromptResponse) {
        let mut frame = self.inner.frame.lock().expect("step frame lock poisoned");
        if let Some(frame) = frame.as_mut() {
            if *response == PromptResponse::Retest {
                frame.retest_requested = true;
            }
            frame.prompt_responses.push(response.clone());
        }
    }

    // Outcomes

    /// Records `outcome` against the active step.
    pub fn add_outcome(&self, outcome: Outcome) -> Result<Option<PromptResponse>, RunbookError> {
        let execution_id = self.with_frame("recording an outcome", |frame| {
            frame.recorded += 1;
            Ok(frame.execution_id.clone())
        })?;
        let response = self.inner.interface.record(&execution_id, outcome)?;
        if let Some(response) = &response {
            self.note_response(response);
        }
        Ok(response)
    }

    pub fn add_ok(&self, resource: &dyn Resource, reason: impl Into<String>) -> Result<(), RunbookError> {
        self.add_outcome(Outcome::new(Status::Ok, Some(resource.to_resource_ref()), reason))?;
        Ok(())
    }

    pub fn add_failed(
        &self,
        resource: &dyn Resource,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Result<(), RunbookError> {
        self.add_outcome(Outcome::new(Status::Failed, Some(resource.to_resource_ref()), reason).with_remediation(remediation))?;
        Ok(())
    }

    /// [`add_failed`](Self::add_failed) with a custom message for the follow-up prompt.
    pub fn add_failed_with_task(
        &self,
        resource: &dyn Resource,
        reason: impl Into<String>,
        remediation: impl Into<String>,
        human_task_msg: impl Into<String>,
    ) -> Result<Option<PromptResponse>, RunbookError> {
        self.add_outcome(
            Outcome::new(Status::Failed, Some(resource.to_resource_ref()), reason)
                .with_remediation(remediation)
                .with_human_task_msg(human_task_msg),
        )
    }

    pub fn add_uncertain(
        &self,
        resource: &dyn Resource,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Result<(), RunbookError> {
        self.add_outcome(Outcome::new(Status::Uncertain, Some(resource.to_resource_ref()), reason).with_remediation(remediation))?;
        Ok(())
    }

    pub fn add_skipped(&self, resource: &dyn Resource, reason: impl Into<String>) -> Result<(), RunbookError> {
        self.add_outcome(Outcome::new(Status::Skipped, Some(resource.to_resource_ref()), reason))?;
        Ok(())
    }

    /// Schedules `child` to run right after the active step, before the
    /// step's siblings.
    ///
    /// Fails once the active step has recorded an outcome, and for start or
    /// end steps, which only tree construction may place.
    pub fn add_child(&self, child: impl Step + 'static) -> Result<(), RunbookError> {
        self.add_child_boxed(Box::new(child))
    }

    pub fn add_child_boxed(&self, child: Box<dyn Step>) -> Result<(), RunbookError> {
        self.with_frame("add_child", |frame| {
            if frame.recorded > 0 {
                return Err(RunbookError::invalid_step(
                    &frame.execution_id,
                    format!("cannot add child '{}' after the step recorded an outcome", child.step_id()),
                ));
            }
            if matches!(child.kind(), StepKind::Start | StepKind::End) {
                return Err(RunbookError::invalid_step(
                    &frame.execution_id,
                    format!("'{}' is a {} step and cannot be added at run time", child.step_id(), child.kind()),
                ));
            }
            debug!(step = %frame.execution_id, child = %child.step_id(), "queued child step");
            frame.children.push(child);
            Ok(())
        })
    }

    // Interaction

    /// Asks the human. Auto runs answer `NoAnswer` without prompting.
    pub fn prompt(&self, request: &PromptRequest) -> Result<PromptResponse, RunbookError> {
        let execution_id = self.step().map(|step| step.execution_id);
        let response = self.inner.interface.prompt(execution_id.as_deref(), request)?;
        self.note_response(&response);
        Ok(response)
    }

    pub fn info(&self, message: &str) {
        self.inner.interface.info(message);
    }

    // Messages

    /// Renders `block` of the active step's template. Placeholders are filled
    /// from `args` first, then from the run's parameters.
    pub fn prep_msg(&self, block: &str, args: &[(&str, &str)]) -> Result<String, RunbookError> {
        let template = {
            let frame = self.inner.frame.lock().expect("step frame lock poisoned");
            frame.as_ref().and_then(|frame| frame.template.clone())
        };
        let template = template.ok_or_else(|| RunbookError::UnknownTemplate {
            template: "<none>".into(),
            block: block.to_string(),
        })?;
        self.render(&template, block, args)
    }

    /// Renders `block` of an explicit `template`.
    pub fn render(&self, template: &str, block: &str, args: &[(&str, &str)]) -> Result<String, RunbookError> {
        self.inner.messages.render(template, block, |name| {
            args.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .or_else(|| self.get_str(name))
        })
    }
}

thread_local! {
    static ACTIVE_OPERATORS: RefCell<Vec<Operator>> = const { RefCell::new(Vec::new()) };
}

/// Restores the thread's previous operator when dropped, including during unwinding.
#[must_use = "the operator is uninstalled as soon as the guard is dropped"]
pub struct OperatorGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for OperatorGuard {
    fn drop(&mut self) {
        let _ = ACTIVE_OPERATORS.try_with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Makes `operator` the current operator of this thread until the guard drops.
/// Scopes nest; each thread has its own stack.
pub fn operator_context(operator: &Operator) -> OperatorGuard {
    let depth = ACTIVE_OPERATORS.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(operator.clone());
        stack.len() - 1
    });
    OperatorGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// The innermost operator installed on this thread.
pub fn current_operator() -> Result<Operator, RunbookError> {
    ACTIVE_OPERATORS
        .with(|stack| stack.borrow().last().cloned())
        .ok_or(RunbookError::NoOperatorFound)
}

#[cfg(test)]
mod tests {
    use gcpdiag_types::{ParameterSpec, ParameterType};
    use serde_json::json;

    use super::*;
    use crate::{
        output::{ApiOutput, Output},
        report::{Report, ReportManager},
    };

    fn operator(run_id: &str) -> Operator {
        let reports = Arc::new(ReportManager::new());
        reports.create(Report::new(run_id, "demo/tree", Parameters::new(), ExecutionMode::NonInteractive));
        let output: Arc<dyn Output> = Arc::new(ApiOutput::new());
        let interface = Arc::new(InteractionInterface::new(run_id, ExecutionMode::NonInteractive, output, reports));
        let mut specs = ParameterSpecs::new();
        specs.insert("zone".into(), ParameterSpec::new(ParameterType::String, "zone").default_value("us-central1-a"));
        let mut messages = MessageCatalog::new();
        messages.insert("demo::check", "failure_reason", "{name} is {state} in {zone}");
        let context = Context::new("demo").with_parameters(Parameters::from([("name".to_string(), json!("vm-1"))]));
        Operator::new("demo/tree", context, specs, Arc::new(messages), interface)
    }

    struct Check;
    impl Step for Check {
        fn template(&self) -> Option<&str> {
            Some("demo::check")
        }
        fn execute(&self, _op: &Operator) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn get_falls_back_to_declared_default_and_sees_put() {
        let op = operator("run");
        assert_eq!(op.get("zone"), Some(json!("us-central1-a")));
        assert_eq!(op.get("missing"), None);
        op.put("ZONE", "europe-west1-b");
        assert_eq!(op.get_str("zone").as_deref(), Some("europe-west1-b"));
        op.put("count", 3);
        assert_eq!(op.get_i64("count"), Some(3));
    }

    #[test]
    fn prep_msg_uses_args_then_parameters() {
        let op = operator("run");
        op.begin_step(&Check).expect("begin");
        let message = op.prep_msg("failure_reason", &[("state", "TERMINATED")]).expect("render");
        assert_eq!(message, "vm-1 is TERMINATED in us-central1-a");
    }

    #[test]
    fn add_child_after_outcome_is_invalid() {
        let op = operator("run");
        op.begin_step(&Check).expect("begin");
        op.add_child(Check).expect("child before outcome");
        op.add_ok(&op.project_resource(), "fine").expect("ok");
        let error = op.add_child(Check).expect_err("child after outcome");
        assert!(matches!(error, RunbookError::InvalidStepOperation { .. }));
        let frame = op.end_step().expect("end").expect("frame");
        assert_eq!(frame.children().len(), 1);
    }

    #[test]
    fn outcomes_outside_a_step_are_invalid() {
        let op = operator("run");
        let error = op.add_ok(&op.project_resource(), "fine").expect_err("no step");
        assert!(matches!(error, RunbookError::InvalidStepOperation { .. }));
    }

    #[test]
    fn no_operator_outside_of_a_scope() {
        assert!(matches!(current_operator(), Err(RunbookError::NoOperatorFound)));
    }

    #[test]
    fn nested_scopes_restore_the_outer_operator() {
        let outer = operator("outer");
        let inner = operator("inner");
        let _outer_guard = operator_context(&outer);
        {
            let _inner_guard = operator_context(&inner);
            assert_eq!(current_operator().expect("inner").run_id(), "inner");
        }
        assert_eq!(current_operator().expect("outer").run_id(), "outer");
    }

    #[test]
    fn panics_inside_a_scope_restore_the_outer_operator() {
        let outer = operator("outer");
        let inner = operator("inner");
        let _outer_guard = operator_context(&outer);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _inner_guard = operator_context(&inner);
            panic!("step blew up");
        }));
        assert!(result.is_err());
        assert_eq!(current_operator().expect("outer").run_id(), "outer");
    }
}
