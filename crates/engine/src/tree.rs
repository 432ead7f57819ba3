//! Diagnostic trees: the declared shape of one runbook.
//!
//! Steps live in an arena ([`StepGraph`]) and are addressed by [`StepId`].
//! `build_tree` wires the static shape through a [`TreeBuilder`]; the engine
//! grows the same graph while it runs as steps attach children dynamically.

use gcpdiag_types::StepKind;
use tracing::debug;

use crate::{
    error::RunbookError,
    parameters::{ParameterSpecs, Parameters},
    step::Step,
};

/// One runbook: a step graph plus its declared parameter contract.
///
/// `build_tree` is pure construction. It must not perform I/O; resource
/// fetching belongs in [`Step::execute`].
pub trait DiagnosticTree: Send + Sync {
    fn build_tree(&self, builder: &mut TreeBuilder) -> anyhow::Result<()>;

    /// Description shown by `list`; the first line is the summary.
    fn description(&self) -> String;

    fn parameters(&self) -> ParameterSpecs {
        ParameterSpecs::new()
    }

    /// Search terms shown next to the summary by `list`.
    fn keywords(&self) -> Vec<String> {
        Vec::new()
    }

    /// Rewrites incoming parameters before they are validated, for trees that
    /// renamed parameters over time.
    fn legacy_parameter_handler(&self, _parameters: &mut Parameters) {}

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Index of a step inside a [`StepGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

struct StepNode {
    step: Box<dyn Step>,
    kind: StepKind,
    parent: Option<StepId>,
    children: Vec<StepId>,
}

/// Arena holding every step of a tree.
#[derive(Default)]
pub struct StepGraph {
    nodes: Vec<StepNode>,
    start: Option<StepId>,
    end: Option<StepId>,
}

impl StepGraph {
    pub fn start(&self) -> Option<StepId> {
        self.start
    }

    pub fn end(&self) -> Option<StepId> {
        self.end
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn step(&self, id: StepId) -> &dyn Step {
        self.nodes[id.0].step.as_ref()
    }

    pub fn kind(&self, id: StepId) -> StepKind {
        self.nodes[id.0].kind
    }

    pub fn parent(&self, id: StepId) -> Option<StepId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: StepId) -> &[StepId] {
        &self.nodes[id.0].children
    }

    pub fn ids(&self) -> impl Iterator<Item = StepId> {
        (0..self.nodes.len()).map(StepId)
    }

    /// Steps with no parent. A well-formed tree has exactly one: its start.
    pub fn roots(&self) -> Vec<StepId> {
        self.ids().filter(|id| self.parent(*id).is_none()).collect()
    }

    /// Every step reachable from the start, in depth-first pre-order.
    pub fn reachable_from_start(&self) -> Vec<StepId> {
        let mut visited = Vec::new();
        let Some(start) = self.start else {
            return visited;
        };
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            visited.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        visited
    }

    /// Attaches `step` under `parent`, keeping the end step last among the
    /// parent's children so that it is always visited after everything else.
    pub(crate) fn attach(&mut self, parent: StepId, step: Box<dyn Step>) -> StepId {
        let kind = step.kind();
        let id = StepId(self.nodes.len());
        self.nodes.push(StepNode {
            step,
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });

        let siblings = &mut self.nodes[parent.0].children;
        let end = self.end;
        let position = siblings
            .iter()
            .position(|sibling| Some(*sibling) == end)
            .unwrap_or(siblings.len());
        siblings.insert(position, id);
        id
    }

    fn contains(&self, id: StepId) -> bool {
        id.0 < self.nodes.len()
    }
}

/// Construction API handed to [`DiagnosticTree::build_tree`].
pub struct TreeBuilder {
    graph: StepGraph,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            graph: StepGraph::default(),
        }
    }

    /// Sets the single entry point of the tree.
    pub fn add_start(&mut self, step: impl Step + 'static) -> Result<StepId, RunbookError> {
        self.add_start_boxed(Box::new(step))
    }

    pub fn add_start_boxed(&mut self, step: Box<dyn Step>) -> Result<StepId, RunbookError> {
        if self.graph.start.is_some() {
            return Err(construction("a start step was already added"));
        }
        if step.kind() != StepKind::Start {
            return Err(construction(format!(
                "'{}' is a {} step and cannot start a tree",
                step.step_id(),
                step.kind()
            )));
        }
        let id = StepId(self.graph.nodes.len());
        self.graph.nodes.push(StepNode {
            step,
            kind: StepKind::Start,
            parent: None,
            children: Vec::new(),
        });
        self.graph.start = Some(id);
        Ok(id)
    }

    /// Adds `child` under `parent`.
    pub fn add_step(&mut self, parent: StepId, child: impl Step + 'static) -> Result<StepId, RunbookError> {
        self.add_step_boxed(parent, Box::new(child))
    }

    pub fn add_step_boxed(&mut self, parent: StepId, child: Box<dyn Step>) -> Result<StepId, RunbookError> {
        if !self.graph.contains(parent) {
            return Err(construction(format!("parent step {parent:?} does not exist")));
        }
        if matches!(child.kind(), StepKind::Start | StepKind::End) {
            return Err(construction(format!(
                "'{}' is a {} step; use add_start or add_end",
                child.step_id(),
                child.kind()
            )));
        }
        Ok(self.graph.attach(parent, child))
    }

    /// Sets the terminal step, visited after every other step of the run.
    pub fn add_end(&mut self, step: impl Step + 'static) -> Result<StepId, RunbookError> {
        let Some(start) = self.graph.start else {
            return Err(construction("add_start must be called before add_end"));
        };
        if self.graph.end.is_some() {
            return Err(construction("an end step was already added"));
        }
        if step.kind() != StepKind::End {
            return Err(construction(format!("'{}' is not an end step", step.step_id())));
        }
        let id = self.graph.attach(start, Box::new(step));
        self.graph.end = Some(id);
        Ok(id)
    }

    pub fn finish(self) -> Result<StepGraph, RunbookError> {
        if self.graph.start.is_none() {
            return Err(construction("the tree has no start step"));
        }
        Ok(self.graph)
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn construction(message: impl Into<String>) -> RunbookError {
    RunbookError::DiagnosticTreeConstructionError {
        tree: String::new(),
        message: message.into(),
    }
}

/// Runs `build_tree` and validates the result, naming `tree_id` in any error.
pub fn build_diagnostic_tree(tree: &dyn DiagnosticTree, tree_id: &str) -> Result<StepGraph, RunbookError> {
    let with_tree = |error: RunbookError| match error {
        RunbookError::DiagnosticTreeConstructionError { message, .. } => RunbookError::DiagnosticTreeConstructionError {
            tree: tree_id.to_string(),
            message,
        },
        other => other,
    };

    let mut builder = TreeBuilder::new();
    tree.build_tree(&mut builder).map_err(|error| match error.downcast::<RunbookError>() {
        Ok(runbook_error) => with_tree(runbook_error),
        Err(error) => RunbookError::DiagnosticTreeConstructionError {
            tree: tree_id.to_string(),
            message: format!("{error:#}"),
        },
    })?;
    let graph = builder.finish().map_err(with_tree)?;
    debug!(tree = %tree_id, steps = graph.len(), "built diagnostic tree");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        operator::Operator,
        steps::{EndStep, StartStep},
    };

    struct Check;
    impl Step for Check {
        fn execute(&self, _op: &Operator) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fork;
    impl Step for Fork {
        fn kind(&self) -> StepKind {
            StepKind::Gateway
        }
        fn execute(&self, _op: &Operator) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn end_step_stays_last_among_start_children() {
        let mut builder = TreeBuilder::new();
        let start = builder.add_start(StartStep).unwrap();
        let first = builder.add_step(start, Check).unwrap();
        let end = builder.add_end(EndStep).unwrap();
        let second = builder.add_step(start, Fork).unwrap();
        let graph = builder.finish().unwrap();

        assert_eq!(graph.children(start), &[first, second, end]);
        assert_eq!(graph.roots(), vec![start]);
        assert_eq!(graph.reachable_from_start().len(), graph.len());
    }

    #[test]
    fn rejects_second_start_and_missing_start() {
        let mut builder = TreeBuilder::new();
        builder.add_start(StartStep).unwrap();
        assert!(builder.add_start(StartStep).is_err());

        let empty = TreeBuilder::new().finish();
        assert!(matches!(empty, Err(RunbookError::DiagnosticTreeConstructionError { .. })));
    }

    #[test]
    fn rejects_non_start_step_as_start() {
        let mut builder = TreeBuilder::new();
        assert!(builder.add_start(Check).is_err());
    }

    #[test]
    fn rejects_end_before_start_and_end_via_add_step() {
        let mut builder = TreeBuilder::new();
        assert!(builder.add_end(EndStep).is_err());
        let start = builder.add_start(StartStep).unwrap();
        assert!(builder.add_step(start, EndStep).is_err());
    }

    struct Broken;
    impl DiagnosticTree for Broken {
        fn build_tree(&self, builder: &mut TreeBuilder) -> anyhow::Result<()> {
            let start = builder.add_start(StartStep)?;
            builder.add_step(start, Check)?;
            anyhow::bail!("template catalog missing")
        }
        fn description(&self) -> String {
            "broken".into()
        }
    }

    #[test]
    fn build_errors_name_the_tree() {
        let error = build_diagnostic_tree(&Broken, "demo/broken").err().expect("construction error");
        match error {
            RunbookError::DiagnosticTreeConstructionError { tree, message } => {
                assert_eq!(tree, "demo/broken");
                assert!(message.contains("template catalog missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
