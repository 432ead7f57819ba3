//! The unit of diagnostic work.
//!
//! A [`Step`] reads its inputs through the [`Operator`] it is handed, records
//! zero or more outcomes, and may attach children at run time with
//! [`Operator::add_child`]. The engine attaches those children to the tree
//! after `execute` returns and visits them before moving on to the step's
//! siblings.

use gcpdiag_types::StepKind;
use heck::ToTitleCase;

use crate::operator::Operator;

/// A node of a diagnostic tree.
pub trait Step: Send + Sync {
    /// Performs the check (or branching decision) this step is responsible for.
    ///
    /// Checks call exactly one of `add_ok`, `add_failed`, `add_uncertain`, or
    /// `add_skipped` per evaluated resource. Gateways and composite steps
    /// usually record nothing and only add children.
    fn execute(&self, op: &Operator) -> anyhow::Result<()>;

    fn kind(&self) -> StepKind {
        StepKind::Step
    }

    /// Human-readable name; when `None` the template's `step_name` block or the
    /// type name is used.
    fn label(&self) -> Option<String> {
        None
    }

    /// Message catalog key whose blocks this step renders with `prep_msg`.
    fn template(&self) -> Option<&str> {
        None
    }

    /// Fully qualified Rust type name of the concrete step.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Stable, dotted identifier of the step type, e.g. `gcpdiag.runbooks.gce.VmStatusGateway`.
    fn step_id(&self) -> String {
        strip_generics(self.type_name()).replace("::", ".")
    }
}

/// Last path segment of a type name with any generic arguments removed.
pub(crate) fn short_type_name(type_name: &str) -> &str {
    let base = strip_generics(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

fn strip_generics(type_name: &str) -> &str {
    type_name.split('<').next().unwrap_or(type_name)
}

/// Splits a PascalCase type name into a sentence, e.g. `VmStatusGateway` → `Vm status gateway`.
/// Acronyms keep their capitals: `VmSSHGateway` → `Vm SSH gateway`.
pub(crate) fn humanize_type_name(type_name: &str) -> String {
    let short = short_type_name(type_name);
    let mut rest = short;
    short
        .to_title_case()
        .split(' ')
        .filter(|word| !word.is_empty())
        .enumerate()
        .map(|(index, word)| {
            rest = rest.trim_start_matches('_');
            let original = rest.get(..word.len()).unwrap_or(word);
            rest = rest.get(word.len()..).unwrap_or_default();
            let is_acronym = original.len() > 1 && original.chars().all(char::is_uppercase);
            if is_acronym {
                original.to_string()
            } else if index == 0 {
                word.to_string()
            } else {
                word.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
