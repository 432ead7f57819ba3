//! Explicit table of the diagnostic trees a binary ships.
//!
//! Trees are registered under `product/kebab-case-name`; the name is derived
//! from the tree's type name, so `VmRunningState` registered for `gce` is
//! reachable as `gce/vm-running-state`.

use std::sync::Arc;

use gcpdiag_util::{camel_to_kebab, normalize_runbook_id};
use indexmap::IndexMap;
use tracing::debug;

use crate::{error::RunbookError, step::short_type_name, tree::DiagnosticTree};

type TreeFactory = Arc<dyn Fn() -> Box<dyn DiagnosticTree> + Send + Sync>;

/// One registered tree.
#[derive(Clone)]
pub struct RegisteredTree {
    pub id: String,
    pub product: String,
    factory: TreeFactory,
}

impl RegisteredTree {
    pub fn instantiate(&self) -> Box<dyn DiagnosticTree> {
        (self.factory)()
    }

    /// First line of the tree's description.
    pub fn summary(&self) -> String {
        self.instantiate().description().lines().next().unwrap_or_default().trim().to_string()
    }

    pub fn keywords(&self) -> Vec<String> {
        self.instantiate().keywords()
    }
}

/// Registered trees keyed by normalized id, in registration order.
#[derive(Clone, Default)]
pub struct TreeRegistry {
    trees: IndexMap<String, RegisteredTree>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `product`, deriving the name from the type name.
    /// Returns the id.
    pub fn register<T>(&mut self, product: &str) -> Result<String, RunbookError>
    where
        T: DiagnosticTree + Default + 'static,
    {
        let id = format!("{}/{}", camel_to_kebab(product), camel_to_kebab(short_type_name(std::any::type_name::<T>())));
        self.register_with(&id, || Box::new(T::default()))?;
        Ok(id)
    }

    /// Registers a factory under an explicit `product/name` id.
    pub fn register_with<F>(&mut self, id: &str, factory: F) -> Result<(), RunbookError>
    where
        F: Fn() -> Box<dyn DiagnosticTree> + Send + Sync + 'static,
    {
        let normalized = normalize_runbook_id(id);
        let Some((product, name)) = normalized.split_once('/') else {
            return Err(RunbookError::InvalidDiagnosticTree {
                tree: id.to_string(),
                message: "ids have the form <product>/<kebab-case-name>".into(),
            });
        };
        if name.contains('/') {
            return Err(RunbookError::InvalidDiagnosticTree {
                tree: id.to_string(),
                message: "ids have exactly one '/' separating product and name".into(),
            });
        }
        if self.trees.contains_key(&normalized) {
            return Err(RunbookError::InvalidDiagnosticTree {
                tree: normalized,
                message: "a tree is already registered under this id".into(),
            });
        }

        debug!(runbook = %normalized, "registered diagnostic tree");
        self.trees.insert(
            normalized.clone(),
            RegisteredTree {
                product: product.to_string(),
                id: normalized,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Looks a tree up; the id is normalized first, so `gce/VmRunningState` works too.
    pub fn get(&self, id: &str) -> Result<&RegisteredTree, RunbookError> {
        let normalized = normalize_runbook_id(id);
        self.trees
            .get(&normalized)
            .ok_or_else(|| RunbookError::DiagnosticTreeNotFound {
                guidance: self.not_found_guidance(&normalized),
                id: id.to_string(),
            })
    }

    pub fn instantiate(&self, id: &str) -> Result<Box<dyn DiagnosticTree>, RunbookError> {
        Ok(self.get(id)?.instantiate())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.trees.contains_key(&normalize_runbook_id(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    pub fn trees(&self) -> impl Iterator<Item = &RegisteredTree> {
        self.trees.values()
    }

    /// Id → one-line description, in registration order.
    pub fn list(&self) -> IndexMap<String, String> {
        self.trees.values().map(|tree| (tree.id.clone(), tree.summary())).collect()
    }

    pub fn list_product(&self, product: &str) -> IndexMap<String, String> {
        let product = camel_to_kebab(product);
        self.trees
            .values()
            .filter(|tree| tree.product == product)
            .map(|tree| (tree.id.clone(), tree.summary()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    fn not_found_guidance(&self, normalized: &str) -> String {
        let convention = "Runbook ids have the form <product>/<kebab-case-name>: a tree type `FooBarRunbook` \
                          registered for product `foo` is run as `foo/foo-bar-runbook`.";
        let product = normalized.split('/').next().unwrap_or_default();
        let same_product: Vec<&str> = self
            .trees
            .values()
            .filter(|tree| tree.product == product)
            .map(|tree| tree.id.as_str())
            .collect();
        if !same_product.is_empty() {
            return format!("{convention} Runbooks for '{product}': {}.", same_product.join(", "));
        }

        let mut products: Vec<&str> = self.trees.values().map(|tree| tree.product.as_str()).collect();
        products.sort_unstable();
        products.dedup();
        if products.is_empty() {
            format!("{convention} No runbooks are registered.")
        } else {
            format!("{convention} Known products: {}.", products.join(", "))
        }
    }
}
