//! Identifies what a run is diagnosing.

use indexmap::IndexMap;
use regex::Regex;

use crate::{error::RunbookError, parameters::Parameters};

/// Project and resource scope of a single run.
///
/// The scope fields are fixed once the run starts. `parameters` holds the
/// validated parameters the run was started with; the live, step-mutable copy
/// is owned by the [`Operator`](crate::operator::Operator).
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub project_id: String,
    /// Regions or zones to restrict the diagnosis to; empty means all.
    pub locations: Vec<String>,
    /// Label selectors a resource must carry; empty means any.
    pub labels: IndexMap<String, String>,
    /// Resource name patterns; empty means any.
    resources: Vec<Regex>,
    pub parameters: Parameters,
}

impl Context {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = locations.into_iter().map(|location| location.into().to_lowercase()).collect();
        self
    }

    pub fn with_labels(mut self, labels: IndexMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Restricts the run to resources whose names match one of `patterns`.
    pub fn with_resource_patterns<I, S>(mut self, patterns: I) -> Result<Self, RunbookError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|error| RunbookError::InvalidParameter {
                name: "resources".into(),
                expected: "regular expression".into(),
                message: format!("'{pattern}': {error}"),
            })?;
            compiled.push(regex);
        }
        self.resources = compiled;
        Ok(self)
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn resource_patterns(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(Regex::as_str)
    }

    /// Returns true when a resource at `location` named `name` with `labels`
    /// falls inside this run's scope.
    ///
    /// A region filter also admits the zones of that region, so `us-central1`
    /// matches `us-central1-a`.
    pub fn matches_resource(&self, location: Option<&str>, labels: &IndexMap<String, String>, name: &str) -> bool {
        let location_matches = match (self.locations.is_empty(), location) {
            (true, _) => true,
            (false, None) => false,
            (false, Some(location)) => {
                let location = location.to_lowercase();
                self.locations
                    .iter()
                    .any(|filter| location == *filter || location.starts_with(&format!("{filter}-")))
            }
        };

        let labels_match = self
            .labels
            .iter()
            .all(|(key, value)| labels.get(key).is_some_and(|candidate| candidate == value));

        let name_matches = self.resources.is_empty() || self.resources.iter().any(|pattern| pattern.is_match(name));

        location_matches && labels_match && name_matches
    }
}
