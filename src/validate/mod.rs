//! Validation phase: runs after the hierarchy is built and before any IR is
//! emitted.
//!
//! Every rule appends to one [`ValidationReport`] so the caller sees all
//! problems at once; warnings never fail a compile.

pub mod references;
pub mod structural;

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::lower::hierarchy::Hierarchy;
use crate::lower::loops::LoopScopes;
use crate::parse::graph::WorkflowGraph;
use crate::registry::RegistryView;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
    pub node_ids: Vec<String>,
    pub region: Option<String>,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        ValidationError {
            code,
            message: message.into(),
            node_ids: Vec::new(),
            region: None,
        }
    }

    pub fn at(mut self, region: &str, node_ids: Vec<String>) -> Self {
        self.region = Some(region.to_string());
        self.node_ids = node_ids;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Validate:{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub code: &'static str,
    pub message: String,
    pub node_id: String,
    pub region: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Warnings when there are no errors; otherwise a failure carrying both.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ValidationFailure> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ValidationFailure {
                errors: self.errors,
                warnings: self.warnings,
            })
        }
    }
}

/// Raised when validation found at least one error. `first()` is the error
/// reported to the user; the complete set travels along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationFailure {
    pub fn first(&self) -> Option<&ValidationError> {
        self.errors.first()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.split_first() {
            Some((first, [])) => write!(f, "{}", first),
            Some((first, rest)) => write!(f, "{} (+{} more)", first, rest.len()),
            None => write!(f, "validation failed"),
        }
    }
}

impl std::error::Error for ValidationFailure {}

/// Run every rule over the frozen graph and the hierarchy built from it.
pub fn validate_graph(
    graph: &WorkflowGraph,
    loops: &LoopScopes,
    hierarchy: &Hierarchy,
    registry: &RegistryView<'_>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let cyclic = structural::v001_no_illegal_cycles(graph, loops, &mut report.errors);
    structural::structural_issues(graph, hierarchy, &cyclic, &mut report.errors);
    references::v002_references_resolve(graph, registry, &mut report.errors);
    references::v006_config_edges_target_agents(graph, &mut report.errors);
    structural::w001_unreachable_agents(graph, &mut report.warnings);

    for warning in &report.warnings {
        warn!(code = warning.code, node = %warning.node_id, "{}", warning.message);
    }

    report
}
