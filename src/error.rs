//! Unified compiler error types used across all phases.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::validate::IrViolation;
use crate::validate::ValidationFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Load,
    Parse,
    Graph,
    Hierarchy,
    Validate,
    Resolve,
    Transform,
    IrValidate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Load => write!(f, "Load"),
            Phase::Parse => write!(f, "Parse"),
            Phase::Graph => write!(f, "Graph"),
            Phase::Hierarchy => write!(f, "Hierarchy"),
            Phase::Validate => write!(f, "Validate"),
            Phase::Resolve => write!(f, "Resolve"),
            Phase::Transform => write!(f, "Transform"),
            Phase::IrValidate => write!(f, "IR Validate"),
        }
    }
}

/// Where a diagnostic points: region (tab), node, and/or source file + line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub region: Option<String>,
    pub node: Option<String>,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl Location {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn region(region: impl Into<String>) -> Self {
        Location {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    pub fn node(region: impl Into<String>, node: impl Into<String>) -> Self {
        Location {
            region: Some(region.into()),
            node: Some(node.into()),
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<String>, line: Option<usize>) -> Self {
        Location {
            file: Some(path.into()),
            line,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_none() && self.node.is_none() && self.file.is_none()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(region) = &self.region {
            parts.push(format!("region '{}'", region));
        }
        if let Some(node) = &self.node {
            parts.push(format!("node '{}'", node));
        }
        if let Some(file) = &self.file {
            match self.line {
                Some(line) => parts.push(format!("{}:{}", file, line)),
                None => parts.push(file.clone()),
            }
        }
        write!(f, "{}", parts.join(", "))
    }
}

fn location_suffix(location: &Location) -> String {
    if location.is_empty() {
        String::new()
    } else {
        format!(" ({})", location)
    }
}

/// Fatal error raised by the loader, parser, graph builder, hierarchy builder
/// or resolvers. Aborts the compile immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{phase}:{code}] {message}{}", location_suffix(.location))]
pub struct CompilationError {
    pub code: String,
    pub phase: Phase,
    pub message: String,
    pub location: Location,
}

impl CompilationError {
    pub fn new(code: &str, phase: Phase, message: impl Into<String>, location: Location) -> Self {
        CompilationError {
            code: code.into(),
            phase,
            message: message.into(),
            location,
        }
    }

    pub fn load(code: &str, message: impl Into<String>, location: Location) -> Self {
        Self::new(code, Phase::Load, message, location)
    }

    pub fn parse(code: &str, message: impl Into<String>, location: Location) -> Self {
        Self::new(code, Phase::Parse, message, location)
    }

    pub fn graph(code: &str, message: impl Into<String>, location: Location) -> Self {
        Self::new(code, Phase::Graph, message, location)
    }

    /// Channel pairing failures (`T0xx`).
    pub fn teleporter(code: &str, message: impl Into<String>, location: Location) -> Self {
        Self::new(code, Phase::Graph, message, location)
    }

    pub fn hierarchy(code: &str, message: impl Into<String>, location: Location) -> Self {
        Self::new(code, Phase::Hierarchy, message, location)
    }

    pub fn tool_load(message: impl Into<String>, location: Location) -> Self {
        Self::new("R001", Phase::Resolve, message, location)
    }

    pub fn prompt_load(message: impl Into<String>, location: Location) -> Self {
        Self::new("R002", Phase::Resolve, message, location)
    }

    pub fn callback_load(message: impl Into<String>, location: Location) -> Self {
        Self::new("R003", Phase::Resolve, message, location)
    }

    pub fn schema_load(message: impl Into<String>, location: Location) -> Self {
        Self::new("R004", Phase::Resolve, message, location)
    }

    /// A non-variable node wired into the `context` port.
    pub fn context_load(message: impl Into<String>, location: Location) -> Self {
        Self::new("R005", Phase::Resolve, message, location)
    }
}

impl From<IrViolation> for CompilationError {
    fn from(v: IrViolation) -> Self {
        CompilationError {
            code: v.code.to_string(),
            phase: Phase::IrValidate,
            message: v.message,
            location: Location {
                node: v.agent_id,
                ..Location::default()
            },
        }
    }
}

/// One context variable fed with different values by several sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedConflict {
    pub agent_id: String,
    pub variable: String,
    /// Every `(source, value)` pair supplying this variable, in source order.
    pub sources: Vec<(String, serde_json::Value)>,
}

impl std::fmt::Display for SeedConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<String> = self
            .sources
            .iter()
            .map(|(source, value)| format!("'{}' = {}", source, value))
            .collect();
        write!(
            f,
            "agent '{}': variable '{}' has conflicting values ({})",
            self.agent_id,
            self.variable,
            sources.join(", ")
        )
    }
}

fn render_conflicts(conflicts: &[SeedConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Context-variable conflicts detected while collecting session seeds.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[Transform:S001] conflicting context variables: {}", render_conflicts(.conflicts))]
pub struct SeedingError {
    pub conflicts: Vec<SeedConflict>,
}

/// Top-level error returned by the compile entry points.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Seeding(#[from] SeedingError),
}

impl CompileError {
    /// Code of the (first) underlying error, e.g. `"T002"` or `"V001"`.
    pub fn code(&self) -> &str {
        match self {
            CompileError::Compilation(e) => &e.code,
            CompileError::Validation(f) => f.first().map(|e| e.code).unwrap_or("V000"),
            CompileError::Seeding(_) => "S001",
        }
    }
}
