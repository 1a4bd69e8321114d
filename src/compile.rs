//! Compile pipeline: Loader → Parser → GraphBuilder → HierarchyBuilder →
//! Validator → IRTransformer → Substitution → IR invariants.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CompilationError, CompileError};
use crate::ir::types::WorkflowIR;
use crate::ir::validate::validate_ir;
use crate::load::{self, DEFAULT_MANIFEST, ProjectSnapshot};
use crate::lower::hierarchy::Hierarchy;
use crate::lower::loops::LoopScopes;
use crate::lower::{self, LowerInput};
use crate::parse::{self, WorkflowGraph};
use crate::registry::CapabilityRegistry;
use crate::substitute::Substitute;
use crate::validate::{self, ValidationReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerOptions {
    /// Manifest file name inside the project directory.
    pub manifest_file: String,
    /// Override layer over the manifest's global variables.
    pub global_variables: BTreeMap<String, String>,
    /// Apply build-time `{identifier}` substitution.
    pub substitute: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            manifest_file: DEFAULT_MANIFEST.to_string(),
            global_variables: BTreeMap::new(),
            substitute: true,
        }
    }
}

/// Read-only collaborators shared by a compile. Independent compiles may
/// share one context concurrently.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub registry: &'a CapabilityRegistry,
    pub options: &'a CompilerOptions,
}

impl<'a> CompileContext<'a> {
    pub fn new(registry: &'a CapabilityRegistry, options: &'a CompilerOptions) -> Self {
        CompileContext { registry, options }
    }
}

/// Load a project directory and compile it.
pub fn compile_project(path: &Path, ctx: &CompileContext<'_>) -> Result<WorkflowIR, CompileError> {
    let snapshot = load::load_project(path, &ctx.options.manifest_file)?;
    compile_snapshot(&snapshot, ctx)
}

/// Everything up to and including validation, shared by compile and validate.
struct Analysis {
    graph: WorkflowGraph,
    hierarchy: Hierarchy,
    report: ValidationReport,
}

fn analyze(snapshot: &ProjectSnapshot, ctx: &CompileContext<'_>) -> Result<Analysis, CompilationError> {
    let parsed = parse::parse_project(snapshot)?;
    let graph = WorkflowGraph::build(&parsed)?;
    let loops = LoopScopes::identify(&graph)?;
    let hierarchy = Hierarchy::build(&graph, &loops);

    let project_scope = snapshot.project_scope();
    let registry = ctx.registry.view_with(&project_scope);
    let report = validate::validate_graph(&graph, &loops, &hierarchy, &registry);

    Ok(Analysis {
        graph,
        hierarchy,
        report,
    })
}

/// Compile an already loaded snapshot.
pub fn compile_snapshot(snapshot: &ProjectSnapshot, ctx: &CompileContext<'_>) -> Result<WorkflowIR, CompileError> {
    let Analysis {
        graph,
        hierarchy,
        report,
    } = analyze(snapshot, ctx)?;
    let warnings = report.into_result()?;

    let project_scope = snapshot.project_scope();
    let registry = ctx.registry.view_with(&project_scope);
    let global_variables = global_variables(snapshot, ctx.options);

    let ir = lower::lower(LowerInput {
        snapshot,
        graph: &graph,
        hierarchy: &hierarchy,
        registry: &registry,
        global_variables,
        warnings,
    })?;

    let ir = if ctx.options.substitute {
        debug!(variables = ir.global_variables.len(), "substituting global variables");
        ir.substituted(&ir.global_variables)
    } else {
        ir
    };

    if let Some(violation) = validate_ir(&ir).into_iter().next() {
        return Err(CompilationError::from(violation).into());
    }

    info!(
        project = %ir.metadata.project_name,
        roots = ir.roots.len(),
        agents = ir.all_agents.len(),
        warnings = ir.warnings.len(),
        "compile finished"
    );
    Ok(ir)
}

/// Run every phase up to validation and return the full report.
pub fn validate_snapshot(snapshot: &ProjectSnapshot, ctx: &CompileContext<'_>) -> Result<ValidationReport, CompilationError> {
    analyze(snapshot, ctx).map(|analysis| analysis.report)
}

/// Manifest globals overlaid by the caller's options. Non-string manifest
/// values keep their JSON rendering.
pub fn global_variables(snapshot: &ProjectSnapshot, options: &CompilerOptions) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = snapshot
        .manifest
        .global_variables
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect();
    vars.extend(
        options
            .global_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    vars
}
