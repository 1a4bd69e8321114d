//! WASM entry points for browser use.
//!
//! The editor holds the project in memory, so both entry points take a JSON
//! [`ProjectBundle`] instead of a directory.

use wasm_bindgen::prelude::*;

use crate::compile::{CompileContext, CompilerOptions, compile_snapshot, validate_snapshot};
use crate::error::{CompilationError, CompileError};
use crate::ir::types::WorkflowIR;
use crate::load::{ProjectBundle, ProjectSnapshot};
use crate::registry::CapabilityRegistry;
use crate::validate::{ValidationError, ValidationWarning};

/// Validate a project bundle: every phase up to the validator.
/// Returns a JSON array of error and warning objects.
#[wasm_bindgen]
pub fn validate_bundle(json: &str) -> JsValue {
    let result = validate_bundle_inner(json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn validate_bundle_inner(json: &str) -> Vec<ErrorDto> {
    let snapshot = match snapshot_from_json(json) {
        Ok(s) => s,
        Err(e) => return vec![ErrorDto::from(e)],
    };

    let registry = CapabilityRegistry::empty();
    let options = CompilerOptions::default();
    match validate_snapshot(&snapshot, &CompileContext::new(&registry, &options)) {
        Ok(report) => report
            .errors
            .iter()
            .map(ErrorDto::from)
            .chain(report.warnings.iter().map(ErrorDto::from))
            .collect(),
        Err(e) => vec![ErrorDto::from(e)],
    }
}

/// Full pipeline over a bundle. Returns a JSON object with either `ir`
/// (success) or `errors` (failure).
#[wasm_bindgen]
pub fn compile_bundle(json: &str) -> JsValue {
    let result = compile_bundle_inner(json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn compile_bundle_inner(json: &str) -> CompileResult {
    let snapshot = match snapshot_from_json(json) {
        Ok(s) => s,
        Err(e) => return CompileResult::errors(vec![ErrorDto::from(e)]),
    };

    let registry = CapabilityRegistry::empty();
    let options = CompilerOptions::default();
    match compile_snapshot(&snapshot, &CompileContext::new(&registry, &options)) {
        Ok(ir) => CompileResult::Success { ir: Box::new(ir) },
        Err(CompileError::Compilation(e)) => CompileResult::errors(vec![ErrorDto::from(e)]),
        Err(CompileError::Validation(failure)) => {
            CompileResult::errors(failure.errors.iter().map(ErrorDto::from).collect())
        }
        Err(CompileError::Seeding(e)) => CompileResult::errors(
            e.conflicts
                .iter()
                .map(|c| ErrorDto {
                    code: "S001".into(),
                    phase: "Transform".into(),
                    message: c.to_string(),
                    node_id: Some(c.agent_id.clone()),
                    region: None,
                })
                .collect(),
        ),
    }
}

fn snapshot_from_json(json: &str) -> Result<ProjectSnapshot, CompilationError> {
    let bundle: ProjectBundle = serde_json::from_str(json).map_err(|e| {
        CompilationError::load(
            "L002",
            format!("Failed to parse project bundle JSON: {}", e),
            crate::error::Location::file("<bundle>", Some(e.line())),
        )
    })?;
    ProjectSnapshot::from_bundle(bundle)
}

// ---------------------------------------------------------------------------
// DTOs for serialization to JS
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDto {
    code: String,
    phase: String,
    message: String,
    node_id: Option<String>,
    region: Option<String>,
}

impl From<CompilationError> for ErrorDto {
    fn from(e: CompilationError) -> Self {
        ErrorDto {
            code: e.code,
            phase: e.phase.to_string(),
            message: e.message,
            node_id: e.location.node,
            region: e.location.region,
        }
    }
}

impl From<&ValidationError> for ErrorDto {
    fn from(e: &ValidationError) -> Self {
        ErrorDto {
            code: e.code.to_string(),
            phase: "Validate".into(),
            message: e.message.clone(),
            node_id: e.node_ids.first().cloned(),
            region: e.region.clone(),
        }
    }
}

impl From<&ValidationWarning> for ErrorDto {
    fn from(w: &ValidationWarning) -> Self {
        ErrorDto {
            code: w.code.to_string(),
            phase: "Validate".into(),
            message: w.message.clone(),
            node_id: Some(w.node_id.clone()),
            region: Some(w.region.clone()),
        }
    }
}

#[derive(serde::Serialize)]
#[serde(tag = "status")]
enum CompileResult {
    #[serde(rename = "success")]
    Success { ir: Box<WorkflowIR> },
    #[serde(rename = "errors")]
    Errors { errors: Vec<ErrorDto> },
}

impl CompileResult {
    fn errors(errors: Vec<ErrorDto>) -> Self {
        CompileResult::Errors { errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn bundle(nodes: Value, edges: Value) -> String {
        json!({
            "manifest": { "name": "demo", "tabs": [{ "id": "main" }] },
            "flows": { "main": { "nodes": nodes, "edges": edges } }
        })
        .to_string()
    }

    fn node(id: &str, node_type: &str, y: f64) -> Value {
        json!({ "id": id, "type": node_type, "position": { "x": 0, "y": y }, "data": {} })
    }

    fn edge(id: &str, source: &str, target: &str) -> Value {
        json!({ "id": id, "source": source, "target": target })
    }

    #[test]
    fn compile_success_carries_ir() {
        let json = bundle(
            json!([node("s", "start", 0.0), node("a", "agent", 1.0)]),
            json!([edge("e1", "s", "a")]),
        );
        let value = serde_json::to_value(compile_bundle_inner(&json)).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["ir"]["roots"]["main"]["id"], "a");
    }

    #[test]
    fn compile_failure_lists_every_validation_error() {
        let json = bundle(
            json!([
                node("s", "start", 0.0),
                node("a", "agent", 1.0),
                node("b", "agent", 2.0)
            ]),
            json!([edge("e1", "s", "a"), edge("e2", "a", "b"), edge("e3", "b", "a")]),
        );
        let value = serde_json::to_value(compile_bundle_inner(&json)).unwrap();
        assert_eq!(value["status"], "errors");
        assert_eq!(value["errors"][0]["code"], "V001");
        assert_eq!(value["errors"][0]["phase"], "Validate");
        assert_eq!(value["errors"][0]["nodeId"], "a");
    }

    #[test]
    fn malformed_bundle_is_a_load_error() {
        let value = serde_json::to_value(compile_bundle_inner("{ not json")).unwrap();
        assert_eq!(value["errors"][0]["code"], "L002");
    }

    #[test]
    fn validate_returns_warnings_too() {
        let json = bundle(
            json!([
                node("s", "start", 0.0),
                node("a", "agent", 1.0),
                node("gate", "user-input", 2.0),
                node("lost", "agent", 3.0)
            ]),
            json!([edge("e1", "s", "a"), edge("e2", "gate", "lost")]),
        );
        let dtos = validate_bundle_inner(&json);
        assert_eq!(dtos.len(), 1);
        assert_eq!(dtos[0].code, "W001");
        assert_eq!(dtos[0].node_id.as_deref(), Some("lost"));
    }
}
