//! Reference integrity.
//!
//! V002: every tool, prompt, callback and schema id a node names must be
//! defined in the registry. V006: configuration edges may only end on agents.

use super::ValidationError;
use crate::parse::graph::WorkflowGraph;
use crate::parse::types::{CustomData, NodeKind, NodePayload, ParsedNode};
use crate::registry::RegistryView;

pub fn v002_references_resolve(
    graph: &WorkflowGraph,
    registry: &RegistryView<'_>,
    errors: &mut Vec<ValidationError>,
) {
    for node in graph.nodes() {
        for (kind, name) in references(node) {
            let known = match kind {
                "tool" => registry.tool(name).is_some(),
                "prompt" => registry.prompt(name).is_some(),
                "callback" => registry.callback(name).is_some(),
                _ => registry.schema(name).is_some(),
            };
            if !known {
                errors.push(
                    ValidationError::new(
                        "V002",
                        format!(
                            "{} '{}' references unknown {} '{}'",
                            capitalize(node.kind().as_str()),
                            node.label(),
                            kind,
                            name
                        ),
                    )
                    .at(&node.region, vec![node.id.clone()]),
                );
            }
        }
    }
}

pub fn v006_config_edges_target_agents(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for target in graph.nodes() {
        if target.kind() == NodeKind::Agent {
            continue;
        }
        for (edge, source) in graph.data_inputs(&target.id) {
            errors.push(
                ValidationError::new(
                    "V006",
                    format!(
                        "{} '{}' is wired into port '{}' of {} '{}', which takes no configuration",
                        capitalize(source.kind().as_str()),
                        source.label(),
                        edge.target_port.as_deref().unwrap_or("default"),
                        target.kind().as_str(),
                        target.label()
                    ),
                )
                .at(&target.region, vec![source.id.clone(), target.id.clone()]),
            );
        }
    }
}

/// `(kind, id)` of every registry reference a node carries, in field order.
fn references(node: &ParsedNode) -> Vec<(&'static str, &str)> {
    let mut refs = Vec::new();
    match &node.payload {
        NodePayload::Agent(agent) => {
            refs.extend(agent.tools.iter().map(|t| ("tool", t.as_str())));
            refs.extend(agent.prompt_ref.as_deref().map(|p| ("prompt", p)));
            refs.extend(agent.callbacks.iter().map(|c| ("callback", c.id.as_str())));
        }
        NodePayload::Custom(custom) => match custom {
            CustomData::Instruction { prompt_ref, .. } => {
                refs.extend(prompt_ref.as_deref().map(|p| ("prompt", p)));
            }
            CustomData::Tool { tool_id } => refs.push(("tool", tool_id.as_str())),
            CustomData::Callback { callback_id, .. } => refs.push(("callback", callback_id.as_str())),
            CustomData::Schema { schema_id, .. } => {
                refs.extend(schema_id.as_deref().map(|s| ("schema", s)));
            }
        },
        NodePayload::Start
        | NodePayload::End
        | NodePayload::Loop(_)
        | NodePayload::ParallelJoin
        | NodePayload::TeleporterOut(_)
        | NodePayload::TeleporterIn(_)
        | NodePayload::Variable(_)
        | NodePayload::UserInput(_) => {}
    }
    refs
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
