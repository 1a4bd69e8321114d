//! Parse phase: raw region records → typed nodes/edges + graph construction.

pub mod graph;
pub mod types;

pub use graph::{EdgeSemantics, GraphEdge, TeleporterPair, WorkflowGraph};
pub use types::*;

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CompilationError, Location};
use crate::load::ProjectSnapshot;

/// Parse every region of a snapshot, checking project-wide id uniqueness.
pub fn parse_project(snapshot: &ProjectSnapshot) -> Result<ParsedProject, CompilationError> {
    let mut project = ParsedProject::default();
    let mut node_ids = HashSet::new();
    let mut edge_ids = HashSet::new();

    for region in &snapshot.regions {
        project.regions.push(region.id.clone());

        for record in &region.flow.nodes {
            let node = parse_node(&region.id, record)?;
            if !node_ids.insert(node.id.clone()) {
                return Err(CompilationError::parse(
                    "P003",
                    format!("Duplicate node id '{}'", node.id),
                    Location::node(&region.id, &node.id),
                ));
            }
            project.nodes.push(node);
        }

        for record in &region.flow.edges {
            if !edge_ids.insert(record.id.clone()) {
                return Err(CompilationError::parse(
                    "P004",
                    format!("Duplicate edge id '{}'", record.id),
                    Location::region(&region.id),
                ));
            }
            project.edges.push(parse_edge(&region.id, record));
        }
    }

    Ok(project)
}

/// Convert one raw node record into a [`ParsedNode`], validating the
/// kind-specific data shape.
pub fn parse_node(region: &str, record: &NodeRecord) -> Result<ParsedNode, CompilationError> {
    let location = || Location::node(region, &record.id);

    let kind = NodeKind::from_type(&record.node_type).ok_or_else(|| {
        CompilationError::parse(
            "P001",
            format!(
                "Unknown node type '{}' on node '{}'",
                record.node_type, record.id
            ),
            location(),
        )
    })?;

    let payload = match kind {
        NodeKind::Start => NodePayload::Start,
        NodeKind::End => NodePayload::End,
        NodeKind::ParallelJoin => NodePayload::ParallelJoin,
        NodeKind::Agent => NodePayload::Agent(data_as(record, region)?),
        NodeKind::Loop => NodePayload::Loop(data_as(record, region)?),
        NodeKind::TeleporterOut => NodePayload::TeleporterOut(teleporter_data(record, region)?),
        NodeKind::TeleporterIn => NodePayload::TeleporterIn(teleporter_data(record, region)?),
        NodeKind::Variable => {
            let data: VariableData = data_as(record, region)?;
            if data.entries().is_empty() {
                return Err(CompilationError::parse(
                    "P002",
                    format!(
                        "Variable node '{}' must define `name` or a non-empty `values` map",
                        record.id
                    ),
                    location(),
                ));
            }
            NodePayload::Variable(data)
        }
        NodeKind::UserInput => NodePayload::UserInput(data_as(record, region)?),
        NodeKind::Custom => NodePayload::Custom(custom_data(record, region)?),
    };

    Ok(ParsedNode {
        id: record.id.clone(),
        region: region.to_string(),
        position: record.position,
        payload,
    })
}

fn parse_edge(region: &str, record: &EdgeRecord) -> ParsedEdge {
    ParsedEdge {
        id: record.id.clone(),
        region: region.to_string(),
        source: record.source.clone(),
        source_port: non_empty(record.source_handle.as_deref()),
        target: record.target.clone(),
        target_port: non_empty(record.target_handle.as_deref()),
    }
}

fn non_empty(handle: Option<&str>) -> Option<String> {
    handle
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Deserialize `data`, treating a missing/null object as empty.
fn data_as<T: DeserializeOwned>(record: &NodeRecord, region: &str) -> Result<T, CompilationError> {
    let data = match &record.data {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(data).map_err(|e| {
        CompilationError::parse(
            "P002",
            format!(
                "Invalid data for {} node '{}': {}",
                record.node_type, record.id, e
            ),
            Location::node(region, &record.id),
        )
    })
}

fn teleporter_data(record: &NodeRecord, region: &str) -> Result<TeleporterData, CompilationError> {
    let data: TeleporterData = data_as(record, region)?;
    if data.channel.trim().is_empty() {
        return Err(CompilationError::parse(
            "P002",
            format!("Teleporter node '{}' has an empty channel", record.id),
            Location::node(region, &record.id),
        ));
    }
    Ok(data)
}

fn custom_data(record: &NodeRecord, region: &str) -> Result<CustomData, CompilationError> {
    let data: CustomData = data_as(record, region)?;
    let missing = match &data {
        CustomData::Instruction {
            text,
            file,
            prompt_ref,
        } => text.is_none() && file.is_none() && prompt_ref.is_none(),
        CustomData::Schema {
            schema_id, schema, ..
        } => schema_id.is_none() && schema.is_none(),
        CustomData::Tool { .. } | CustomData::Callback { .. } => false,
    };
    if missing {
        return Err(CompilationError::parse(
            "P002",
            format!(
                "Custom {} node '{}' has no content or reference",
                data.resource(),
                record.id
            ),
            Location::node(region, &record.id),
        ));
    }
    Ok(data)
}
