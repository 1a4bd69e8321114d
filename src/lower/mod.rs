//! Lowering phase: frozen graph + hierarchy → WorkflowIR.
//!
//! Loop scopes and the hierarchy are computed before validation (the
//! validator reports what the hierarchy builder could not place); this module
//! then turns the accepted trees into agents.

pub mod hierarchy;
pub mod loops;
pub mod resolve;
pub mod transform;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{CompileError, SeedingError};
use crate::ir::types::*;
use crate::load::ProjectSnapshot;
use crate::parse::graph::WorkflowGraph;
use crate::parse::types::NodeKind;
use crate::registry::RegistryView;
use crate::validate::ValidationWarning;

use self::hierarchy::Hierarchy;
use self::resolve::Resolver;
use self::transform::Transformer;

pub struct LowerInput<'a> {
    pub snapshot: &'a ProjectSnapshot,
    pub graph: &'a WorkflowGraph,
    pub hierarchy: &'a Hierarchy,
    pub registry: &'a RegistryView<'a>,
    pub global_variables: BTreeMap<String, String>,
    pub warnings: Vec<ValidationWarning>,
}

/// Lower a validated graph + hierarchy into a WorkflowIR (before substitution).
pub fn lower(input: LowerInput<'_>) -> Result<WorkflowIR, CompileError> {
    let LowerInput {
        snapshot,
        graph,
        hierarchy,
        registry,
        global_variables,
        warnings,
    } = input;

    // 1. Agents, bottom-up per region
    let mut transformer = Transformer::new(graph, Resolver::new(graph, snapshot, registry));
    let mut roots = BTreeMap::new();
    for (region, tree) in &hierarchy.roots {
        roots.insert(region.clone(), transformer.agent(tree)?);
    }

    // 2. Session seed; conflicts are reported all together
    let (session_seed, conflicts) = transformer.finish();
    if !conflicts.is_empty() {
        return Err(SeedingError { conflicts }.into());
    }

    // 3. Flat agent map
    let all_agents: BTreeMap<String, AgentIR> = roots
        .values()
        .flat_map(|root| root.walk())
        .map(|agent| (agent.id.clone(), agent.clone()))
        .collect();

    // 4. Teleporter connections
    let connections = graph
        .pairs()
        .iter()
        .map(|pair| TeleportConnection {
            channel: pair.channel.clone(),
            out_node: pair.out_node.clone(),
            out_region: region_of(graph, &pair.out_node),
            in_node: pair.in_node.clone(),
            in_region: region_of(graph, &pair.in_node),
        })
        .collect();

    let has_start_node = graph
        .entries()
        .iter()
        .any(|id| graph.node(id).is_some_and(|n| n.kind() == NodeKind::Start));
    let has_end_node = hierarchy
        .visited
        .iter()
        .any(|id| graph.node(id).is_some_and(|n| n.kind() == NodeKind::End));

    debug!(
        roots = roots.len(),
        agents = all_agents.len(),
        seeded = session_seed.len(),
        "agents lowered"
    );

    Ok(WorkflowIR {
        metadata: WorkflowMetadata {
            project_name: snapshot.manifest.name.clone(),
            version: snapshot.manifest.version.clone(),
        },
        project_path: snapshot.project_path.clone(),
        tab_ids: snapshot
            .regions
            .iter()
            .map(|r| r.id.clone())
            .collect::<BTreeSet<_>>(),
        has_start_node,
        has_end_node,
        global_variables,
        roots,
        all_agents,
        connections,
        session_seed,
        warnings,
    })
}

fn region_of(graph: &WorkflowGraph, node_id: &str) -> String {
    graph
        .node(node_id)
        .map(|n| n.region.clone())
        .unwrap_or_default()
}
