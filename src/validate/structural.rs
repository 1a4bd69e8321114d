//! Structural rules: cycle legality (V001), placement issues found by the
//! hierarchy builder (V003–V005) and unreachable agents (W001).

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::{ValidationError, ValidationWarning};
use crate::lower::hierarchy::{Hierarchy, StructuralIssue};
use crate::lower::loops::LoopScopes;
use crate::parse::graph::WorkflowGraph;
use crate::parse::types::NodeKind;

/// Control cycles that remain once loop back edges are removed.
///
/// Returns the ids of every node on an illegal cycle.
pub fn v001_no_illegal_cycles(
    graph: &WorkflowGraph,
    loops: &LoopScopes,
    errors: &mut Vec<ValidationError>,
) -> HashSet<String> {
    let mut control: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for node in graph.nodes() {
        indices.insert(&node.id, control.add_node(&node.id));
    }
    for edge in graph.edges() {
        if !edge.semantics.is_control() || loops.is_back_edge(&edge.source, &edge.target) {
            continue;
        }
        if let (Some(&s), Some(&t)) = (indices.get(edge.source.as_str()), indices.get(edge.target.as_str())) {
            control.update_edge(s, t, ());
        }
    }

    let discovery = discovery_order(graph, loops);
    let mut cyclic = HashSet::new();
    let mut cycles: Vec<Vec<&str>> = Vec::new();

    for component in tarjan_scc(&control) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| control.contains_edge(n, n));
        if !is_cycle {
            continue;
        }

        let members: HashSet<&str> = component.iter().map(|&n| control[n]).collect();
        let start = members
            .iter()
            .copied()
            .min_by(|a, b| {
                let rank = |id: &str| discovery.get(id).copied().unwrap_or(usize::MAX);
                rank(a).cmp(&rank(b)).then_with(|| graph.cmp_ids(a, b))
            })
            .unwrap_or_default();

        cycles.push(traverse_cycle(graph, loops, start, &members));
        cyclic.extend(members.iter().map(|id| id.to_string()));
    }

    cycles.sort_by_key(|cycle| {
        cycle
            .first()
            .and_then(|id| discovery.get(id).copied())
            .unwrap_or(usize::MAX)
    });

    for cycle in cycles {
        let labels: Vec<&str> = cycle
            .iter()
            .map(|id| graph.node(id).map(|n| n.label()).unwrap_or(*id))
            .collect();
        let region = cycle
            .first()
            .and_then(|id| graph.node(id))
            .map(|n| n.region.clone())
            .unwrap_or_default();
        errors.push(
            ValidationError::new(
                "V001",
                format!(
                    "Cycle without a loop marker: {} → {}; wrap it in a loop node",
                    labels.join(" → "),
                    labels.first().copied().unwrap_or_default()
                ),
            )
            .at(&region, cycle.iter().map(|id| id.to_string()).collect()),
        );
    }

    cyclic
}

/// Breadth-first discovery index of every node reachable from an entry.
fn discovery_order<'g>(graph: &'g WorkflowGraph, loops: &LoopScopes) -> HashMap<&'g str, usize> {
    let mut order = HashMap::new();
    let mut queue: VecDeque<&str> = graph.entries().iter().map(String::as_str).collect();
    while let Some(id) = queue.pop_front() {
        if order.contains_key(id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        order.insert(node.id.as_str(), order.len());
        for edge in graph.outgoing_control(id) {
            if !loops.is_back_edge(&edge.source, &edge.target) {
                queue.push_back(edge.target.as_str());
            }
        }
    }
    order
}

/// Depth-first pre-order over the cycle's members, successors in layout order.
fn traverse_cycle<'g>(
    graph: &'g WorkflowGraph,
    loops: &LoopScopes,
    start: &str,
    members: &HashSet<&str>,
) -> Vec<&'g str> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![start.to_string()];

    while let Some(id) = stack.pop() {
        let Some(node) = graph.node(&id) else {
            continue;
        };
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        order.push(node.id.as_str());
        let successors: Vec<&str> = graph
            .outgoing_control(&id)
            .into_iter()
            .filter(|e| !loops.is_back_edge(&e.source, &e.target))
            .map(|e| e.target.as_str())
            .filter(|t| members.contains(t) && !seen.contains(t))
            .collect();
        for target in successors.into_iter().rev() {
            stack.push(target.to_string());
        }
    }
    order
}

/// Placement issues recorded while building the hierarchy. Issues on nodes
/// that sit on an illegal cycle are already covered by V001.
pub fn structural_issues(
    graph: &WorkflowGraph,
    hierarchy: &Hierarchy,
    cyclic: &HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    let label = |id: &str| graph.node(id).map(|n| n.label().to_string()).unwrap_or_else(|| id.to_string());
    let region = |id: &str| graph.node(id).map(|n| n.region.clone()).unwrap_or_default();

    for issue in &hierarchy.issues {
        if cyclic.contains(issue.node()) {
            continue;
        }
        let error = match issue {
            StructuralIssue::AmbiguousMerge { node, predecessors } => {
                let from: Vec<String> = predecessors.iter().map(|p| label(p)).collect();
                let mut ids = vec![node.clone()];
                ids.extend(predecessors.iter().cloned());
                ValidationError::new(
                    "V003",
                    format!(
                        "Node '{}' is reached from {} by paths that do not share a single fork; the join is ambiguous",
                        label(node),
                        from.join(", ")
                    ),
                )
                .at(&region(node), ids)
            }
            StructuralIssue::Revisit { node, from } => {
                if cyclic.contains(from) {
                    continue;
                }
                ValidationError::new(
                    "V003",
                    format!(
                        "Node '{}' is reached again from '{}' after it was already placed",
                        label(node),
                        label(from)
                    ),
                )
                .at(&region(node), vec![node.clone(), from.clone()])
            }
            StructuralIssue::ConditionalFanOut { node, targets } => {
                let to: Vec<String> = targets.iter().map(|t| label(t)).collect();
                let mut ids = vec![node.clone()];
                ids.extend(targets.iter().cloned());
                ValidationError::new(
                    "V004",
                    format!(
                        "Node '{}' has {} conditional routes ({}); conditional branching has no execution construct",
                        label(node),
                        targets.len(),
                        to.join(", ")
                    ),
                )
                .at(&region(node), ids)
            }
            StructuralIssue::LoopEscape { marker, from, to } => ValidationError::new(
                "V005",
                format!(
                    "Edge from '{}' to '{}' leaves the body of loop '{}'",
                    label(from),
                    label(to),
                    label(marker)
                ),
            )
            .at(&region(from), vec![from.clone(), to.clone(), marker.clone()]),
        };
        errors.push(error);
    }
}

/// Agents no entry can reach over control edges.
pub fn w001_unreachable_agents(graph: &WorkflowGraph, warnings: &mut Vec<ValidationWarning>) {
    let mut reachable = HashSet::new();
    let mut queue: VecDeque<&str> = graph.entries().iter().map(String::as_str).collect();
    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        for edge in graph.outgoing_control(id) {
            queue.push_back(edge.target.as_str());
        }
    }

    for node in graph.nodes() {
        if node.kind() == NodeKind::Agent && !reachable.contains(node.id.as_str()) {
            warnings.push(ValidationWarning {
                code: "W001",
                message: format!("Agent '{}' is not reachable from any entry node", node.label()),
                node_id: node.id.clone(),
                region: node.region.clone(),
            });
        }
    }
}
