//! Loop scope identification.
//!
//! A loop marker enters its body through the `body` port. The body is every
//! node reachable from that port which can also reach the marker again; the
//! control edges from the body back into the marker are its back edges.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::error::{CompilationError, Location};
use crate::parse::graph::WorkflowGraph;
use crate::parse::types::NodeKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopScope {
    pub marker: String,
    pub body_head: String,
    /// Body node ids (the marker itself excluded).
    pub body: BTreeSet<String>,
    /// Sources of the control edges returning to the marker.
    pub back_edges: BTreeSet<String>,
}

impl LoopScope {
    pub fn contains(&self, node_id: &str) -> bool {
        self.body.contains(node_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopScopes {
    scopes: BTreeMap<String, LoopScope>,
}

impl LoopScopes {
    pub fn identify(graph: &WorkflowGraph) -> Result<Self, CompilationError> {
        let mut scopes = BTreeMap::new();

        for node in graph.nodes() {
            if node.kind() != NodeKind::Loop {
                continue;
            }
            let marker = node.id.as_str();
            let location = || Location::node(&node.region, marker);

            let body_edges: Vec<_> = graph
                .outgoing_control(marker)
                .into_iter()
                .filter(|e| graph.is_body_edge(e))
                .collect();

            let head = match body_edges.as_slice() {
                [] => {
                    return Err(CompilationError::hierarchy(
                        "H001",
                        format!("Loop '{}' has no body edge", node.label()),
                        location(),
                    ));
                }
                [edge] => edge.target.clone(),
                _ => {
                    return Err(CompilationError::hierarchy(
                        "H002",
                        format!(
                            "Loop '{}' has {} body edges; exactly one is allowed",
                            node.label(),
                            body_edges.len()
                        ),
                        location(),
                    ));
                }
            };

            if head == marker {
                return Err(CompilationError::hierarchy(
                    "H003",
                    format!("Loop '{}' body points back at the loop itself", node.label()),
                    location(),
                ));
            }

            let forward = reach(graph, &head, marker);
            let backward = reach_back(graph, marker);
            let body: BTreeSet<String> = forward
                .intersection(&backward)
                .map(|id| id.to_string())
                .collect();

            let back_edges: BTreeSet<String> = graph
                .incoming_control(marker)
                .into_iter()
                .filter(|e| body.contains(&e.source))
                .map(|e| e.source.clone())
                .collect();

            if back_edges.is_empty() || !body.contains(&head) {
                return Err(CompilationError::hierarchy(
                    "H003",
                    format!("Loop '{}' body never returns to the loop", node.label()),
                    location(),
                ));
            }

            debug!(loop_id = %marker, body = body.len(), "loop scope identified");
            scopes.insert(
                marker.to_string(),
                LoopScope {
                    marker: marker.to_string(),
                    body_head: head,
                    body,
                    back_edges,
                },
            );
        }

        Ok(LoopScopes { scopes })
    }

    pub fn get(&self, marker: &str) -> Option<&LoopScope> {
        self.scopes.get(marker)
    }

    pub fn is_back_edge(&self, source: &str, target: &str) -> bool {
        self.scopes
            .get(target)
            .is_some_and(|scope| scope.back_edges.contains(source))
    }
}

/// Nodes reachable from `start` over control edges, never expanding `marker`.
fn reach<'g>(graph: &'g WorkflowGraph, start: &'g str, marker: &str) -> HashSet<&'g str> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        if id == marker || !seen.insert(id) {
            continue;
        }
        for edge in graph.outgoing_control(id) {
            queue.push_back(edge.target.as_str());
        }
    }
    seen
}

/// Nodes that can reach `marker` over control edges, without passing through it.
fn reach_back<'g>(graph: &'g WorkflowGraph, marker: &str) -> HashSet<&'g str> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&str> = graph
        .incoming_control(marker)
        .into_iter()
        .map(|e| e.source.as_str())
        .collect();
    while let Some(id) = queue.pop_front() {
        if id == marker || !seen.insert(id) {
            continue;
        }
        for edge in graph.incoming_control(id) {
            queue.push_back(edge.source.as_str());
        }
    }
    seen
}
