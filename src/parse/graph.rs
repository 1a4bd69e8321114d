//! petgraph-based directed graph over every region of a project.
//!
//! Building the graph classifies each edge, pairs teleporters by channel and
//! detects entry nodes. Afterwards the graph only exposes `&self` queries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::*;
use crate::error::{CompilationError, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeSemantics {
    Sequential,
    ParallelBranch,
    Conditional,
    Data,
    Teleport,
}

impl EdgeSemantics {
    /// Everything except `DATA` moves control from one node to the next.
    pub fn is_control(&self) -> bool {
        !matches!(self, EdgeSemantics::Data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    pub semantics: EdgeSemantics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleporterPair {
    pub channel: String,
    pub out_node: String,
    pub in_node: String,
}

pub struct WorkflowGraph {
    graph: DiGraph<ParsedNode, GraphEdge>,
    node_indices: HashMap<String, NodeIndex>,
    regions: Vec<String>,
    pairs: Vec<TeleporterPair>,
    entries: Vec<String>,
}

impl WorkflowGraph {
    pub fn build(project: &ParsedProject) -> Result<Self, CompilationError> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for node in &project.nodes {
            let id = node.id.clone();
            let idx = graph.add_node(node.clone());
            node_indices.insert(id, idx);
        }

        // First pass: endpoints + every rule that does not depend on fan-out.
        let mut classified = Vec::with_capacity(project.edges.len());
        for edge in &project.edges {
            let source_idx = node_indices.get(&edge.source);
            let target_idx = node_indices.get(&edge.target);

            let (s, t) = match (source_idx, target_idx) {
                (Some(&s), Some(&t)) => (s, t),
                (None, _) => {
                    return Err(CompilationError::graph(
                        "G001",
                        format!(
                            "Edge '{}' references unknown source node '{}'",
                            edge.id, edge.source
                        ),
                        Location::region(&edge.region),
                    ));
                }
                (_, None) => {
                    return Err(CompilationError::graph(
                        "G001",
                        format!(
                            "Edge '{}' references unknown target node '{}'",
                            edge.id, edge.target
                        ),
                        Location::region(&edge.region),
                    ));
                }
            };

            let semantics = classify(&graph[s], edge, &graph[t])?;
            classified.push((s, t, edge, semantics));
        }

        // Second pass: default edges become branches when their source fans out.
        let mut fan_out: HashMap<NodeIndex, usize> = HashMap::new();
        for (s, _, edge, semantics) in &classified {
            let counts = match semantics {
                Some(EdgeSemantics::Data) => false,
                Some(EdgeSemantics::Sequential) => !is_body_port(&graph[*s], edge.source_port.as_deref()),
                _ => true,
            };
            if counts {
                *fan_out.entry(*s).or_default() += 1;
            }
        }

        for (s, t, edge, semantics) in classified {
            let semantics = semantics.unwrap_or_else(|| {
                if fan_out.get(&s).copied().unwrap_or(0) > 1 {
                    EdgeSemantics::ParallelBranch
                } else {
                    EdgeSemantics::Sequential
                }
            });
            graph.add_edge(
                s,
                t,
                GraphEdge {
                    id: edge.id.clone(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    source_port: edge.source_port.clone(),
                    target_port: edge.target_port.clone(),
                    semantics,
                },
            );
        }

        let mut workflow_graph = WorkflowGraph {
            graph,
            node_indices,
            regions: project.regions.clone(),
            pairs: Vec::new(),
            entries: Vec::new(),
        };

        workflow_graph.pairs = workflow_graph.pair_teleporters()?;
        workflow_graph.link_teleporters();
        workflow_graph.entries = workflow_graph.detect_entries();

        debug!(
            nodes = workflow_graph.graph.node_count(),
            edges = workflow_graph.graph.edge_count(),
            teleporters = workflow_graph.pairs.len(),
            entries = workflow_graph.entries.len(),
            "workflow graph built"
        );

        Ok(workflow_graph)
    }

    /// Match every teleporter-out with exactly one teleporter-in per channel.
    fn pair_teleporters(&self) -> Result<Vec<TeleporterPair>, CompilationError> {
        let mut channels: BTreeMap<&str, (Vec<&ParsedNode>, Vec<&ParsedNode>)> = BTreeMap::new();
        for node in self.graph.node_weights() {
            match &node.payload {
                NodePayload::TeleporterOut(t) => channels.entry(&t.channel).or_default().0.push(node),
                NodePayload::TeleporterIn(t) => channels.entry(&t.channel).or_default().1.push(node),
                _ => {}
            }
        }

        let mut pairs = Vec::new();
        for (channel, (mut outs, mut ins)) in channels {
            outs.sort_by(|a, b| a.id.cmp(&b.id));
            ins.sort_by(|a, b| a.id.cmp(&b.id));

            match (outs.as_slice(), ins.as_slice()) {
                ([out], [inn]) => pairs.push(TeleporterPair {
                    channel: channel.to_string(),
                    out_node: out.id.clone(),
                    in_node: inn.id.clone(),
                }),
                ([], [first, ..]) | ([first, ..], []) => {
                    let missing = if outs.is_empty() { "teleporter-out" } else { "teleporter-in" };
                    return Err(CompilationError::teleporter(
                        "T001",
                        format!("Channel '{}' has no {} node", channel, missing),
                        Location::node(&first.region, &first.id),
                    ));
                }
                _ => {
                    let (direction, nodes) = if outs.len() > 1 {
                        ("teleporter-out", &outs)
                    } else {
                        ("teleporter-in", &ins)
                    };
                    let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
                    return Err(CompilationError::teleporter(
                        "T002",
                        format!(
                            "Channel '{}' has {} {} nodes ({}); exactly one is allowed",
                            channel,
                            nodes.len(),
                            direction,
                            ids.join(", ")
                        ),
                        Location::node(&nodes[0].region, &nodes[0].id),
                    ));
                }
            }
        }

        Ok(pairs)
    }

    /// Add a virtual TELEPORT edge for every pair that was not drawn explicitly.
    fn link_teleporters(&mut self) {
        for pair in &self.pairs {
            let (Some(&s), Some(&t)) = (
                self.node_indices.get(&pair.out_node),
                self.node_indices.get(&pair.in_node),
            ) else {
                continue;
            };
            let drawn = self
                .graph
                .edges_connecting(s, t)
                .any(|e| e.weight().semantics == EdgeSemantics::Teleport);
            if !drawn {
                self.graph.add_edge(
                    s,
                    t,
                    GraphEdge {
                        id: format!("teleport:{}", pair.channel),
                        source: pair.out_node.clone(),
                        target: pair.in_node.clone(),
                        source_port: None,
                        target_port: None,
                        semantics: EdgeSemantics::Teleport,
                    },
                );
            }
        }
    }

    /// Agent/start nodes without incoming control, plus loop markers whose
    /// only incoming control edges come back from their own body.
    fn detect_entries(&self) -> Vec<String> {
        let mut entries: Vec<&ParsedNode> = self
            .graph
            .node_weights()
            .filter(|node| match node.kind() {
                NodeKind::Agent | NodeKind::Start => self.incoming_control(&node.id).is_empty(),
                NodeKind::Loop => {
                    let body = self.reachable_from_body(&node.id);
                    self.incoming_control(&node.id)
                        .iter()
                        .all(|e| body.contains(e.source.as_str()))
                }
                _ => false,
            })
            .collect();
        entries.sort_by(|a, b| self.cmp_nodes(a, b));
        entries.into_iter().map(|n| n.id.clone()).collect()
    }

    fn reachable_from_body(&self, loop_id: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .outgoing_control(loop_id)
            .into_iter()
            .filter(|e| self.is_body_edge(e))
            .map(|e| e.target.as_str())
            .collect();
        while let Some(id) = queue.pop_front() {
            if id == loop_id || !seen.insert(id) {
                continue;
            }
            for edge in self.outgoing_control(id) {
                queue.push_back(edge.target.as_str());
            }
        }
        seen
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&ParsedNode> {
        self.node_indices.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_indices.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Region ids in manifest order.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn pairs(&self) -> &[TeleporterPair] {
        &self.pairs
    }

    /// Entry node ids ordered by region, then layout.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// All nodes ordered by region, then layout.
    pub fn nodes(&self) -> Vec<&ParsedNode> {
        let mut nodes: Vec<&ParsedNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| self.cmp_nodes(a, b));
        nodes
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    pub fn region_index(&self, region: &str) -> usize {
        self.regions
            .iter()
            .position(|r| r == region)
            .unwrap_or(self.regions.len())
    }

    /// Deterministic node order: region (manifest order), then layout.
    pub fn cmp_nodes(&self, a: &ParsedNode, b: &ParsedNode) -> Ordering {
        self.region_index(&a.region)
            .cmp(&self.region_index(&b.region))
            .then_with(|| a.layout_cmp(b))
    }

    pub fn cmp_ids(&self, a: &str, b: &str) -> Ordering {
        match (self.node(a), self.node(b)) {
            (Some(na), Some(nb)) => self.cmp_nodes(na, nb),
            _ => a.cmp(b),
        }
    }

    /// Outgoing edges ordered by target layout, then edge id.
    pub fn outgoing(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.edges_directed(node_id, Direction::Outgoing)
    }

    /// Incoming edges ordered by source layout, then edge id.
    pub fn incoming(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.edges_directed(node_id, Direction::Incoming)
    }

    fn edges_directed(&self, node_id: &str, direction: Direction) -> Vec<&GraphEdge> {
        let Some(&idx) = self.node_indices.get(node_id) else {
            return vec![];
        };
        let mut edges: Vec<&GraphEdge> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| e.weight())
            .collect();
        edges.sort_by(|a, b| {
            let (ka, kb) = match direction {
                Direction::Outgoing => (&a.target, &b.target),
                Direction::Incoming => (&a.source, &b.source),
            };
            self.cmp_ids(ka, kb).then_with(|| a.id.cmp(&b.id))
        });
        edges
    }

    pub fn outgoing_control(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.outgoing(node_id)
            .into_iter()
            .filter(|e| e.semantics.is_control())
            .collect()
    }

    pub fn incoming_control(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.incoming(node_id)
            .into_iter()
            .filter(|e| e.semantics.is_control())
            .collect()
    }

    /// Configuration sources wired into `node_id`, in layout order.
    pub fn data_inputs(&self, node_id: &str) -> Vec<(&GraphEdge, &ParsedNode)> {
        self.incoming(node_id)
            .into_iter()
            .filter(|e| e.semantics == EdgeSemantics::Data)
            .filter_map(|e| self.node(&e.source).map(|n| (e, n)))
            .collect()
    }

    /// True for the edge from a loop marker's `body` port into its body.
    pub fn is_body_edge(&self, edge: &GraphEdge) -> bool {
        self.node(&edge.source)
            .is_some_and(|n| is_body_port(n, edge.source_port.as_deref()))
    }
}

fn is_body_port(source: &ParsedNode, source_port: Option<&str>) -> bool {
    source.kind() == NodeKind::Loop && source_port == Some(LOOP_BODY_PORT)
}

/// The fixed classification table. `None` means "default control edge",
/// resolved to SEQUENTIAL or PARALLEL_BRANCH once fan-out is known.
fn classify(
    source: &ParsedNode,
    edge: &ParsedEdge,
    target: &ParsedNode,
) -> Result<Option<EdgeSemantics>, CompilationError> {
    let (source_kind, target_kind) = (source.kind(), target.kind());
    let source_port = edge.source_port.as_deref();
    let into_config_port = edge
        .target_port
        .as_deref()
        .and_then(ConfigPort::from_handle)
        .is_some();

    if source_kind.is_data_source() || target_kind.is_data_source() || into_config_port {
        return Ok(Some(EdgeSemantics::Data));
    }

    match (source_kind, target_kind) {
        (NodeKind::TeleporterOut, NodeKind::TeleporterIn) => {
            if source.channel() == target.channel() {
                Ok(Some(EdgeSemantics::Teleport))
            } else {
                Err(CompilationError::teleporter(
                    "T003",
                    format!(
                        "Edge '{}' connects teleporters on different channels ('{}' → '{}')",
                        edge.id,
                        source.channel().unwrap_or_default(),
                        target.channel().unwrap_or_default()
                    ),
                    Location::node(&edge.region, &source.id),
                ))
            }
        }
        (NodeKind::Loop, _) if source_port == Some(LOOP_BODY_PORT) => {
            Ok(Some(EdgeSemantics::Sequential))
        }
        (NodeKind::UserInput, _) => Ok(Some(EdgeSemantics::Conditional)),
        _ if source_port.is_some_and(|p| p.starts_with(ROUTE_PORT_PREFIX)) => {
            Ok(Some(EdgeSemantics::Conditional))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, node_type: &str, y: f64, data: serde_json::Value) -> ParsedNode {
        let record = NodeRecord {
            id: id.into(),
            node_type: node_type.into(),
            position: Position { x: 0.0, y },
            data,
        };
        crate::parse::parse_node("main", &record).unwrap()
    }

    fn edge(id: &str, source: &str, target: &str, source_port: Option<&str>, target_port: Option<&str>) -> ParsedEdge {
        ParsedEdge {
            id: id.into(),
            region: "main".into(),
            source: source.into(),
            source_port: source_port.map(Into::into),
            target: target.into(),
            target_port: target_port.map(Into::into),
        }
    }

    fn project(nodes: Vec<ParsedNode>, edges: Vec<ParsedEdge>) -> ParsedProject {
        ParsedProject {
            regions: vec!["main".into()],
            nodes,
            edges,
        }
    }

    fn semantics_of(graph: &WorkflowGraph, edge_id: &str) -> EdgeSemantics {
        graph
            .edges()
            .find(|e| e.id == edge_id)
            .map(|e| e.semantics)
            .unwrap()
    }

    #[test]
    fn fan_out_turns_default_edges_into_branches() {
        let graph = WorkflowGraph::build(&project(
            vec![
                node("s", "start", 0.0, serde_json::json!({})),
                node("a", "agent", 1.0, serde_json::json!({})),
                node("b", "agent", 2.0, serde_json::json!({})),
                node("c", "agent", 3.0, serde_json::json!({})),
            ],
            vec![
                edge("e1", "s", "a", None, None),
                edge("e2", "a", "b", None, None),
                edge("e3", "a", "c", None, None),
            ],
        ))
        .unwrap();

        assert_eq!(semantics_of(&graph, "e1"), EdgeSemantics::Sequential);
        assert_eq!(semantics_of(&graph, "e2"), EdgeSemantics::ParallelBranch);
        assert_eq!(semantics_of(&graph, "e3"), EdgeSemantics::ParallelBranch);
        assert_eq!(graph.entries(), ["s".to_string()]);
    }

    #[test]
    fn config_ports_and_variables_are_data() {
        let graph = WorkflowGraph::build(&project(
            vec![
                node("a", "agent", 0.0, serde_json::json!({})),
                node("v", "variable", 1.0, serde_json::json!({"name": "k", "value": 1})),
                node("i", "custom", 2.0, serde_json::json!({"resource": "instruction", "text": "hi"})),
            ],
            vec![
                edge("e1", "v", "a", None, Some("context")),
                edge("e2", "i", "a", None, Some("instruction")),
            ],
        ))
        .unwrap();

        assert_eq!(semantics_of(&graph, "e1"), EdgeSemantics::Data);
        assert_eq!(semantics_of(&graph, "e2"), EdgeSemantics::Data);
        assert_eq!(graph.data_inputs("a").len(), 2);
        // Data inputs never make an agent lose its entry status.
        assert_eq!(graph.entries(), ["a".to_string()]);
    }

    #[test]
    fn loop_body_edge_does_not_count_as_fan_out() {
        let graph = WorkflowGraph::build(&project(
            vec![
                node("l", "loop", 0.0, serde_json::json!({})),
                node("f", "agent", 1.0, serde_json::json!({})),
                node("g", "agent", 2.0, serde_json::json!({})),
            ],
            vec![
                edge("body", "l", "f", Some("body"), None),
                edge("back", "f", "l", None, None),
                edge("exit", "l", "g", Some("exit"), None),
            ],
        ))
        .unwrap();

        assert_eq!(semantics_of(&graph, "exit"), EdgeSemantics::Sequential);
        assert_eq!(graph.entries(), ["l".to_string()]);
    }

    #[test]
    fn teleporters_pair_and_link() {
        let graph = WorkflowGraph::build(&project(
            vec![
                node("o", "teleporter-out", 0.0, serde_json::json!({"channel": "x"})),
                node("i", "teleporter-in", 1.0, serde_json::json!({"channel": "x"})),
            ],
            vec![],
        ))
        .unwrap();

        assert_eq!(graph.pairs().len(), 1);
        assert_eq!(semantics_of(&graph, "teleport:x"), EdgeSemantics::Teleport);
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let err = WorkflowGraph::build(&project(
            vec![node("a", "agent", 0.0, serde_json::json!({}))],
            vec![edge("e1", "a", "ghost", None, None)],
        ))
        .err()
        .unwrap();
        assert_eq!(err.code, "G001");
    }
}
