//! Hierarchy builder: partitions the flat control graph of each region into a
//! tree of sequential chains, parallel fork/join groups and loop bodies.
//!
//! The walk starts at every entry node and follows control edges. Agents
//! become leaves, loop markers become loop constructs around their body, and
//! pass-through kinds only route control. A node with several outgoing control
//! edges is a fork; its join is the earliest node every branch reaches, and it
//! is accepted only if all of the join's predecessors were consumed by that
//! same fork. Anything the builder cannot place unambiguously is recorded as a
//! [`StructuralIssue`] and reported by the validator.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::debug;

use super::loops::LoopScopes;
use crate::parse::graph::{EdgeSemantics, GraphEdge, WorkflowGraph};
use crate::parse::types::NodeKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyNode {
    Leaf {
        node_id: String,
    },
    Sequential {
        id: String,
        region: String,
        children: Vec<HierarchyNode>,
    },
    Parallel {
        id: String,
        region: String,
        children: Vec<HierarchyNode>,
    },
    Loop {
        node_id: String,
        children: Vec<HierarchyNode>,
    },
}

impl HierarchyNode {
    pub fn id(&self) -> &str {
        match self {
            HierarchyNode::Leaf { node_id } | HierarchyNode::Loop { node_id, .. } => node_id,
            HierarchyNode::Sequential { id, .. } | HierarchyNode::Parallel { id, .. } => id,
        }
    }

    pub fn children(&self) -> &[HierarchyNode] {
        match self {
            HierarchyNode::Leaf { .. } => &[],
            HierarchyNode::Sequential { children, .. }
            | HierarchyNode::Parallel { children, .. }
            | HierarchyNode::Loop { children, .. } => children,
        }
    }

    /// Graph node ids of every leaf, depth-first.
    pub fn leaf_ids(&self) -> Vec<&str> {
        match self {
            HierarchyNode::Leaf { node_id } => vec![node_id.as_str()],
            _ => self.children().iter().flat_map(|c| c.leaf_ids()).collect(),
        }
    }
}

impl fmt::Display for HierarchyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |children: &[HierarchyNode]| {
            children
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            HierarchyNode::Leaf { node_id } => write!(f, "{}", node_id),
            HierarchyNode::Sequential { children, .. } => write!(f, "sequential[{}]", list(children)),
            HierarchyNode::Parallel { children, .. } => write!(f, "parallel[{}]", list(children)),
            HierarchyNode::Loop { node_id, children } => write!(f, "loop {}{{{}}}", node_id, list(children)),
        }
    }
}

/// Something the builder refused to place; turned into a validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralIssue {
    /// A node reached from several paths that no single fork owns.
    AmbiguousMerge { node: String, predecessors: Vec<String> },
    /// A node reached again after it was already placed.
    Revisit { node: String, from: String },
    /// More than one outgoing CONDITIONAL edge.
    ConditionalFanOut { node: String, targets: Vec<String> },
    /// A loop body edge leaving the body.
    LoopEscape { marker: String, from: String, to: String },
}

impl StructuralIssue {
    pub fn node(&self) -> &str {
        match self {
            StructuralIssue::AmbiguousMerge { node, .. }
            | StructuralIssue::Revisit { node, .. }
            | StructuralIssue::ConditionalFanOut { node, .. } => node,
            StructuralIssue::LoopEscape { from, .. } => from,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// One tree per region that has an entry, in region order.
    pub roots: Vec<(String, HierarchyNode)>,
    pub issues: Vec<StructuralIssue>,
    /// Every node the walk placed (agents and pass-through kinds alike).
    pub visited: BTreeSet<String>,
}

impl Hierarchy {
    pub fn build(graph: &WorkflowGraph, loops: &LoopScopes) -> Hierarchy {
        let mut builder = Builder {
            graph,
            loops,
            visited: BTreeSet::new(),
            issues: Vec::new(),
            reported: HashSet::new(),
        };

        let mut roots = Vec::new();
        for region in graph.regions() {
            let mut trees = Vec::new();
            for entry in graph.entries() {
                let in_region = graph.node(entry).is_some_and(|n| &n.region == region);
                if !in_region {
                    continue;
                }
                let items = builder.build_chain(entry, &Frame::default());
                trees.extend(builder.seal(entry, items));
            }

            let root = match trees.len() {
                0 => continue,
                1 => trees.remove(0),
                _ => HierarchyNode::Parallel {
                    id: format!("{}__entries", region),
                    region: region.clone(),
                    children: trees,
                },
            };
            roots.push((region.clone(), root));
        }

        debug!(
            roots = roots.len(),
            placed = builder.visited.len(),
            issues = builder.issues.len(),
            "hierarchy built"
        );

        Hierarchy {
            roots,
            issues: builder.issues,
            visited: builder.visited,
        }
    }
}

/// Where a chain must stop and which loop body (if any) it lives in.
#[derive(Debug, Clone, Default)]
struct Frame {
    stops: Vec<String>,
    body: Option<String>,
}

impl Frame {
    fn with_stop(&self, stop: &str) -> Frame {
        let mut stops = self.stops.clone();
        stops.push(stop.to_string());
        Frame {
            stops,
            body: self.body.clone(),
        }
    }

    fn is_stop(&self, id: &str) -> bool {
        self.stops.iter().any(|s| s == id)
    }
}

struct Builder<'g> {
    graph: &'g WorkflowGraph,
    loops: &'g LoopScopes,
    visited: BTreeSet<String>,
    issues: Vec<StructuralIssue>,
    reported: HashSet<String>,
}

impl<'g> Builder<'g> {
    /// Walk from `start` until a stop, a dead end or an unowned merge.
    fn build_chain(&mut self, start: &str, frame: &Frame) -> Vec<HierarchyNode> {
        let mut items = Vec::new();
        let mut current = start.to_string();
        let mut previous: Option<String> = None;
        let mut via_join = false;

        loop {
            if frame.is_stop(&current) {
                break;
            }
            if self.visited.contains(&current) {
                self.report(StructuralIssue::Revisit {
                    node: current.clone(),
                    from: previous.clone().unwrap_or_default(),
                });
                break;
            }
            let predecessors = self.forward_predecessors(&current);
            if predecessors.len() > 1 && !via_join {
                self.report(StructuralIssue::AmbiguousMerge {
                    node: current.clone(),
                    predecessors,
                });
                break;
            }

            let Some(node) = self.graph.node(&current) else {
                break;
            };
            self.visited.insert(current.clone());

            match node.kind() {
                NodeKind::Agent => items.push(HierarchyNode::Leaf {
                    node_id: current.clone(),
                }),
                NodeKind::Loop => items.push(self.build_loop(&current)),
                NodeKind::Start
                | NodeKind::End
                | NodeKind::ParallelJoin
                | NodeKind::TeleporterOut
                | NodeKind::TeleporterIn
                | NodeKind::UserInput
                | NodeKind::Variable
                | NodeKind::Custom => {}
            }

            let (successors, escaping) = self.successors(&current, frame);
            if let Some(marker) = &frame.body {
                for edge in escaping {
                    self.report(StructuralIssue::LoopEscape {
                        marker: marker.clone(),
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                    });
                }
            }

            let conditional: Vec<String> = successors
                .iter()
                .filter(|e| e.semantics == EdgeSemantics::Conditional)
                .map(|e| e.target.clone())
                .collect();
            if conditional.len() > 1 {
                self.report(StructuralIssue::ConditionalFanOut {
                    node: current.clone(),
                    targets: conditional,
                });
                break;
            }

            previous = Some(current.clone());
            match successors.as_slice() {
                [] => break,
                [edge] => {
                    current = edge.target.clone();
                    via_join = false;
                }
                _ => {
                    let targets: Vec<String> = successors.iter().map(|e| e.target.clone()).collect();
                    let (group, join) = self.build_fork(&current, &targets, frame);
                    match group {
                        Some(HierarchyNode::Sequential { children, .. }) => items.extend(children),
                        other => items.extend(other),
                    }
                    match join {
                        Some(join) => {
                            current = join;
                            via_join = true;
                        }
                        None => break,
                    }
                }
            }
        }

        items
    }

    fn build_loop(&mut self, marker: &str) -> HierarchyNode {
        let children = match self.loops.get(marker) {
            Some(scope) => {
                let frame = Frame {
                    stops: Vec::new(),
                    body: Some(marker.to_string()),
                };
                self.build_chain(&scope.body_head, &frame)
            }
            None => Vec::new(),
        };
        HierarchyNode::Loop {
            node_id: marker.to_string(),
            children,
        }
    }

    /// Build every branch of a fork; returns the group and the accepted join.
    fn build_fork(
        &mut self,
        fork: &str,
        targets: &[String],
        frame: &Frame,
    ) -> (Option<HierarchyNode>, Option<String>) {
        let join = self.find_join(targets, frame);
        let branch_frame = match &join {
            Some(join) => frame.with_stop(join),
            None => frame.clone(),
        };

        let before = self.visited.clone();
        let mut branches = Vec::new();
        for target in targets {
            if join.as_deref() == Some(target.as_str()) {
                continue;
            }
            let items = self.build_chain(target, &branch_frame);
            branches.extend(self.seal(target, items));
        }

        let join = join.filter(|join| {
            let predecessors = self.forward_predecessors(join);
            let owned = predecessors
                .iter()
                .all(|p| p == fork || (self.visited.contains(p) && !before.contains(p)));
            if !owned {
                self.report(StructuralIssue::AmbiguousMerge {
                    node: join.clone(),
                    predecessors,
                });
            }
            owned
        });

        let region = self
            .graph
            .node(fork)
            .map(|n| n.region.clone())
            .unwrap_or_default();
        let group = match branches.len() {
            0 => None,
            1 => branches.pop(),
            _ => Some(HierarchyNode::Parallel {
                id: format!("{}__parallel", fork),
                region,
                children: branches,
            }),
        };
        (group, join)
    }

    /// The unique earliest node reachable from every branch, unless it lies
    /// outside this fork (an enclosing stop).
    fn find_join(&self, targets: &[String], frame: &Frame) -> Option<String> {
        let mut reaches = targets.iter().map(|t| self.reach(t, frame));
        let first = reaches.next()?;
        let common: HashSet<String> = reaches.fold(first, |acc, r| acc.intersection(&r).cloned().collect());

        let reach_of: HashMap<&String, HashSet<String>> =
            common.iter().map(|c| (c, self.reach(c, frame))).collect();
        let minimal: Vec<&String> = common
            .iter()
            .filter(|c| {
                !reach_of
                    .iter()
                    .any(|(other, reached)| other != c && reached.contains(c.as_str()))
            })
            .collect();

        match minimal.as_slice() {
            [join] if !frame.is_stop(join) => Some((*join).clone()),
            _ => None,
        }
    }

    /// Forward closure from `start` (inclusive). Stops are included but not expanded.
    fn reach(&self, start: &str, frame: &Frame) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) || frame.is_stop(&id) {
                continue;
            }
            for edge in self.successors(&id, frame).0 {
                queue.push_back(edge.target.clone());
            }
        }
        seen
    }

    /// Outgoing control edges the walk may follow, plus the ones leaving the
    /// current loop body. Back edges and loop body entries are never followed.
    fn successors(&self, id: &str, frame: &Frame) -> (Vec<&'g GraphEdge>, Vec<&'g GraphEdge>) {
        let graph = self.graph;
        let is_loop = graph.node(id).is_some_and(|n| n.kind() == NodeKind::Loop);
        let body = frame.body.as_deref().and_then(|marker| self.loops.get(marker));

        let mut kept = Vec::new();
        let mut escaping = Vec::new();
        for edge in graph.outgoing_control(id) {
            if self.loops.is_back_edge(&edge.source, &edge.target) {
                continue;
            }
            if is_loop && graph.is_body_edge(edge) {
                continue;
            }
            match body {
                Some(scope) if !scope.contains(&edge.target) => escaping.push(edge),
                _ => kept.push(edge),
            }
        }
        (kept, escaping)
    }

    /// Control predecessors excluding loop back edges, in layout order.
    fn forward_predecessors(&self, id: &str) -> Vec<String> {
        self.graph
            .incoming_control(id)
            .into_iter()
            .filter(|e| !self.loops.is_back_edge(&e.source, &e.target))
            .map(|e| e.source.clone())
            .collect()
    }

    /// Collapse a chain: nothing, the single element, or a sequential group.
    fn seal(&self, anchor: &str, mut items: Vec<HierarchyNode>) -> Option<HierarchyNode> {
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(HierarchyNode::Sequential {
                id: format!("{}__sequential", anchor),
                region: self
                    .graph
                    .node(anchor)
                    .map(|n| n.region.clone())
                    .unwrap_or_default(),
                children: items,
            }),
        }
    }

    fn report(&mut self, issue: StructuralIssue) {
        let key = match &issue {
            StructuralIssue::AmbiguousMerge { node, .. } => format!("merge:{}", node),
            StructuralIssue::Revisit { node, from } => format!("revisit:{}:{}", node, from),
            StructuralIssue::ConditionalFanOut { node, .. } => format!("conditional:{}", node),
            StructuralIssue::LoopEscape { from, to, .. } => format!("escape:{}:{}", from, to),
        };
        if self.reported.insert(key) {
            debug!(node = %issue.node(), ?issue, "structural issue");
            self.issues.push(issue);
        }
    }
}
