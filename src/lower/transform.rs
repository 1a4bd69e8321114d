//! Bottom-up transformation of hierarchy trees into `AgentIR`.

use std::collections::BTreeMap;

use serde_json::Value;

use super::hierarchy::HierarchyNode;
use super::resolve::Resolver;
use crate::error::{CompilationError, Location, SeedConflict};
use crate::ir::types::{AgentIR, AgentKind};
use crate::parse::graph::WorkflowGraph;
use crate::parse::types::{NodePayload, ParsedNode};

pub struct Transformer<'a> {
    graph: &'a WorkflowGraph,
    resolver: Resolver<'a>,
    seed: BTreeMap<String, BTreeMap<String, Value>>,
    conflicts: Vec<SeedConflict>,
}

impl<'a> Transformer<'a> {
    pub fn new(graph: &'a WorkflowGraph, resolver: Resolver<'a>) -> Self {
        Transformer {
            graph,
            resolver,
            seed: BTreeMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Children are built before their parent, so a composite only ever
    /// receives fully resolved subagents.
    pub fn agent(&mut self, node: &HierarchyNode) -> Result<AgentIR, CompilationError> {
        match node {
            HierarchyNode::Leaf { node_id } => self.leaf(node_id),
            HierarchyNode::Sequential { id, region, children } => {
                let mut agent = AgentIR::bare(id, id, AgentKind::Sequential, region);
                agent.subagents = self.agents(children)?;
                Ok(agent)
            }
            HierarchyNode::Parallel { id, region, children } => {
                let mut agent = AgentIR::bare(id, id, AgentKind::Parallel, region);
                agent.subagents = self.agents(children)?;
                Ok(agent)
            }
            HierarchyNode::Loop { node_id, children } => {
                let subagents = self.agents(children)?;
                let marker = self.node(node_id)?;
                let mut agent = AgentIR::bare(node_id, marker.label(), AgentKind::Loop, &marker.region);
                agent.source_node = Some(node_id.clone());
                if let NodePayload::Loop(data) = &marker.payload {
                    agent.max_iterations = data.max_iterations;
                }
                agent.subagents = subagents;
                Ok(agent)
            }
        }
    }

    fn agents(&mut self, children: &[HierarchyNode]) -> Result<Vec<AgentIR>, CompilationError> {
        children.iter().map(|child| self.agent(child)).collect()
    }

    fn leaf(&mut self, node_id: &str) -> Result<AgentIR, CompilationError> {
        let node = self.node(node_id)?;
        let NodePayload::Agent(data) = &node.payload else {
            return Err(CompilationError::hierarchy(
                "H004",
                format!("Node '{}' of kind {} cannot be an llm agent", node.id, node.kind()),
                Location::node(&node.region, &node.id),
            ));
        };

        let config = self.resolver.resolve(node, data)?;

        let mut agent = AgentIR::bare(&node.id, node.label(), AgentKind::Llm, &node.region);
        agent.source_node = Some(node.id.clone());
        agent.description = data.description.clone();
        agent.model = data.model.clone();
        agent.output_key = data.output_key.clone();
        agent.instruction = config.instruction;
        agent.tools = config.tools;
        agent.callbacks = config.callbacks;
        agent.input_schema = config.input_schema;
        agent.output_schema = config.output_schema;
        agent.context_variables = config.context;

        if !agent.context_variables.is_empty() {
            self.seed
                .insert(agent.id.clone(), agent.context_variables.clone());
        }
        self.conflicts.extend(config.conflicts);

        Ok(agent)
    }

    fn node(&self, node_id: &str) -> Result<&'a ParsedNode, CompilationError> {
        self.graph.node(node_id).ok_or_else(|| {
            CompilationError::hierarchy(
                "H004",
                format!("Hierarchy references unknown node '{}'", node_id),
                Location::none(),
            )
        })
    }

    /// The session seed, or every conflict found while building it.
    pub fn finish(self) -> (BTreeMap<String, BTreeMap<String, Value>>, Vec<SeedConflict>) {
        (self.seed, self.conflicts)
    }
}
