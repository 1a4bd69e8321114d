//! Resolvers: the configuration of an `llm` leaf, gathered from the agent's
//! inline data and from the DATA neighbours wired into its configuration
//! ports.
//!
//! Inline values always come first, neighbours follow in layout order.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::error::{CompilationError, Location, SeedConflict};
use crate::ir::types::{CallbackDescriptor, SchemaDescriptor, ToolDescriptor};
use crate::load::ProjectSnapshot;
use crate::parse::graph::{GraphEdge, WorkflowGraph};
use crate::parse::types::*;
use crate::registry::RegistryView;

/// Everything the resolvers produce for one leaf.
#[derive(Debug, Clone, Default)]
pub struct LeafConfig {
    pub instruction: Option<String>,
    pub tools: Vec<ToolDescriptor>,
    pub callbacks: Vec<CallbackDescriptor>,
    pub input_schema: Option<SchemaDescriptor>,
    pub output_schema: Option<SchemaDescriptor>,
    pub context: BTreeMap<String, Value>,
    pub conflicts: Vec<SeedConflict>,
}

pub struct Resolver<'a> {
    graph: &'a WorkflowGraph,
    snapshot: &'a ProjectSnapshot,
    registry: &'a RegistryView<'a>,
}

/// A DATA neighbour sorted onto the resource it provides.
enum Feed<'n> {
    Instruction(&'n ParsedNode, &'n CustomData),
    Tool(&'n str),
    Callback(&'n str, CallbackPhase),
    Schema(&'n ParsedNode, &'n CustomData, Option<SchemaDirection>),
    Variable(&'n ParsedNode, &'n VariableData),
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a WorkflowGraph, snapshot: &'a ProjectSnapshot, registry: &'a RegistryView<'a>) -> Self {
        Resolver {
            graph,
            snapshot,
            registry,
        }
    }

    pub fn resolve(&self, node: &ParsedNode, agent: &AgentData) -> Result<LeafConfig, CompilationError> {
        let feeds = self.feeds(node)?;

        let (input_schema, output_schema) = self.schemas(node, &feeds)?;
        let (context, conflicts) = self.context(node, agent, &feeds);

        Ok(LeafConfig {
            instruction: self.instruction(node, agent, &feeds)?,
            tools: self.tools(node, agent, &feeds)?,
            callbacks: self.callbacks(node, agent, &feeds)?,
            input_schema,
            output_schema,
            context,
            conflicts,
        })
    }

    /// Classify every DATA neighbour by the port it is wired to.
    fn feeds(&self, node: &ParsedNode) -> Result<Vec<Feed<'a>>, CompilationError> {
        let mut feeds = Vec::new();
        for (edge, source) in self.graph.data_inputs(&node.id) {
            let port = edge.target_port.as_deref().and_then(ConfigPort::from_handle);
            let feed = match (&source.payload, port) {
                (NodePayload::Variable(data), _) => Feed::Variable(source, data),
                (NodePayload::Custom(data @ CustomData::Instruction { .. }), None | Some(ConfigPort::Instruction)) => {
                    Feed::Instruction(source, data)
                }
                (NodePayload::Custom(CustomData::Tool { tool_id }), None | Some(ConfigPort::Tools)) => {
                    Feed::Tool(tool_id)
                }
                (
                    NodePayload::Custom(CustomData::Callback { callback_id, phase }),
                    None | Some(ConfigPort::Callbacks),
                ) => Feed::Callback(callback_id, *phase),
                (NodePayload::Custom(data @ CustomData::Schema { .. }), None) => Feed::Schema(source, data, None),
                (NodePayload::Custom(data @ CustomData::Schema { .. }), Some(ConfigPort::InputSchema)) => {
                    Feed::Schema(source, data, Some(SchemaDirection::Input))
                }
                (NodePayload::Custom(data @ CustomData::Schema { .. }), Some(ConfigPort::OutputSchema)) => {
                    Feed::Schema(source, data, Some(SchemaDirection::Output))
                }
                _ => return Err(port_mismatch(node, edge, source, port)),
            };
            feeds.push(feed);
        }
        Ok(feeds)
    }

    fn instruction(
        &self,
        node: &ParsedNode,
        agent: &AgentData,
        feeds: &[Feed<'_>],
    ) -> Result<Option<String>, CompilationError> {
        let mut parts = Vec::new();
        parts.extend(agent.instruction.clone());
        if let Some(path) = &agent.instruction_file {
            parts.push(self.file(node, path)?);
        }
        if let Some(id) = &agent.prompt_ref {
            parts.push(self.prompt(node, id)?);
        }

        for feed in feeds {
            let Feed::Instruction(source, CustomData::Instruction { text, file, prompt_ref }) = feed else {
                continue;
            };
            parts.extend(text.clone());
            if let Some(path) = file {
                parts.push(self.file(source, path)?);
            }
            if let Some(id) = prompt_ref {
                parts.push(self.prompt(source, id)?);
            }
        }

        parts.retain(|p| !p.trim().is_empty());
        Ok(if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        })
    }

    fn tools(
        &self,
        node: &ParsedNode,
        agent: &AgentData,
        feeds: &[Feed<'_>],
    ) -> Result<Vec<ToolDescriptor>, CompilationError> {
        let ids = agent.tools.iter().map(String::as_str).chain(feeds.iter().filter_map(|f| match f {
            Feed::Tool(id) => Some(*id),
            _ => None,
        }));

        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let def = self.registry.tool(id).ok_or_else(|| {
                CompilationError::tool_load(
                    format!("Agent '{}' uses unknown tool '{}'", node.label(), id),
                    Location::node(&node.region, &node.id),
                )
            })?;
            tools.push(ToolDescriptor {
                id: def.id.clone(),
                name: def.name.clone().unwrap_or_else(|| def.id.clone()),
                description: def.description.clone(),
                source: def.source,
                config: def.config.clone(),
            });
        }
        Ok(tools)
    }

    fn callbacks(
        &self,
        node: &ParsedNode,
        agent: &AgentData,
        feeds: &[Feed<'_>],
    ) -> Result<Vec<CallbackDescriptor>, CompilationError> {
        let bindings = agent
            .callbacks
            .iter()
            .map(|b| (b.id.as_str(), b.phase))
            .chain(feeds.iter().filter_map(|f| match f {
                Feed::Callback(id, phase) => Some((*id, *phase)),
                _ => None,
            }));

        let mut seen = HashSet::new();
        let mut callbacks = Vec::new();
        for (id, phase) in bindings {
            if !seen.insert((id, phase)) {
                continue;
            }
            let def = self.registry.callback(id).ok_or_else(|| {
                CompilationError::callback_load(
                    format!("Agent '{}' uses unknown callback '{}'", node.label(), id),
                    Location::node(&node.region, &node.id),
                )
            })?;
            callbacks.push(CallbackDescriptor {
                id: def.id.clone(),
                phase,
                handler: def.handler.clone(),
                priority: def.priority,
            });
        }

        callbacks.sort_by(|a, b| {
            a.phase
                .cmp(&b.phase)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(callbacks)
    }

    fn schemas(
        &self,
        node: &ParsedNode,
        feeds: &[Feed<'_>],
    ) -> Result<(Option<SchemaDescriptor>, Option<SchemaDescriptor>), CompilationError> {
        let mut input = None;
        let mut output = None;

        for feed in feeds {
            let Feed::Schema(source, CustomData::Schema { schema_id, schema, direction }, port) = feed else {
                continue;
            };
            let direction = port.or(*direction).unwrap_or(SchemaDirection::Output);
            let value = match (schema, schema_id) {
                (Some(inline), _) => inline.clone(),
                (None, Some(id)) => self
                    .registry
                    .schema(id)
                    .map(|def| def.schema.clone())
                    .ok_or_else(|| {
                        CompilationError::schema_load(
                            format!("Schema node '{}' references unknown schema '{}'", source.id, id),
                            Location::node(&source.region, &source.id),
                        )
                    })?,
                (None, None) => continue,
            };

            let slot = match direction {
                SchemaDirection::Input => &mut input,
                SchemaDirection::Output => &mut output,
            };
            if slot.is_some() {
                return Err(CompilationError::schema_load(
                    format!(
                        "Agent '{}' has more than one {} schema",
                        node.label(),
                        match direction {
                            SchemaDirection::Input => "input",
                            SchemaDirection::Output => "output",
                        }
                    ),
                    Location::node(&node.region, &node.id),
                ));
            }
            *slot = Some(SchemaDescriptor {
                id: schema_id.clone(),
                direction,
                schema: value,
            });
        }

        Ok((input, output))
    }

    /// Inline context first, then variable neighbours. A variable supplied
    /// with different values by several sources is a conflict.
    fn context(
        &self,
        node: &ParsedNode,
        agent: &AgentData,
        feeds: &[Feed<'_>],
    ) -> (BTreeMap<String, Value>, Vec<SeedConflict>) {
        let mut sources: BTreeMap<String, Vec<(String, Value)>> = BTreeMap::new();
        for (name, value) in &agent.context {
            sources
                .entry(name.clone())
                .or_default()
                .push((node.id.clone(), value.clone()));
        }
        for feed in feeds {
            if let Feed::Variable(source, data) = feed {
                for (name, value) in data.entries() {
                    sources.entry(name).or_default().push((source.id.clone(), value));
                }
            }
        }

        let mut context = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (name, supplied) in sources {
            let Some((_, first)) = supplied.first() else {
                continue;
            };
            if supplied.iter().any(|(_, v)| v != first) {
                conflicts.push(SeedConflict {
                    agent_id: node.id.clone(),
                    variable: name,
                    sources: supplied,
                });
            } else {
                context.insert(name, first.clone());
            }
        }
        (context, conflicts)
    }

    fn file(&self, node: &ParsedNode, path: &str) -> Result<String, CompilationError> {
        self.snapshot.file(path).map(str::to_string).ok_or_else(|| {
            CompilationError::prompt_load(
                format!("Instruction file '{}' of node '{}' was not loaded", path, node.label()),
                Location::node(&node.region, &node.id),
            )
        })
    }

    fn prompt(&self, node: &ParsedNode, id: &str) -> Result<String, CompilationError> {
        self.registry
            .prompt(id)
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                CompilationError::prompt_load(
                    format!("Node '{}' references unknown prompt '{}'", node.label(), id),
                    Location::node(&node.region, &node.id),
                )
            })
    }
}

/// A neighbour wired into a port it cannot feed. The error family follows
/// the port (or the resource, for unknown ports).
fn port_mismatch(node: &ParsedNode, edge: &GraphEdge, source: &ParsedNode, port: Option<ConfigPort>) -> CompilationError {
    let port_name = edge.target_port.as_deref().unwrap_or("<none>");
    let message = format!(
        "{} node '{}' cannot feed port '{}' of agent '{}'",
        describe(source),
        source.id,
        port_name,
        node.label()
    );
    let location = Location::node(&node.region, &node.id);

    let family = match (port, &source.payload) {
        (Some(ConfigPort::Tools), _) => "tool",
        (Some(ConfigPort::Instruction), _) => "prompt",
        (Some(ConfigPort::Callbacks), _) => "callback",
        (Some(ConfigPort::InputSchema | ConfigPort::OutputSchema), _) => "schema",
        (_, NodePayload::Custom(custom)) => match custom {
            CustomData::Tool { .. } => "tool",
            CustomData::Instruction { .. } => "prompt",
            CustomData::Callback { .. } => "callback",
            CustomData::Schema { .. } => "schema",
        },
        _ => "context",
    };

    match family {
        "tool" => CompilationError::tool_load(message, location),
        "prompt" => CompilationError::prompt_load(message, location),
        "callback" => CompilationError::callback_load(message, location),
        "schema" => CompilationError::schema_load(message, location),
        _ => CompilationError::context_load(message, location),
    }
}

fn describe(node: &ParsedNode) -> String {
    match &node.payload {
        NodePayload::Custom(custom) => format!("Custom {}", custom.resource()),
        other => other.kind().to_string(),
    }
}
