//! IR type definitions.
//!
//! The IR bridges the visual node/edge graph (input) and the agent runtime
//! (output). Each region's control graph becomes one tree of [`AgentIR`]
//! values: `llm` leaves for agent nodes and `sequential`, `parallel` and `loop`
//! composites that own their subagents. The runtime never sees the graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parse::types::{CallbackPhase, SchemaDirection};
use crate::registry::ToolSource;
use crate::validate::ValidationWarning;

// =============================================================================
// TOP-LEVEL IR
// =============================================================================

/// Complete intermediate representation of a compiled project.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowIR {
    pub metadata: WorkflowMetadata,
    pub project_path: Option<String>,
    pub tab_ids: BTreeSet<String>,
    /// A start node is one of the entries.
    pub has_start_node: bool,
    /// An end node is reachable from an entry.
    pub has_end_node: bool,
    /// Build-time substitution values (options over manifest).
    pub global_variables: BTreeMap<String, String>,
    /// One root agent per region that has an entry.
    pub roots: BTreeMap<String, AgentIR>,
    /// Every agent of the forest keyed by id.
    pub all_agents: BTreeMap<String, AgentIR>,
    /// One entry per teleporter pair.
    pub connections: Vec<TeleportConnection>,
    /// Initial context variables per llm agent, as seeded into the session.
    pub session_seed: BTreeMap<String, BTreeMap<String, Value>>,
    pub warnings: Vec<ValidationWarning>,
}

impl WorkflowIR {
    pub fn agent(&self, id: &str) -> Option<&AgentIR> {
        self.all_agents.get(id)
    }

    /// Number of `llm` agents in the forest.
    pub fn leaf_count(&self) -> usize {
        self.all_agents.values().filter(|a| !a.is_composite()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub project_name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportConnection {
    pub channel: String,
    pub out_node: String,
    pub out_region: String,
    pub in_node: String,
    pub in_region: String,
}

// =============================================================================
// AGENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Llm,
    Sequential,
    Parallel,
    Loop,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Llm => "llm",
            AgentKind::Sequential => "sequential",
            AgentKind::Parallel => "parallel",
            AgentKind::Loop => "loop",
        }
    }
}

/// One node of the emitted agent tree. Composites own their subagents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIR {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,
    pub region: String,
    /// Graph node this agent was built from; `None` for synthesized composites.
    pub source_node: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub instruction: Option<String>,
    pub tools: Vec<ToolDescriptor>,
    /// Sorted by (phase, priority, id).
    pub callbacks: Vec<CallbackDescriptor>,
    pub input_schema: Option<SchemaDescriptor>,
    pub output_schema: Option<SchemaDescriptor>,
    pub output_key: Option<String>,
    /// Loop agents only.
    pub max_iterations: Option<u32>,
    pub context_variables: BTreeMap<String, Value>,
    pub subagents: Vec<AgentIR>,
}

impl AgentIR {
    /// An agent with no configuration; the transformer fills in the rest.
    pub fn bare(id: impl Into<String>, name: impl Into<String>, kind: AgentKind, region: impl Into<String>) -> Self {
        AgentIR {
            id: id.into(),
            name: name.into(),
            kind,
            region: region.into(),
            source_node: None,
            description: None,
            model: None,
            instruction: None,
            tools: Vec::new(),
            callbacks: Vec::new(),
            input_schema: None,
            output_schema: None,
            output_key: None,
            max_iterations: None,
            context_variables: BTreeMap::new(),
            subagents: Vec::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, AgentKind::Llm)
    }

    /// `llm` leaves of this subtree, depth-first.
    pub fn leaves(&self) -> Vec<&AgentIR> {
        if self.is_composite() {
            self.subagents.iter().flat_map(|a| a.leaves()).collect()
        } else {
            vec![self]
        }
    }

    /// This agent and every descendant, pre-order.
    pub fn walk(&self) -> Vec<&AgentIR> {
        let mut out = vec![self];
        for sub in &self.subagents {
            out.extend(sub.walk());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub source: ToolSource,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDescriptor {
    pub id: String,
    pub phase: CallbackPhase,
    pub handler: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    /// Registry id, `None` for inline schemas.
    pub id: Option<String>,
    pub direction: SchemaDirection,
    pub schema: Value,
}
