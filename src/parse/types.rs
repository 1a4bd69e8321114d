//! Raw flow-document records and the typed values the parser produces from them.
//!
//! Raw records mirror what the visual editor saves per region (tab): loosely
//! typed `type` strings and free-form `data` objects. The parser turns each
//! record into a [`ParsedNode`] whose payload is a closed tagged variant, so
//! every later phase matches exhaustively on [`NodePayload`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// RAW RECORDS
// =============================================================================

/// One region's flow document: `{ nodes: [...], edges: [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

// =============================================================================
// NODE KINDS
// =============================================================================

/// The closed node-kind vocabulary of the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    End,
    Agent,
    Loop,
    ParallelJoin,
    TeleporterOut,
    TeleporterIn,
    Variable,
    UserInput,
    Custom,
}

impl NodeKind {
    pub fn from_type(node_type: &str) -> Option<NodeKind> {
        let kind = match node_type {
            "start" => NodeKind::Start,
            "end" => NodeKind::End,
            "agent" => NodeKind::Agent,
            "loop" => NodeKind::Loop,
            "parallel-join" => NodeKind::ParallelJoin,
            "teleporter-out" => NodeKind::TeleporterOut,
            "teleporter-in" => NodeKind::TeleporterIn,
            "variable" => NodeKind::Variable,
            "user-input" => NodeKind::UserInput,
            "custom" => NodeKind::Custom,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Agent => "agent",
            NodeKind::Loop => "loop",
            NodeKind::ParallelJoin => "parallel-join",
            NodeKind::TeleporterOut => "teleporter-out",
            NodeKind::TeleporterIn => "teleporter-in",
            NodeKind::Variable => "variable",
            NodeKind::UserInput => "user-input",
            NodeKind::Custom => "custom",
        }
    }

    /// Kinds that only ever feed configuration into other nodes.
    pub fn is_data_source(&self) -> bool {
        matches!(self, NodeKind::Variable | NodeKind::Custom)
    }

    /// Kinds that route control flow but emit no agent of their own.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::End
                | NodeKind::ParallelJoin
                | NodeKind::TeleporterOut
                | NodeKind::TeleporterIn
                | NodeKind::UserInput
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CONFIGURATION PORTS
// =============================================================================

/// Reserved target ports through which configuration flows into an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigPort {
    Instruction,
    Tools,
    Callbacks,
    InputSchema,
    OutputSchema,
    Context,
}

impl ConfigPort {
    pub fn from_handle(handle: &str) -> Option<ConfigPort> {
        let port = match handle {
            "instruction" => ConfigPort::Instruction,
            "tools" | "tool" => ConfigPort::Tools,
            "callbacks" | "callback" => ConfigPort::Callbacks,
            "input-schema" => ConfigPort::InputSchema,
            "output-schema" | "schema" => ConfigPort::OutputSchema,
            "context" => ConfigPort::Context,
            _ => return None,
        };
        Some(port)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigPort::Instruction => "instruction",
            ConfigPort::Tools => "tools",
            ConfigPort::Callbacks => "callbacks",
            ConfigPort::InputSchema => "input-schema",
            ConfigPort::OutputSchema => "output-schema",
            ConfigPort::Context => "context",
        }
    }
}

/// Source port of a loop marker that enters its body.
pub const LOOP_BODY_PORT: &str = "body";

/// Source-port prefix marking a conditional route.
pub const ROUTE_PORT_PREFIX: &str = "route:";

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub instruction: Option<String>,
    pub instruction_file: Option<String>,
    pub prompt_ref: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub callbacks: Vec<CallbackBinding>,
    pub output_key: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackBinding {
    pub id: String,
    pub phase: CallbackPhase,
}

/// Lifecycle phase a callback is attached to (before/after × agent/model/tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackPhase {
    BeforeAgent,
    AfterAgent,
    BeforeModel,
    AfterModel,
    BeforeTool,
    AfterTool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopData {
    pub name: Option<String>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeleporterData {
    pub channel: String,
}

/// Either a single `name`/`value` pair or an aggregator holding `values`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableData {
    pub name: Option<String>,
    pub value: Option<Value>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl VariableData {
    /// All `(name, value)` pairs this node supplies, single form first.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries = Vec::new();
        if let Some(name) = &self.name {
            entries.push((name.clone(), self.value.clone().unwrap_or(Value::Null)));
        }
        entries.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        entries
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInputData {
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaDirection {
    Input,
    Output,
}

/// Configuration node payload, tagged by the resource it provides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CustomData {
    Instruction {
        text: Option<String>,
        file: Option<String>,
        prompt_ref: Option<String>,
    },
    Tool {
        tool_id: String,
    },
    Callback {
        callback_id: String,
        phase: CallbackPhase,
    },
    Schema {
        schema_id: Option<String>,
        schema: Option<Value>,
        direction: Option<SchemaDirection>,
    },
}

impl CustomData {
    pub fn resource(&self) -> &'static str {
        match self {
            CustomData::Instruction { .. } => "instruction",
            CustomData::Tool { .. } => "tool",
            CustomData::Callback { .. } => "callback",
            CustomData::Schema { .. } => "schema",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodePayload {
    Start,
    End,
    Agent(AgentData),
    Loop(LoopData),
    ParallelJoin,
    TeleporterOut(TeleporterData),
    TeleporterIn(TeleporterData),
    Variable(VariableData),
    UserInput(UserInputData),
    Custom(CustomData),
}

impl NodePayload {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Start => NodeKind::Start,
            NodePayload::End => NodeKind::End,
            NodePayload::Agent(_) => NodeKind::Agent,
            NodePayload::Loop(_) => NodeKind::Loop,
            NodePayload::ParallelJoin => NodeKind::ParallelJoin,
            NodePayload::TeleporterOut(_) => NodeKind::TeleporterOut,
            NodePayload::TeleporterIn(_) => NodeKind::TeleporterIn,
            NodePayload::Variable(_) => NodeKind::Variable,
            NodePayload::UserInput(_) => NodeKind::UserInput,
            NodePayload::Custom(_) => NodeKind::Custom,
        }
    }
}

// =============================================================================
// PARSED VALUES
// =============================================================================

#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub id: String,
    pub region: String,
    pub position: Position,
    pub payload: NodePayload,
}

impl ParsedNode {
    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    /// Display name: the agent or loop name when set, the id otherwise.
    pub fn label(&self) -> &str {
        let name = match &self.payload {
            NodePayload::Agent(a) => a.name.as_deref(),
            NodePayload::Loop(l) => l.name.as_deref(),
            _ => None,
        };
        name.filter(|n| !n.trim().is_empty()).unwrap_or(&self.id)
    }

    pub fn channel(&self) -> Option<&str> {
        match &self.payload {
            NodePayload::TeleporterOut(t) | NodePayload::TeleporterIn(t) => Some(&t.channel),
            _ => None,
        }
    }

    /// Layout order used for every deterministic tie-break: top-to-bottom,
    /// then left-to-right, then id.
    pub fn layout_cmp(&self, other: &ParsedNode) -> std::cmp::Ordering {
        self.position
            .y
            .total_cmp(&other.position.y)
            .then(self.position.x.total_cmp(&other.position.x))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedEdge {
    pub id: String,
    pub region: String,
    pub source: String,
    pub source_port: Option<String>,
    pub target: String,
    pub target_port: Option<String>,
}

/// Every region's nodes and edges, parsed and checked for id uniqueness.
#[derive(Debug, Clone, Default)]
pub struct ParsedProject {
    /// Region ids in manifest order.
    pub regions: Vec<String>,
    pub nodes: Vec<ParsedNode>,
    pub edges: Vec<ParsedEdge>,
}
