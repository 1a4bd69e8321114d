#![allow(dead_code)]

use std::collections::BTreeMap;

use flowc::compile::{CompileContext, CompilerOptions, compile_snapshot};
use flowc::error::CompileError;
use flowc::ir::types::{AgentIR, AgentKind, WorkflowIR};
use flowc::load::{ProjectBundle, ProjectSnapshot};
use flowc::registry::CapabilityRegistry;
use serde_json::{Value, json};

// =============================================================================
// In-memory project builder
// =============================================================================

/// Builds a [`ProjectBundle`] tab by tab. Nodes and edges go to the most
/// recently added tab; edge ids are generated.
pub struct ProjectBuilder {
    name: String,
    tabs: Vec<(String, Vec<Value>, Vec<Value>)>,
    files: BTreeMap<String, String>,
    globals: BTreeMap<String, Value>,
    tools: Vec<Value>,
    edge_count: usize,
}

impl ProjectBuilder {
    pub fn new(name: &str) -> Self {
        ProjectBuilder {
            name: name.into(),
            tabs: Vec::new(),
            files: BTreeMap::new(),
            globals: BTreeMap::new(),
            tools: Vec::new(),
            edge_count: 0,
        }
    }

    pub fn tab(mut self, id: &str) -> Self {
        self.tabs.push((id.into(), Vec::new(), Vec::new()));
        self
    }

    fn current(&mut self) -> &mut (String, Vec<Value>, Vec<Value>) {
        if self.tabs.is_empty() {
            self.tabs.push(("main".into(), Vec::new(), Vec::new()));
        }
        let last = self.tabs.len() - 1;
        &mut self.tabs[last]
    }

    pub fn node_at(mut self, id: &str, node_type: &str, x: f64, y: f64, data: Value) -> Self {
        self.current().1.push(json!({
            "id": id,
            "type": node_type,
            "position": { "x": x, "y": y },
            "data": data,
        }));
        self
    }

    pub fn node(self, id: &str, node_type: &str, y: f64, data: Value) -> Self {
        self.node_at(id, node_type, 0.0, y, data)
    }

    pub fn start(self, id: &str, y: f64) -> Self {
        self.node(id, "start", y, json!({}))
    }

    pub fn end(self, id: &str, y: f64) -> Self {
        self.node(id, "end", y, json!({}))
    }

    pub fn agent(self, id: &str, y: f64) -> Self {
        self.agent_at(id, 0.0, y)
    }

    pub fn agent_at(self, id: &str, x: f64, y: f64) -> Self {
        self.node_at(id, "agent", x, y, json!({ "name": id }))
    }

    pub fn edge(self, source: &str, target: &str) -> Self {
        self.edge_ports(source, None, target, None)
    }

    pub fn edge_ports(
        mut self,
        source: &str,
        source_handle: Option<&str>,
        target: &str,
        target_handle: Option<&str>,
    ) -> Self {
        self.edge_count += 1;
        let id = format!("e{}", self.edge_count);
        self.current().2.push(json!({
            "id": id,
            "source": source,
            "target": target,
            "sourceHandle": source_handle,
            "targetHandle": target_handle,
        }));
        self
    }

    pub fn file(mut self, path: &str, text: &str) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }

    pub fn global(mut self, key: &str, value: Value) -> Self {
        self.globals.insert(key.into(), value);
        self
    }

    /// A project-level tool definition, as if read from a tool file.
    pub fn tool(mut self, id: &str) -> Self {
        self.tools.push(json!({ "id": id }));
        self
    }

    /// Same project with node and edge declarations reversed in every tab.
    pub fn reversed(mut self) -> Self {
        for (_, nodes, edges) in &mut self.tabs {
            nodes.reverse();
            edges.reverse();
        }
        self
    }

    pub fn bundle(&self) -> ProjectBundle {
        let tabs: Vec<Value> = self
            .tabs
            .iter()
            .map(|(id, _, _)| json!({ "id": id, "name": id }))
            .collect();
        let flows: serde_json::Map<String, Value> = self
            .tabs
            .iter()
            .map(|(id, nodes, edges)| (id.clone(), json!({ "nodes": nodes, "edges": edges })))
            .collect();

        serde_json::from_value(json!({
            "manifest": {
                "name": self.name,
                "version": "1.0.0",
                "tabs": tabs,
                "globalVariables": self.globals,
            },
            "flows": flows,
            "files": self.files,
            "tools": self.tools,
        }))
        .expect("bundle JSON should deserialize")
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot::from_bundle(self.bundle()).expect("bundle should convert into a snapshot")
    }
}

// =============================================================================
// Compile shortcuts
// =============================================================================

pub fn compile(project: &ProjectBuilder) -> Result<WorkflowIR, CompileError> {
    compile_with(project, &CapabilityRegistry::empty(), &CompilerOptions::default())
}

pub fn compile_with(
    project: &ProjectBuilder,
    registry: &CapabilityRegistry,
    options: &CompilerOptions,
) -> Result<WorkflowIR, CompileError> {
    compile_snapshot(&project.snapshot(), &CompileContext::new(registry, options))
}

pub fn compile_ok(project: &ProjectBuilder) -> WorkflowIR {
    match compile(project) {
        Ok(ir) => ir,
        Err(e) => panic!("expected a successful compile, got: {}", e),
    }
}

pub fn compile_err(project: &ProjectBuilder) -> CompileError {
    match compile(project) {
        Ok(ir) => panic!("expected a compile error, got roots: {:?}", ir.roots.keys()),
        Err(e) => e,
    }
}

// =============================================================================
// Tree rendering
// =============================================================================

/// Compact rendering of an agent tree: leaves by id, composites by kind.
pub fn shape(agent: &AgentIR) -> String {
    let inner = || {
        agent
            .subagents
            .iter()
            .map(shape)
            .collect::<Vec<_>>()
            .join(", ")
    };
    match agent.kind {
        AgentKind::Llm => agent.id.clone(),
        AgentKind::Sequential => format!("sequential[{}]", inner()),
        AgentKind::Parallel => format!("parallel[{}]", inner()),
        AgentKind::Loop => format!("loop{{{}}}", inner()),
    }
}

/// Shape of the root tree of `region`.
pub fn root_shape(ir: &WorkflowIR, region: &str) -> String {
    ir.roots
        .get(region)
        .map(shape)
        .unwrap_or_else(|| panic!("no root for region '{}'", region))
}
