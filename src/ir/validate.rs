//! IR invariant validation.
//!
//! Checks that a `WorkflowIR` is a pure tree whose flat `all_agents` map agrees
//! with the roots. A violation here means the transformer is wrong, not the
//! user's graph.

use std::collections::HashSet;

use crate::ir::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrViolation {
    pub code: &'static str,
    pub message: String,
    /// The agent where the violation was found, if applicable.
    pub agent_id: Option<String>,
}

impl std::fmt::Display for IrViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.agent_id {
            Some(id) => write!(f, "[{}] {} (at agent '{}')", self.code, self.message, id),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Validate a WorkflowIR against all invariants. Returns all violations found.
pub fn validate_ir(ir: &WorkflowIR) -> Vec<IrViolation> {
    let mut violations = Vec::new();

    validate_unique_ids(ir, &mut violations);
    validate_all_agents_consistent(ir, &mut violations);
    validate_composites(ir, &mut violations);

    violations
}

fn forest(ir: &WorkflowIR) -> Vec<&AgentIR> {
    ir.roots.values().flat_map(|root| root.walk()).collect()
}

/// I001: an agent appears at most once in the forest (pure tree, unique ids).
fn validate_unique_ids(ir: &WorkflowIR, violations: &mut Vec<IrViolation>) {
    let mut seen = HashSet::new();
    for agent in forest(ir) {
        if !seen.insert(agent.id.as_str()) {
            violations.push(IrViolation {
                code: "I001",
                message: format!("Agent id '{}' appears more than once in the agent tree", agent.id),
                agent_id: Some(agent.id.clone()),
            });
        }
    }
}

/// I002: `all_agents` holds exactly the agents of the forest.
fn validate_all_agents_consistent(ir: &WorkflowIR, violations: &mut Vec<IrViolation>) {
    let in_tree: HashSet<&str> = forest(ir).iter().map(|a| a.id.as_str()).collect();

    for id in ir.all_agents.keys() {
        if !in_tree.contains(id.as_str()) {
            violations.push(IrViolation {
                code: "I002",
                message: format!("all_agents lists '{}' which is not in any root tree", id),
                agent_id: Some(id.clone()),
            });
        }
    }
    for id in &in_tree {
        if !ir.all_agents.contains_key(*id) {
            violations.push(IrViolation {
                code: "I002",
                message: format!("Agent '{}' is missing from all_agents", id),
                agent_id: Some(id.to_string()),
            });
        }
    }
}

/// I003: composites have subagents. I004: llm agents have none.
fn validate_composites(ir: &WorkflowIR, violations: &mut Vec<IrViolation>) {
    for agent in forest(ir) {
        if agent.is_composite() && agent.subagents.is_empty() {
            violations.push(IrViolation {
                code: "I003",
                message: format!("{} agent '{}' has no subagents", agent.kind.as_str(), agent.id),
                agent_id: Some(agent.id.clone()),
            });
        }
        if !agent.is_composite() && !agent.subagents.is_empty() {
            violations.push(IrViolation {
                code: "I004",
                message: format!("llm agent '{}' must not have subagents", agent.id),
                agent_id: Some(agent.id.clone()),
            });
        }
    }
}
