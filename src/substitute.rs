//! Build-time `{identifier}` substitution.
//!
//! Substitution never mutates: every implementation returns a new value.
//! Identifiers (agent ids, tool ids, regions, handler names) are never
//! touched; only configuration text and values are.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ir::types::{AgentIR, SchemaDescriptor, ToolDescriptor, WorkflowIR};

pub type Variables = BTreeMap<String, String>;

pub trait Substitute: Sized {
    fn substituted(&self, vars: &Variables) -> Self;
}

/// Replace every `{name}` whose name is a key of `vars`. Unknown names,
/// `{{` escapes and malformed placeholders are copied unchanged.
pub fn substitute_str(input: &str, vars: &Variables) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push_str("{{");
            rest = &tail[2..];
            continue;
        }

        match placeholder(tail) {
            Some((name, len)) => {
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..len]),
                }
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// `{ident}` at the start of `s`: the identifier and the placeholder length.
fn placeholder(s: &str) -> Option<(&str, usize)> {
    let body = s.strip_prefix('{')?;
    let end = body.find('}')?;
    let name = &body[..end];

    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')) {
        return None;
    }
    Some((name, end + 2))
}

impl Substitute for String {
    fn substituted(&self, vars: &Variables) -> Self {
        substitute_str(self, vars)
    }
}

impl Substitute for Value {
    fn substituted(&self, vars: &Variables) -> Self {
        match self {
            Value::String(s) => Value::String(substitute_str(s, vars)),
            Value::Array(items) => Value::Array(items.iter().map(|v| v.substituted(vars)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.substituted(vars)))
                    .collect(),
            ),
            Value::Null | Value::Bool(_) | Value::Number(_) => self.clone(),
        }
    }
}

impl<T: Substitute> Substitute for Option<T> {
    fn substituted(&self, vars: &Variables) -> Self {
        self.as_ref().map(|v| v.substituted(vars))
    }
}

impl<T: Substitute> Substitute for Vec<T> {
    fn substituted(&self, vars: &Variables) -> Self {
        self.iter().map(|v| v.substituted(vars)).collect()
    }
}

/// Keys are names, so only values are substituted.
impl<T: Substitute> Substitute for BTreeMap<String, T> {
    fn substituted(&self, vars: &Variables) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone(), v.substituted(vars)))
            .collect()
    }
}

impl Substitute for ToolDescriptor {
    fn substituted(&self, vars: &Variables) -> Self {
        ToolDescriptor {
            description: self.description.substituted(vars),
            config: self.config.substituted(vars),
            ..self.clone()
        }
    }
}

impl Substitute for SchemaDescriptor {
    fn substituted(&self, vars: &Variables) -> Self {
        SchemaDescriptor {
            schema: self.schema.substituted(vars),
            ..self.clone()
        }
    }
}

impl Substitute for AgentIR {
    fn substituted(&self, vars: &Variables) -> Self {
        AgentIR {
            id: self.id.clone(),
            name: self.name.substituted(vars),
            kind: self.kind,
            region: self.region.clone(),
            source_node: self.source_node.clone(),
            description: self.description.substituted(vars),
            model: self.model.substituted(vars),
            instruction: self.instruction.substituted(vars),
            tools: self.tools.substituted(vars),
            callbacks: self.callbacks.clone(),
            input_schema: self.input_schema.substituted(vars),
            output_schema: self.output_schema.substituted(vars),
            output_key: self.output_key.clone(),
            max_iterations: self.max_iterations,
            context_variables: self.context_variables.substituted(vars),
            subagents: self.subagents.substituted(vars),
        }
    }
}

impl Substitute for WorkflowIR {
    fn substituted(&self, vars: &Variables) -> Self {
        WorkflowIR {
            roots: self.roots.substituted(vars),
            all_agents: self.all_agents.substituted(vars),
            session_seed: self.session_seed.substituted(vars),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_known_keys() {
        let v = vars(&[("company", "Acme"), ("env.region", "eu-west-1")]);
        assert_eq!(
            substitute_str("Work for {company} in {env.region}.", &v),
            "Work for Acme in eu-west-1."
        );
    }

    #[test]
    fn unknown_and_malformed_placeholders_are_preserved() {
        let v = vars(&[("known", "x")]);
        let input = "{unknown} {1bad} { spaced } {open {known} {} trailing {";
        assert_eq!(
            substitute_str(input, &v),
            "{unknown} {1bad} { spaced } {open x {} trailing {"
        );
    }

    #[test]
    fn double_brace_is_an_escape() {
        let v = vars(&[("name", "x")]);
        assert_eq!(substitute_str("{{name}} and {name}", &v), "{{name}} and x");
    }

    #[test]
    fn json_values_substitute_strings_only() {
        let v = vars(&[("limit", "10"), ("key", "k")]);
        let value = serde_json::json!({"{key}": "max {limit}", "n": 3, "list": ["{limit}", true]});
        assert_eq!(
            value.substituted(&v),
            serde_json::json!({"{key}": "max 10", "n": 3, "list": ["10", true]})
        );
    }

    #[test]
    fn substitution_is_idempotent() {
        let v = vars(&[("a", "alpha"), ("b", "beta")]);
        let once = substitute_str("{a}-{b}-{c}-{{a}}", &v);
        assert_eq!(substitute_str(&once, &v), once);
    }
}
