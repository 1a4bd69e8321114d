//! Capability registry: the tools, prompts, callbacks and schemas a project may
//! reference by id.
//!
//! A registry is an ordered list of [`RegistryScope`]s. Lookups walk the scopes
//! in order and the first scope defining an id wins, so a project scope placed
//! in front of the global scopes shadows them. Scopes are filled once through
//! static registration and never change afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    #[default]
    Builtin,
    Function,
    Mcp,
    Openapi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: ToolSource,
    #[serde(default)]
    pub config: Value,
}

impl ToolDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        ToolDefinition {
            id: id.into(),
            name: None,
            description: None,
            source: ToolSource::Builtin,
            config: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDefinition {
    pub id: String,
    /// Name of the runtime hook implementing this callback.
    pub handler: String,
    /// Lower values run first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: Option<String>,
}

impl CallbackDefinition {
    pub fn new(id: impl Into<String>, handler: impl Into<String>, priority: i32) -> Self {
        CallbackDefinition {
            id: id.into(),
            handler: handler.into(),
            priority,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: String,
    pub schema: Value,
}

// =============================================================================
// SCOPES
// =============================================================================

/// One named layer of definitions (e.g. "project" or "global").
#[derive(Debug, Clone, Default)]
pub struct RegistryScope {
    name: String,
    tools: BTreeMap<String, ToolDefinition>,
    prompts: BTreeMap<String, PromptDefinition>,
    schemas: BTreeMap<String, SchemaDefinition>,
    /// Sorted by (priority, id) at registration time.
    callbacks: Vec<CallbackDefinition>,
}

impl RegistryScope {
    pub fn new(name: impl Into<String>) -> Self {
        RegistryScope {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Within a scope a later definition replaces an earlier one with the same id.
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        for tool in tools {
            self.tools.insert(tool.id.clone(), tool);
        }
        self
    }

    pub fn with_prompts(mut self, prompts: impl IntoIterator<Item = PromptDefinition>) -> Self {
        for prompt in prompts {
            self.prompts.insert(prompt.id.clone(), prompt);
        }
        self
    }

    pub fn with_schemas(mut self, schemas: impl IntoIterator<Item = SchemaDefinition>) -> Self {
        for schema in schemas {
            self.schemas.insert(schema.id.clone(), schema);
        }
        self
    }

    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = CallbackDefinition>) -> Self {
        for callback in callbacks {
            self.callbacks.retain(|c| c.id != callback.id);
            self.callbacks.push(callback);
        }
        self.callbacks
            .sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tool(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.get(id)
    }

    pub fn prompt(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.get(id)
    }

    pub fn schema(&self, id: &str) -> Option<&SchemaDefinition> {
        self.schemas.get(id)
    }

    pub fn callback(&self, id: &str) -> Option<&CallbackDefinition> {
        self.callbacks.iter().find(|c| c.id == id)
    }

    /// Callbacks in dispatch order.
    pub fn callbacks(&self) -> &[CallbackDefinition] {
        &self.callbacks
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Caller-supplied, read-only registry shared by every compile.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    scopes: Vec<RegistryScope>,
}

impl CapabilityRegistry {
    pub fn new(scopes: Vec<RegistryScope>) -> Self {
        CapabilityRegistry { scopes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// View with `project` in front of every registered scope.
    pub fn view_with<'a>(&'a self, project: &'a RegistryScope) -> RegistryView<'a> {
        let mut scopes = Vec::with_capacity(self.scopes.len() + 1);
        scopes.push(project);
        scopes.extend(self.scopes.iter());
        RegistryView { scopes }
    }
}

/// Ordered lookup across scopes; the first scope defining an id wins.
#[derive(Debug, Clone)]
pub struct RegistryView<'a> {
    scopes: Vec<&'a RegistryScope>,
}

impl<'a> RegistryView<'a> {
    pub fn tool(&self, id: &str) -> Option<&'a ToolDefinition> {
        self.scopes.iter().find_map(|&s| s.tool(id))
    }

    pub fn prompt(&self, id: &str) -> Option<&'a PromptDefinition> {
        self.scopes.iter().find_map(|&s| s.prompt(id))
    }

    pub fn schema(&self, id: &str) -> Option<&'a SchemaDefinition> {
        self.scopes.iter().find_map(|&s| s.schema(id))
    }

    pub fn callback(&self, id: &str) -> Option<&'a CallbackDefinition> {
        self.scopes.iter().find_map(|&s| s.callback(id))
    }

    pub fn scope_names(&self) -> Vec<&'a str> {
        self.scopes.iter().map(|&s| s.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            description: Some(description.into()),
            ..ToolDefinition::new(id)
        }
    }

    #[test]
    fn project_scope_shadows_global() {
        let registry = CapabilityRegistry::new(vec![
            RegistryScope::new("global").with_tools([tool("search", "global"), tool("fetch", "global")]),
        ]);
        let project = RegistryScope::new("project").with_tools([tool("search", "project")]);

        let view = registry.view_with(&project);
        assert_eq!(view.tool("search").unwrap().description.as_deref(), Some("project"));
        assert_eq!(view.tool("fetch").unwrap().description.as_deref(), Some("global"));
        assert!(view.tool("missing").is_none());
        assert_eq!(view.scope_names(), vec!["project", "global"]);
    }

    #[test]
    fn callbacks_sorted_once_by_priority_then_id() {
        let scope = RegistryScope::new("global").with_callbacks([
            CallbackDefinition::new("audit", "audit_hook", 10),
            CallbackDefinition::new("guard", "guard_hook", -5),
            CallbackDefinition::new("trace", "trace_hook", 10),
        ]);

        let order: Vec<&str> = scope.callbacks().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["guard", "audit", "trace"]);
    }

    #[test]
    fn re_registering_a_callback_replaces_it() {
        let scope = RegistryScope::new("global")
            .with_callbacks([CallbackDefinition::new("audit", "old", 1)])
            .with_callbacks([CallbackDefinition::new("audit", "new", 0)]);

        assert_eq!(scope.callbacks().len(), 1);
        assert_eq!(scope.callback("audit").unwrap().handler, "new");
    }
}
