//! Loader: reads a project directory (or an in-memory bundle) into an
//! immutable [`ProjectSnapshot`].
//!
//! Layout on disk:
//!
//! ```text
//! project/
//!   manifest.json        { name, version, tabs: [{ id, name, file }], globalVariables, toolFiles }
//!   main.json            { nodes: [...], edges: [...] }   one per tab
//!   prompts/review.md    referenced by instructionFile / custom instruction `file`
//!   tools.json           [ToolDefinition, ...]            listed in toolFiles
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CompilationError, Location};
use crate::parse::types::FlowDocument;
use crate::registry::{RegistryScope, ToolDefinition};

pub const DEFAULT_MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tabs: Vec<TabEntry>,
    #[serde(default)]
    pub global_variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub tool_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Flow document path relative to the project root; `{id}.json` when absent.
    #[serde(default)]
    pub file: Option<String>,
}

impl TabEntry {
    pub fn file_name(&self) -> String {
        self.file.clone().unwrap_or_else(|| format!("{}.json", self.id))
    }
}

/// One tab of the editor and its flow document.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub flow: FlowDocument,
}

/// In-memory project: what the browser editor holds before saving.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBundle {
    pub manifest: Manifest,
    /// Flow documents keyed by tab id.
    #[serde(default)]
    pub flows: BTreeMap<String, FlowDocument>,
    /// Referenced external files keyed by their project-relative path.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Everything one compile reads, captured once and never mutated.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project_path: Option<String>,
    pub manifest: Manifest,
    /// Regions in manifest order.
    pub regions: Vec<Region>,
    pub files: BTreeMap<String, String>,
    /// Tool definitions from the project's tool files.
    pub tools: Vec<ToolDefinition>,
}

impl ProjectSnapshot {
    pub fn from_bundle(bundle: ProjectBundle) -> Result<Self, CompilationError> {
        let ProjectBundle {
            manifest,
            mut flows,
            files,
            tools,
        } = bundle;

        check_tab_ids(&manifest)?;

        let mut regions = Vec::with_capacity(manifest.tabs.len());
        for tab in &manifest.tabs {
            let flow = flows.remove(&tab.id).ok_or_else(|| {
                CompilationError::load(
                    "L001",
                    format!("No flow document supplied for tab '{}'", tab.id),
                    Location::region(&tab.id),
                )
            })?;
            regions.push(region(tab, flow));
        }

        Ok(ProjectSnapshot {
            project_path: None,
            manifest,
            regions,
            files,
            tools,
        })
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// The registry scope contributed by the project itself.
    pub fn project_scope(&self) -> RegistryScope {
        RegistryScope::new("project").with_tools(self.tools.iter().cloned())
    }
}

/// Read a project directory from disk.
pub fn load_project(root: &Path, manifest_file: &str) -> Result<ProjectSnapshot, CompilationError> {
    let manifest: Manifest = read_json(&root.join(manifest_file), manifest_file)?;
    check_tab_ids(&manifest)?;

    let mut regions = Vec::with_capacity(manifest.tabs.len());
    for tab in &manifest.tabs {
        let file = tab.file_name();
        let flow: FlowDocument = read_json(&project_file(root, &file)?, &file)?;
        debug!(tab = %tab.id, nodes = flow.nodes.len(), edges = flow.edges.len(), "region loaded");
        regions.push(region(tab, flow));
    }

    let mut files = BTreeMap::new();
    for region in &regions {
        for path in referenced_files(&region.flow) {
            if files.contains_key(&path) {
                continue;
            }
            let text = read_text(&project_file(root, &path)?, &path)?;
            files.insert(path, text);
        }
    }

    let mut tools = Vec::new();
    for file in &manifest.tool_files {
        let defs: Vec<ToolDefinition> = read_json(&project_file(root, file)?, file)?;
        tools.extend(defs);
    }

    info!(
        project = %manifest.name,
        regions = regions.len(),
        files = files.len(),
        tools = tools.len(),
        "project loaded"
    );

    Ok(ProjectSnapshot {
        project_path: Some(root.display().to_string()),
        manifest,
        regions,
        files,
        tools,
    })
}

fn region(tab: &TabEntry, flow: FlowDocument) -> Region {
    Region {
        id: tab.id.clone(),
        name: tab.name.clone().unwrap_or_else(|| tab.id.clone()),
        flow,
    }
}

fn check_tab_ids(manifest: &Manifest) -> Result<(), CompilationError> {
    let mut seen = HashSet::new();
    for tab in &manifest.tabs {
        if !seen.insert(tab.id.as_str()) {
            return Err(CompilationError::load(
                "L003",
                format!("Duplicate tab id '{}' in manifest", tab.id),
                Location::region(&tab.id),
            ));
        }
    }
    Ok(())
}

/// Paths of external files referenced by a flow's nodes, in declaration order.
/// Only the raw records are inspected; shape errors surface in the parser.
fn referenced_files(flow: &FlowDocument) -> Vec<String> {
    let mut paths = Vec::new();
    for node in &flow.nodes {
        let path = match node.node_type.as_str() {
            "agent" => node.data.get("instructionFile"),
            "custom" if node.data.get("resource").and_then(Value::as_str) == Some("instruction") => {
                node.data.get("file")
            }
            _ => None,
        };
        if let Some(path) = path.and_then(Value::as_str).filter(|p| !p.trim().is_empty()) {
            paths.push(path.to_string());
        }
    }
    paths
}

/// Resolve a document-supplied path under `root`. Absolute paths, `..`
/// segments and symlinks leading out of the project are rejected.
fn project_file(root: &Path, relative: &str) -> Result<PathBuf, CompilationError> {
    let escapes = || {
        CompilationError::load(
            "L001",
            format!("Path '{}' escapes the project root", relative),
            Location::file(relative, None),
        )
    };

    let path = Path::new(relative);
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(escapes());
    }

    let target = root.join(path);
    if let (Ok(resolved), Ok(canonical_root)) = (target.canonicalize(), root.canonicalize()) {
        if !resolved.starts_with(&canonical_root) {
            return Err(escapes());
        }
    }
    Ok(target)
}

fn read_text(path: &Path, display: &str) -> Result<String, CompilationError> {
    fs::read_to_string(path).map_err(|e| {
        CompilationError::load(
            "L001",
            format!("Cannot read '{}': {}", display, e),
            Location::file(display, None),
        )
    })
}

fn read_json<T: DeserializeOwned>(path: &Path, display: &str) -> Result<T, CompilationError> {
    let text = read_text(path, display)?;
    serde_json::from_str(&text).map_err(|e| {
        CompilationError::load(
            "L002",
            format!("Malformed JSON in '{}': {}", display, e),
            Location::file(display, Some(e.line())),
        )
    })
}
