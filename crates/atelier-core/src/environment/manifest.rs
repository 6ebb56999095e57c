//! Environment manifest (`pyproject.toml`).
//!
//! The manifest stays consumable by standard Python packaging tooling:
//! dependency groups live in `[dependency-groups]` (one group per custom
//! node so nodes never fight over pins) and everything Atelier owns sits
//! under `[tool.atelier]`. Pure dependency-version fields are opaque to
//! this module; the external resolver owns them.

use crate::metadata::atomic_write_bytes;
use crate::{AtelierError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use toml::{Table, Value};

/// Origin of a custom node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeOrigin {
    /// Published in the node registry under this id.
    Registry { id: String },
    /// Cloned from a remote repository at a pinned revision.
    Git { url: String, rev: String },
    /// Local development source at a path relative to the environment root.
    Development { path: String },
}

/// A declared custom node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub name: String,
    pub origin: NodeOrigin,
}

/// A declared model reference: content hash plus a human label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub name: String,
    pub hash: String,
}

/// Parsed view over an environment manifest.
///
/// The raw text is kept alongside the parsed document: snapshots and
/// bundles carry manifest bytes verbatim, while mutations go through the
/// document and re-serialize.
#[derive(Debug, Clone)]
pub struct Manifest {
    raw: String,
    doc: Table,
}

impl Manifest {
    /// Template manifest for a freshly created environment.
    pub fn new(env_name: &str) -> Self {
        let raw = format!(
            "[project]\nname = \"{}\"\nversion = \"0.1.0\"\nrequires-python = \">=3.10\"\n\n[dependency-groups]\n\n[tool.atelier]\nworkflows = []\n",
            env_name
        );
        // The template is well-formed by construction.
        let doc: Table = toml::from_str(&raw).expect("manifest template parses");
        Self { raw, doc }
    }

    /// Parse manifest text.
    pub fn parse(raw: String) -> Result<Self> {
        let doc: Table = toml::from_str(&raw)?;
        Ok(Self { raw, doc })
    }

    /// Load a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AtelierError::io_with_path(e, path))?;
        Self::parse(raw).map_err(|e| match e {
            AtelierError::Manifest { message, .. } => AtelierError::Manifest {
                message,
                path: Some(path.to_path_buf()),
            },
            other => other,
        })
    }

    /// Write the manifest atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_bytes(path, self.raw.as_bytes())
    }

    /// The manifest text, exactly as it will be persisted.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `[project] name` field.
    pub fn project_name(&self) -> Option<&str> {
        self.doc
            .get("project")
            .and_then(|v| v.as_table())
            .and_then(|t| t.get("name"))
            .and_then(|v| v.as_str())
    }

    // ========================================
    // Nodes
    // ========================================

    /// All declared custom nodes. Malformed entries are skipped.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.atelier_array("nodes")
            .into_iter()
            .filter_map(node_from_value)
            .collect()
    }

    /// Declare a custom node and give it an empty dependency group.
    pub fn add_node(&mut self, node: &NodeRef) -> Result<()> {
        if self.nodes().iter().any(|n| n.name == node.name) {
            return Err(AtelierError::Validation {
                field: "nodes".to_string(),
                message: format!("node {} is already declared", node.name),
            });
        }
        self.atelier_array_mut("nodes").push(node_to_value(node));
        self.ensure_dependency_group(&node.name);
        self.rewrite()
    }

    /// Replace a declared node's origin (update-node).
    pub fn update_node(&mut self, name: &str, origin: NodeOrigin) -> Result<()> {
        let array = self.atelier_array_mut("nodes");
        let mut found = false;
        for value in array.iter_mut() {
            if value.get("name").and_then(|v| v.as_str()) == Some(name) {
                *value = node_to_value(&NodeRef {
                    name: name.to_string(),
                    origin: origin.clone(),
                });
                found = true;
                break;
            }
        }
        if !found {
            return Err(AtelierError::Validation {
                field: "nodes".to_string(),
                message: format!("node {} is not declared", name),
            });
        }
        self.rewrite()
    }

    /// Remove a declared node and its dependency group.
    pub fn remove_node(&mut self, name: &str) -> Result<bool> {
        let array = self.atelier_array_mut("nodes");
        let before = array.len();
        array.retain(|v| v.get("name").and_then(|x| x.as_str()) != Some(name));
        let removed = array.len() < before;
        if removed {
            if let Some(groups) = self
                .doc
                .get_mut("dependency-groups")
                .and_then(|v| v.as_table_mut())
            {
                groups.remove(name);
            }
            self.rewrite()?;
        }
        Ok(removed)
    }

    // ========================================
    // Models
    // ========================================

    /// All declared model references.
    pub fn models(&self) -> Vec<ModelRef> {
        self.atelier_array("models")
            .into_iter()
            .filter_map(|v| {
                Some(ModelRef {
                    name: v.get("name")?.as_str()?.to_string(),
                    hash: v.get("hash")?.as_str()?.to_string(),
                })
            })
            .collect()
    }

    /// Declare a model reference by hash.
    pub fn add_model(&mut self, model: &ModelRef) -> Result<()> {
        if self.models().iter().any(|m| m.hash == model.hash) {
            return Err(AtelierError::Validation {
                field: "models".to_string(),
                message: format!("model {} is already declared", model.hash),
            });
        }
        let mut table = Table::new();
        table.insert("name".to_string(), Value::String(model.name.clone()));
        table.insert("hash".to_string(), Value::String(model.hash.clone()));
        self.atelier_array_mut("models").push(Value::Table(table));
        self.rewrite()
    }

    /// Drop a model reference by hash.
    pub fn remove_model(&mut self, hash: &str) -> Result<bool> {
        let array = self.atelier_array_mut("models");
        let before = array.len();
        array.retain(|v| v.get("hash").and_then(|x| x.as_str()) != Some(hash));
        let removed = array.len() < before;
        if removed {
            self.rewrite()?;
        }
        Ok(removed)
    }

    // ========================================
    // Workflows
    // ========================================

    /// Tracked workflow file paths, relative to the environment root.
    pub fn workflows(&self) -> Vec<String> {
        self.atelier_table()
            .and_then(|t| t.get("workflows"))
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Track a workflow file.
    pub fn track_workflow(&mut self, relative_path: &str) -> Result<()> {
        if self.workflows().iter().any(|w| w == relative_path) {
            return Ok(());
        }
        let atelier = self.atelier_table_mut();
        let array = atelier
            .entry("workflows".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(array) = array.as_array_mut() {
            array.push(Value::String(relative_path.to_string()));
        }
        self.rewrite()
    }

    /// Stop tracking a workflow file.
    pub fn untrack_workflow(&mut self, relative_path: &str) -> Result<bool> {
        let atelier = self.atelier_table_mut();
        let Some(array) = atelier.get_mut("workflows").and_then(|v| v.as_array_mut()) else {
            return Ok(false);
        };
        let before = array.len();
        array.retain(|v| v.as_str() != Some(relative_path));
        let removed = array.len() < before;
        if removed {
            self.rewrite()?;
        }
        Ok(removed)
    }

    // ========================================
    // Internals
    // ========================================

    fn ensure_dependency_group(&mut self, node_name: &str) {
        let groups = self
            .doc
            .entry("dependency-groups".to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Some(groups) = groups.as_table_mut() {
            groups
                .entry(node_name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
        }
    }

    fn atelier_table(&self) -> Option<&Table> {
        self.doc
            .get("tool")
            .and_then(|v| v.as_table())
            .and_then(|t| t.get("atelier"))
            .and_then(|v| v.as_table())
    }

    fn atelier_table_mut(&mut self) -> &mut Table {
        let tool = self
            .doc
            .entry("tool".to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        let tool = tool.as_table_mut().expect("[tool] is a table");
        let atelier = tool
            .entry("atelier".to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        atelier.as_table_mut().expect("[tool.atelier] is a table")
    }

    fn atelier_array(&self, key: &str) -> Vec<Value> {
        self.atelier_table()
            .and_then(|t| t.get(key))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }

    fn atelier_array_mut(&mut self, key: &str) -> &mut Vec<Value> {
        let atelier = self.atelier_table_mut();
        let entry = atelier
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        entry.as_array_mut().expect("atelier arrays are arrays")
    }

    fn rewrite(&mut self) -> Result<()> {
        self.raw = toml::to_string_pretty(&self.doc)?;
        Ok(())
    }
}

fn node_from_value(value: Value) -> Option<NodeRef> {
    let name = value.get("name")?.as_str()?.to_string();
    let origin = if let Some(id) = value.get("registry").and_then(|v| v.as_str()) {
        NodeOrigin::Registry { id: id.to_string() }
    } else if let Some(url) = value.get("git").and_then(|v| v.as_str()) {
        NodeOrigin::Git {
            url: url.to_string(),
            rev: value
                .get("rev")
                .and_then(|v| v.as_str())
                .unwrap_or("HEAD")
                .to_string(),
        }
    } else if let Some(path) = value.get("path").and_then(|v| v.as_str()) {
        NodeOrigin::Development {
            path: path.to_string(),
        }
    } else {
        return None;
    };
    Some(NodeRef { name, origin })
}

fn node_to_value(node: &NodeRef) -> Value {
    let mut table = Table::new();
    table.insert("name".to_string(), Value::String(node.name.clone()));
    match &node.origin {
        NodeOrigin::Registry { id } => {
            table.insert("registry".to_string(), Value::String(id.clone()));
        }
        NodeOrigin::Git { url, rev } => {
            table.insert("git".to_string(), Value::String(url.clone()));
            table.insert("rev".to_string(), Value::String(rev.clone()));
        }
        NodeOrigin::Development { path } => {
            table.insert("development".to_string(), Value::Boolean(true));
            table.insert("path".to_string(), Value::String(path.clone()));
        }
    }
    Value::Table(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_and_names_project() {
        let manifest = Manifest::new("dev");
        assert_eq!(manifest.project_name(), Some("dev"));
        assert!(manifest.nodes().is_empty());
        assert!(manifest.models().is_empty());
        assert!(manifest.workflows().is_empty());
    }

    #[test]
    fn test_add_node_creates_dependency_group() {
        let mut manifest = Manifest::new("dev");
        manifest
            .add_node(&NodeRef {
                name: "comfyui-manager".to_string(),
                origin: NodeOrigin::Registry {
                    id: "comfyui-manager".to_string(),
                },
            })
            .unwrap();

        let reparsed = Manifest::parse(manifest.raw().to_string()).unwrap();
        assert_eq!(reparsed.nodes().len(), 1);
        assert!(reparsed.raw().contains("[dependency-groups]"));
        assert!(reparsed.raw().contains("comfyui-manager"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut manifest = Manifest::new("dev");
        let node = NodeRef {
            name: "n".to_string(),
            origin: NodeOrigin::Registry { id: "n".to_string() },
        };
        manifest.add_node(&node).unwrap();
        assert!(matches!(
            manifest.add_node(&node),
            Err(AtelierError::Validation { .. })
        ));
    }

    #[test]
    fn test_node_origins_round_trip() {
        let mut manifest = Manifest::new("dev");
        let nodes = vec![
            NodeRef {
                name: "registry-node".to_string(),
                origin: NodeOrigin::Registry { id: "rn".to_string() },
            },
            NodeRef {
                name: "git-node".to_string(),
                origin: NodeOrigin::Git {
                    url: "https://github.com/x/git-node".to_string(),
                    rev: "abc1234".to_string(),
                },
            },
            NodeRef {
                name: "dev-node".to_string(),
                origin: NodeOrigin::Development {
                    path: "nodes/dev-node".to_string(),
                },
            },
        ];
        for node in &nodes {
            manifest.add_node(node).unwrap();
        }

        let reparsed = Manifest::parse(manifest.raw().to_string()).unwrap();
        assert_eq!(reparsed.nodes(), nodes);
    }

    #[test]
    fn test_update_node_replaces_origin() {
        let mut manifest = Manifest::new("dev");
        manifest
            .add_node(&NodeRef {
                name: "n".to_string(),
                origin: NodeOrigin::Git {
                    url: "https://github.com/x/n".to_string(),
                    rev: "v1".to_string(),
                },
            })
            .unwrap();
        manifest
            .update_node(
                "n",
                NodeOrigin::Git {
                    url: "https://github.com/x/n".to_string(),
                    rev: "v2".to_string(),
                },
            )
            .unwrap();

        match &manifest.nodes()[0].origin {
            NodeOrigin::Git { rev, .. } => assert_eq!(rev, "v2"),
            other => panic!("unexpected origin: {:?}", other),
        }
    }

    #[test]
    fn test_remove_node_drops_group() {
        let mut manifest = Manifest::new("dev");
        manifest
            .add_node(&NodeRef {
                name: "n".to_string(),
                origin: NodeOrigin::Registry { id: "n".to_string() },
            })
            .unwrap();
        assert!(manifest.remove_node("n").unwrap());
        assert!(!manifest.remove_node("n").unwrap());
        assert!(manifest.nodes().is_empty());

        let reparsed = Manifest::parse(manifest.raw().to_string()).unwrap();
        assert!(reparsed.nodes().is_empty());
    }

    #[test]
    fn test_models_and_workflows() {
        let mut manifest = Manifest::new("dev");
        manifest
            .add_model(&ModelRef {
                name: "sd15".to_string(),
                hash: "aabbcc".to_string(),
            })
            .unwrap();
        manifest.track_workflow("workflows/portrait.json").unwrap();
        // Tracking twice is a no-op.
        manifest.track_workflow("workflows/portrait.json").unwrap();

        let reparsed = Manifest::parse(manifest.raw().to_string()).unwrap();
        assert_eq!(reparsed.models()[0].hash, "aabbcc");
        assert_eq!(reparsed.workflows(), vec!["workflows/portrait.json"]);

        let mut reparsed = reparsed;
        assert!(reparsed.remove_model("aabbcc").unwrap());
        assert!(reparsed.untrack_workflow("workflows/portrait.json").unwrap());
        assert!(reparsed.models().is_empty());
        assert!(reparsed.workflows().is_empty());
    }

    #[test]
    fn test_foreign_sections_preserved() {
        let raw = "[project]\nname = \"dev\"\n\n[tool.ruff]\nline-length = 100\n";
        let mut manifest = Manifest::parse(raw.to_string()).unwrap();
        manifest
            .add_model(&ModelRef {
                name: "m".to_string(),
                hash: "ff00".to_string(),
            })
            .unwrap();
        // Sections owned by other tools survive a rewrite.
        assert!(manifest.raw().contains("ruff"));
        assert!(manifest.raw().contains("line-length"));
    }
}
