/// Distribution network model.
///
/// The node directory only stores naming columns (pump, zone, colony); the
/// tree is implied by them. This module turns the flat directory into an
/// arena of nodes with an explicit parent index and child lists, built once
/// at load time, so nothing downstream ever joins on names again.
///
/// Parent rules:
///   - level 1 (pump) has no parent
///   - level 2 (zone) hangs off the pump with the same `pump` name
///   - level 3 (colony) hangs off the zone with the same `(pump, zone)`
///
/// Two pumps sharing a pump name, or two zones sharing a `(pump, zone)`,
/// would make the parent of their children ambiguous and are rejected.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::logging::{self, Component};
use crate::model::{HierarchyLevel, NodeRecord};

/// Position of a node in the `Network` arena.
pub type NodeIndex = usize;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("node '{node_id}' is missing its {field} name")]
    MissingName { node_id: String, field: &'static str },
    #[error("ambiguous parent key {key}: claimed by '{first}' and '{second}'")]
    AmbiguousParent { key: String, first: String, second: String },
    #[error("cannot read network file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid network file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkNode {
    pub record: NodeRecord,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<NetworkNode>,
    by_id: HashMap<String, NodeIndex>,
}

impl Network {
    /// Builds the arena from directory rows.
    ///
    /// Zones and colonies whose parent does not exist are kept as parentless
    /// nodes and logged; they are still scored, they just never inherit
    /// contamination.
    pub fn build(records: Vec<NodeRecord>) -> Result<Self, NetworkError> {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut pumps: HashMap<String, NodeIndex> = HashMap::new();
        let mut zones: HashMap<(String, String), NodeIndex> = HashMap::new();

        for (idx, record) in records.iter().enumerate() {
            if by_id.insert(record.node_id.clone(), idx).is_some() {
                return Err(NetworkError::DuplicateNode(record.node_id.clone()));
            }

            match record.hierarchy_level {
                HierarchyLevel::Pump => {
                    if let Some(first) = pumps.insert(record.pump.clone(), idx) {
                        return Err(NetworkError::AmbiguousParent {
                            key: format!("pump={}", record.pump),
                            first: records[first].node_id.clone(),
                            second: record.node_id.clone(),
                        });
                    }
                }
                HierarchyLevel::Zone => {
                    let zone = required(record, "zone", record.zone.as_deref())?;
                    let key = (record.pump.clone(), zone.to_string());
                    if let Some(first) = zones.insert(key, idx) {
                        return Err(NetworkError::AmbiguousParent {
                            key: format!("pump={} zone={}", record.pump, zone),
                            first: records[first].node_id.clone(),
                            second: record.node_id.clone(),
                        });
                    }
                }
                HierarchyLevel::Colony => {
                    required(record, "zone", record.zone.as_deref())?;
                    required(record, "colony", record.colony.as_deref())?;
                }
            }
        }

        let mut nodes: Vec<NetworkNode> = Vec::with_capacity(records.len());
        for record in records {
            let parent = match record.hierarchy_level {
                HierarchyLevel::Pump => None,
                HierarchyLevel::Zone => pumps.get(&record.pump).copied(),
                HierarchyLevel::Colony => {
                    let key = (record.pump.clone(), record.zone.clone().unwrap_or_default());
                    zones.get(&key).copied()
                }
            };

            if parent.is_none() && record.hierarchy_level != HierarchyLevel::Pump {
                logging::warn(
                    Component::System,
                    Some(&record.node_id),
                    &format!("{} has no parent in the directory", record.hierarchy_level),
                );
            }

            nodes.push(NetworkNode { record, parent, children: Vec::new() });
        }

        for idx in 0..nodes.len() {
            if let Some(parent) = nodes[idx].parent {
                nodes[parent].children.push(idx);
            }
        }

        Ok(Self { nodes, by_id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIndex) -> &NetworkNode {
        &self.nodes[idx]
    }

    pub fn node_id(&self, idx: NodeIndex) -> &str {
        &self.nodes[idx].record.node_id
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.by_id.get(node_id).copied()
    }

    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.nodes[idx].parent
    }

    pub fn children(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.nodes[idx].children
    }

    /// Indices of every level-1 node, in directory order.
    pub fn pumps(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.record.hierarchy_level == HierarchyLevel::Pump)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Zones and colonies that could not be attached to a parent.
    pub fn orphans(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none() && n.record.hierarchy_level != HierarchyLevel::Pump)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &NetworkNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().map(|n| &n.record)
    }
}

fn required<'a>(
    record: &NodeRecord,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, NetworkError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NetworkError::MissingName { node_id: record.node_id.clone(), field })
}

// ---------------------------------------------------------------------------
// Network file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NetworkFile {
    #[serde(rename = "node", default)]
    nodes: Vec<NodeRecord>,
}

/// Parses a network file's contents.
pub fn parse_network(contents: &str, path: &str) -> Result<Network, NetworkError> {
    let file: NetworkFile = toml::from_str(contents)
        .map_err(|source| NetworkError::Parse { path: path.to_string(), source })?;
    Network::build(file.nodes)
}

/// Loads a network from a TOML file of `[[node]]` tables.
pub fn load_network(path: impl AsRef<Path>) -> Result<Network, NetworkError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path)
        .map_err(|source| NetworkError::Io { path: display.clone(), source })?;
    parse_network(&contents, &display)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
