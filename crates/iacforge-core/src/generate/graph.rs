//! Resource graph: the intermediate form between a description or diagram
//! and generated code.
//!
//! Wire format (also what diagram readers produce):
//!
//! ```json
//! {
//!   "region": "us-east-1",
//!   "nodes": [
//!     {"id": "main", "type": "vpc"},
//!     {"id": "web", "type": "ec2", "label": "Web tier", "attributes": {"count": 2}}
//!   ],
//!   "edges": [{"from": "web", "to": "main", "relation": "in"}]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenerateError;
use crate::hcl::is_identifier;

use super::catalog::NodeType;

/// A component in the architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    /// The catalog type, if recognized.
    #[must_use]
    pub fn kind(&self) -> Option<NodeType> {
        NodeType::parse(&self.node_type)
    }

    pub(crate) fn bool_attr(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn u64_attr(&self, key: &str) -> Option<u64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)?.as_str()
    }

    pub(crate) fn ports_attr(&self) -> Vec<u16> {
        match self.attributes.get("ports") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_u64().and_then(|n| u16::try_from(n).ok()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The Terraform resource name derived from the node id.
    #[must_use]
    pub fn resource_name(&self) -> String {
        sanitize(&self.id)
    }
}

/// A relationship between two nodes. Direction is informational; references
/// are resolved by the types at either end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Nodes plus edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl ResourceGraph {
    /// Parse the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError::InvalidGraph`] for malformed JSON or a
    /// structurally invalid graph.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GenerateError> {
        let graph: Self =
            serde_json::from_slice(bytes).map_err(|e| GenerateError::InvalidGraph {
                reason: e.to_string(),
            })?;
        graph.validate()?;
        Ok(graph)
    }

    /// Check ids are present and unique and edges point at real nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError::InvalidGraph`] describing the first problem.
    pub fn validate(&self) -> Result<(), GenerateError> {
        if self.nodes.is_empty() {
            return Err(invalid("graph has no nodes"));
        }
        let mut seen = HashSet::new();
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(invalid("node with empty id"));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(invalid(&format!("duplicate node id '{}'", node.id)));
            }
            if !names.insert((node.node_type.to_ascii_lowercase(), node.resource_name())) {
                return Err(invalid(&format!(
                    "node ids collide after normalization: '{}'",
                    node.id
                )));
            }
        }
        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !seen.contains(end.as_str()) {
                    return Err(invalid(&format!("edge references unknown node '{end}'")));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes connected to `id` in either direction, in edge order.
    pub fn neighbours<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.edges
            .iter()
            .filter_map(move |e| {
                if e.from == id {
                    Some(e.to.as_str())
                } else if e.to == id {
                    Some(e.from.as_str())
                } else {
                    None
                }
            })
            .filter_map(|other| self.node(other))
    }

    /// Neighbours of a given catalog type.
    pub fn neighbours_of<'a>(
        &'a self,
        id: &'a str,
        kind: NodeType,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.neighbours(id).filter(move |n| n.kind() == Some(kind))
    }

    /// All nodes of a given catalog type.
    pub fn of_kind(&self, kind: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind() == Some(kind))
    }

    /// Nodes ordered containers-first, stable within a rank.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.kind().map_or(u8::MAX, NodeType::rank));
        nodes
    }
}

fn invalid(reason: &str) -> GenerateError {
    GenerateError::InvalidGraph {
        reason: reason.to_owned(),
    }
}

/// Turn an arbitrary id into a Terraform-safe resource name.
#[must_use]
pub fn sanitize(id: &str) -> String {
    let mut out: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    let out = out.trim_matches('_').to_owned();
    if is_identifier(&out) {
        out
    } else {
        format!("r_{out}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let g = ResourceGraph::from_json(
            br#"{"nodes":[{"id":"main","type":"vpc"},{"id":"Web Server 1","type":"EC2"}],
                 "edges":[{"from":"Web Server 1","to":"main"}]}"#,
        )
        .unwrap();
        assert_eq!(g.nodes[1].kind(), Some(NodeType::Instance));
        assert_eq!(g.nodes[1].resource_name(), "web_server_1");
        assert_eq!(g.neighbours_of("Web Server 1", NodeType::Vpc).count(), 1);
    }

    #[test]
    fn rejects_dangling_edges_and_duplicates() {
        assert!(ResourceGraph::from_json(br#"{"nodes":[{"id":"a","type":"vpc"}],"edges":[{"from":"a","to":"b"}]}"#).is_err());
        assert!(ResourceGraph::from_json(br#"{"nodes":[{"id":"a","type":"vpc"},{"id":"a","type":"subnet"}]}"#).is_err());
        assert!(ResourceGraph::from_json(br#"{"nodes":[]}"#).is_err());
        assert!(ResourceGraph::from_json(b"not json").is_err());
    }

    #[test]
    fn ordering_puts_containers_first() {
        let g = ResourceGraph {
            region: None,
            nodes: vec![
                Node::new("web", "instance"),
                Node::new("kafka", "msk"),
                Node::new("pub", "subnet"),
                Node::new("main", "vpc"),
            ],
            edges: Vec::new(),
        };
        let ids: Vec<_> = g.ordered().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["main", "pub", "web", "kafka"]);
    }

    #[test]
    fn sanitize_names() {
        assert_eq!(sanitize("web-1"), "web_1");
        assert_eq!(sanitize("3tier"), "r_3tier");
        assert_eq!(sanitize("  Main VPC "), "main_vpc");
    }
}
