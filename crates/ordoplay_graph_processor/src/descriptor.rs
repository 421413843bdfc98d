// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plain descriptor form of a graph, used for persistence and undo by the
//! editor layer. The core does not depend on any particular encoding; RON
//! and JSON helpers are provided for convenience.

use crate::edge::PortRef;
use crate::graph::{ExposedParameter, GraphError};
use crate::node::{Fields, NodeId};
use crate::port::PortValue;
use serde::{Deserialize, Serialize};

/// Current descriptor format version
pub const DESCRIPTOR_FORMAT_VERSION: u32 = 1;

/// Description of a node to instantiate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// ID to reuse; a fresh one is assigned when absent
    #[serde(default)]
    pub id: Option<NodeId>,
    /// Node type ID
    pub node_type: String,
    /// Display name override
    #[serde(default)]
    pub name: Option<String>,
    /// Position in the graph UI
    #[serde(default)]
    pub position: [f32; 2],
    /// Field values overriding the type defaults
    #[serde(default)]
    pub fields: Fields,
}

impl NodeDescriptor {
    /// Describe a new node of the given type
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            id: None,
            node_type: node_type.into(),
            name: None,
            position: [0.0, 0.0],
            fields: Fields::new(),
        }
    }

    /// Reuse an existing node ID
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Set a field value
    pub fn with_field(mut self, name: impl Into<String>, value: PortValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Description of an edge by its endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    /// Source output port
    pub from: PortRef,
    /// Destination input port
    pub to: PortRef,
}

/// Description of a whole graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Graph name
    pub name: String,
    /// Nodes, in insertion order
    pub nodes: Vec<NodeDescriptor>,
    /// Edges, in connection order
    pub edges: Vec<EdgeDescriptor>,
    /// Exposed parameters
    #[serde(default)]
    pub parameters: Vec<ExposedParameter>,
}

fn default_version() -> u32 {
    DESCRIPTOR_FORMAT_VERSION
}

impl GraphDescriptor {
    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, GraphError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        ron::ser::to_string_pretty(self, config).map_err(|e| GraphError::Serialization(e.to_string()))
    }

    /// Deserialize from RON
    pub fn from_ron(source: &str) -> Result<Self, GraphError> {
        let descriptor: Self =
            ron::from_str(source).map_err(|e| GraphError::Serialization(e.to_string()))?;
        descriptor.check_version()?;
        Ok(descriptor)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(self).map_err(|e| GraphError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(source: &str) -> Result<Self, GraphError> {
        let descriptor: Self =
            serde_json::from_str(source).map_err(|e| GraphError::Serialization(e.to_string()))?;
        descriptor.check_version()?;
        Ok(descriptor)
    }

    fn check_version(&self) -> Result<(), GraphError> {
        if self.version > DESCRIPTOR_FORMAT_VERSION {
            return Err(GraphError::Serialization(format!(
                "Graph version {} is newer than supported version {}",
                self.version, DESCRIPTOR_FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_version_rejected() {
        let descriptor = GraphDescriptor {
            version: DESCRIPTOR_FORMAT_VERSION + 1,
            name: "Future".to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            parameters: Vec::new(),
        };
        let json = descriptor.to_json().unwrap();
        assert!(matches!(
            GraphDescriptor::from_json(&json),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_optional_fields() {
        let json = r#"{ "name": "Minimal", "nodes": [{ "node_type": "float" }], "edges": [] }"#;
        let descriptor = GraphDescriptor::from_json(json).unwrap();
        assert_eq!(descriptor.version, DESCRIPTOR_FORMAT_VERSION);
        assert_eq!(descriptor.nodes[0], NodeDescriptor::new("float"));
    }
}
