// SPDX-License-Identifier: MIT OR Apache-2.0
//! Edge definitions for the graph.

use crate::adapter::Converter;
use crate::node::NodeId;
use crate::port::{PortId, PortValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Create a new random edge ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A port addressed by its owning node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node
    pub node: NodeId,
    /// Port identifier on that node
    pub port: PortId,
}

impl PortRef {
    /// Create a new port reference
    pub fn new(node: NodeId, port: impl Into<PortId>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// A directed edge from an output port to an input port
#[derive(Debug, Clone)]
pub struct Edge {
    /// Unique edge ID
    pub id: EdgeId,
    /// Source output port
    pub from: PortRef,
    /// Destination input port
    pub to: PortRef,
    /// Conversion applied when the port types differ
    pub(crate) converter: Option<Converter>,
    /// Value in flight during the current pass. `None` means not produced.
    pub(crate) buffer: Option<PortValue>,
}

impl Edge {
    pub(crate) fn new(from: PortRef, to: PortRef, converter: Option<Converter>) -> Self {
        Self {
            id: EdgeId::new(),
            from,
            to,
            converter,
            buffer: None,
        }
    }

    /// Check if this edge involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from.node == node_id || self.to.node == node_id
    }

    /// The conversion applied to values crossing this edge, if any
    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    /// The value carried during the last pass, if one was produced
    pub fn buffer(&self) -> Option<&PortValue> {
        self.buffer.as_ref()
    }

    /// Whether this edge runs from `from` to `to`
    pub fn connects(&self, from: &PortRef, to: &PortRef) -> bool {
        self.from == *from && self.to == *to
    }
}
