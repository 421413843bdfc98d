// SPDX-License-Identifier: MIT OR Apache-2.0
//! Notifications emitted by the graph for the editor layer.

use crate::edge::EdgeId;
use crate::graph::ParameterId;
use crate::node::NodeId;
use crate::port::PortDirection;
use serde::{Deserialize, Serialize};

/// Severity of a message attached to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageSeverity {
    /// Informational
    Info,
    /// Something looks wrong but processing went on
    Warning,
    /// Processing failed
    Error,
}

/// A message attached to a node, shown by the editor next to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMessage {
    /// Severity
    pub severity: MessageSeverity,
    /// Message text
    pub text: String,
}

impl NodeMessage {
    /// Create a new message
    pub fn new(severity: MessageSeverity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

/// Change notification queued by a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeId),
    /// A node was removed
    NodeRemoved(NodeId),
    /// An edge was connected
    EdgeConnected(EdgeId),
    /// An edge was disconnected, explicitly or by force
    EdgeDisconnected(EdgeId),
    /// The port schema of a node changed
    PortSchemaChanged {
        /// Node whose ports changed
        node: NodeId,
        /// Which side changed
        direction: PortDirection,
    },
    /// A message was attached to a node
    NodeMessage {
        /// Node the message belongs to
        node: NodeId,
        /// Severity
        severity: MessageSeverity,
        /// Message text
        text: String,
    },
    /// A field of a node was updated
    NodeFieldChanged {
        /// Node whose field changed
        node: NodeId,
        /// Field name
        field: String,
    },
    /// An exposed parameter changed value
    ParameterValueChanged(ParameterId),
}
