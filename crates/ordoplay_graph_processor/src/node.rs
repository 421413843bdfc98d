// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A [`NodeType`] is registered once per kind in a [`NodeRegistry`] and
//! carries the port declarations, default fields and the [`NodeBehavior`]
//! that processes instances of that kind. A [`Node`] is one instance living
//! in a graph.

use crate::edge::{EdgeId, PortRef};
use crate::evaluation::{ProcessContext, ProcessError};
use crate::events::{MessageSeverity, NodeMessage};
use crate::graph::{ExposedParameter, ParameterId};
use crate::port::{PortDirection, PortId, PortSchema, PortType, PortValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Named field values of a node instance
pub type Fields = IndexMap<String, PortValue>;

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Input nodes (constants, parameters)
    Input,
    /// Output nodes (result, preview)
    Output,
    /// Math operations
    Math,
    /// Logic/flow control
    Logic,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// Declaration of a port, or a group of ports, on a node type
#[derive(Debug, Clone)]
pub enum PortDecl {
    /// A port that exists for the node's whole lifetime
    Static(PortSchema),
    /// Ports derived from the connected edges by [`NodeBehavior::derive_ports`]
    Dynamic(String),
}

/// Whether a dynamic port group matches the current edge set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaState {
    /// Derivation needed
    Stale,
    /// Derived ports match the current edges and fields
    Fresh,
}

/// Edge attached to a dynamic port group, as seen by a derivation
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedEdge {
    /// Edge ID
    pub edge: EdgeId,
    /// Port of the deriving node the edge is attached to
    pub port: PortId,
    /// Port at the other end of the edge
    pub peer: PortRef,
    /// Declared type of the peer port
    pub peer_type: PortType,
}

/// Input to a dynamic port derivation
pub struct PortDerivation<'a> {
    /// Node being derived
    pub node: NodeId,
    /// Side of the group
    pub direction: PortDirection,
    /// Current field values of the node
    pub fields: &'a Fields,
    /// Edges attached to the group's current ports, in connection order
    pub edges: &'a [ConnectedEdge],
    pub(crate) parameters: &'a IndexMap<ParameterId, ExposedParameter>,
}

impl PortDerivation<'_> {
    /// Look up an exposed parameter of the owning graph
    pub fn parameter(&self, id: ParameterId) -> Option<&ExposedParameter> {
        self.parameters.get(&id)
    }
}

/// Access given to lifecycle hooks
pub struct LifecycleContext<'a> {
    /// The node being enabled or disabled
    pub node: &'a mut Node,
    pub(crate) parameters: &'a IndexMap<ParameterId, ExposedParameter>,
    pub(crate) posted: Vec<NodeMessage>,
}

impl LifecycleContext<'_> {
    /// Look up an exposed parameter of the owning graph
    pub fn parameter(&self, id: ParameterId) -> Option<&ExposedParameter> {
        self.parameters.get(&id)
    }

    /// Attach a message to the node
    pub fn message(&mut self, severity: MessageSeverity, text: impl Into<String>) {
        self.posted.push(NodeMessage::new(severity, text));
    }
}

/// Behavior shared by every node of one kind
pub trait NodeBehavior: Send + Sync {
    /// Process one pass. Runs to completion synchronously.
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError>;

    /// Derive the ports of a dynamic group from the current edges.
    ///
    /// Must be free of side effects. Identifiers must be unique within the
    /// node's ports for that direction.
    fn derive_ports(&self, _group: &str, _derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Called once when the node is attached to a graph
    fn enable(&self, _ctx: &mut LifecycleContext<'_>) {}

    /// Called once when the node is removed or the graph torn down
    fn disable(&self, _ctx: &mut LifecycleContext<'_>) {}
}

/// Adapter turning a closure into a [`NodeBehavior`] with no ports to derive
pub struct ProcessFn<F>(pub F);

impl<F> NodeBehavior for ProcessFn<F>
where
    F: Fn(&mut ProcessContext<'_>) -> Result<(), ProcessError> + Send + Sync,
{
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        (self.0)(ctx)
    }
}

/// Node type definition
#[derive(Clone)]
pub struct NodeType {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Input port declarations, in display order
    pub inputs: Vec<PortDecl>,
    /// Output port declarations, in display order
    pub outputs: Vec<PortDecl>,
    /// Default field values for new instances
    pub fields: Fields,
    behavior: Arc<dyn NodeBehavior>,
}

impl NodeType {
    /// Create a node type with no ports
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: NodeCategory,
        behavior: impl NodeBehavior + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            fields: Fields::new(),
            behavior: Arc::new(behavior),
        }
    }

    /// Create a node type from a process closure
    pub fn from_fn<F>(id: impl Into<String>, name: impl Into<String>, category: NodeCategory, process: F) -> Self
    where
        F: Fn(&mut ProcessContext<'_>) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        Self::new(id, name, category, ProcessFn(process))
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a static input port
    pub fn with_input(mut self, port: PortSchema) -> Self {
        self.inputs.push(PortDecl::Static(PortSchema {
            direction: PortDirection::Input,
            ..port
        }));
        self
    }

    /// Declare a static output port
    pub fn with_output(mut self, port: PortSchema) -> Self {
        self.outputs.push(PortDecl::Static(PortSchema {
            direction: PortDirection::Output,
            ..port
        }));
        self
    }

    /// Declare a dynamic input group
    pub fn with_dynamic_inputs(mut self, group: impl Into<String>) -> Self {
        self.inputs.push(PortDecl::Dynamic(group.into()));
        self
    }

    /// Declare a dynamic output group
    pub fn with_dynamic_outputs(mut self, group: impl Into<String>) -> Self {
        self.outputs.push(PortDecl::Dynamic(group.into()));
        self
    }

    /// Add a field with its default value
    pub fn with_field(mut self, name: impl Into<String>, value: PortValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Port declarations for one direction
    pub fn ports(&self, direction: PortDirection) -> &[PortDecl] {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    /// The behavior processing nodes of this kind
    pub fn behavior(&self) -> Arc<dyn NodeBehavior> {
        Arc::clone(&self.behavior)
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// A group of dynamic ports and its derivation state
#[derive(Debug, Clone)]
pub(crate) struct DynamicGroup {
    pub(crate) direction: PortDirection,
    pub(crate) name: String,
    pub(crate) state: SchemaState,
    pub(crate) ports: Vec<PortSchema>,
}

/// A node instance in the graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node type ID
    pub node_type: String,
    /// Display name (can be customized)
    pub name: String,
    /// Position in the graph UI
    pub position: [f32; 2],
    /// Field values
    pub fields: Fields,
    pub(crate) inputs: Vec<PortSchema>,
    pub(crate) outputs: Vec<PortSchema>,
    pub(crate) groups: Vec<DynamicGroup>,
    pub(crate) messages: Vec<NodeMessage>,
    pub(crate) produced: IndexMap<PortId, PortValue>,
}

impl Node {
    /// Create a new node from a type definition.
    ///
    /// Dynamic groups start out stale and empty until the graph derives them.
    pub fn new(node_type: &NodeType) -> Self {
        let mut groups = Vec::new();
        let mut collect_static = |direction: PortDirection| {
            let mut ports = Vec::new();
            for decl in node_type.ports(direction) {
                match decl {
                    PortDecl::Static(schema) => ports.push(schema.clone()),
                    PortDecl::Dynamic(group) => groups.push(DynamicGroup {
                        direction,
                        name: group.clone(),
                        state: SchemaState::Stale,
                        ports: Vec::new(),
                    }),
                }
            }
            ports
        };
        let inputs = collect_static(PortDirection::Input);
        let outputs = collect_static(PortDirection::Output);

        Self {
            id: NodeId::new(),
            node_type: node_type.id.clone(),
            name: node_type.name.clone(),
            position: [0.0, 0.0],
            fields: node_type.fields.clone(),
            inputs,
            outputs,
            groups,
            messages: Vec::new(),
            produced: IndexMap::new(),
        }
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Input ports, in display order
    pub fn inputs(&self) -> &[PortSchema] {
        &self.inputs
    }

    /// Output ports, in display order
    pub fn outputs(&self) -> &[PortSchema] {
        &self.outputs
    }

    /// Ports for one direction
    pub fn ports(&self, direction: PortDirection) -> &[PortSchema] {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    /// Get an input port by ID
    pub fn input(&self, port_id: &PortId) -> Option<&PortSchema> {
        self.inputs.iter().find(|p| p.id == *port_id)
    }

    /// Get an output port by ID
    pub fn output(&self, port_id: &PortId) -> Option<&PortSchema> {
        self.outputs.iter().find(|p| p.id == *port_id)
    }

    /// Get a field value
    pub fn field(&self, name: &str) -> Option<&PortValue> {
        self.fields.get(name)
    }

    /// Messages attached to this node
    pub fn messages(&self) -> &[NodeMessage] {
        &self.messages
    }

    /// Whether any attached message is an error
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == MessageSeverity::Error)
    }

    /// Derivation state of a dynamic port group
    pub fn group_state(&self, direction: PortDirection, group: &str) -> Option<SchemaState> {
        self.group(direction, group).map(|g| g.state)
    }

    /// Output values produced during the last pass
    pub fn produced(&self) -> &IndexMap<PortId, PortValue> {
        &self.produced
    }

    pub(crate) fn group(&self, direction: PortDirection, name: &str) -> Option<&DynamicGroup> {
        self.groups
            .iter()
            .find(|g| g.direction == direction && g.name == name)
    }

    /// Mark the groups owning `port` as stale. A port the node no longer
    /// has marks every group on that side.
    pub(crate) fn invalidate_port(&mut self, direction: PortDirection, port: &PortId) {
        let known = self.ports(direction).iter().any(|p| p.id == *port);
        for group in &mut self.groups {
            if group.direction == direction && (!known || group.ports.iter().any(|p| p.id == *port)) {
                group.state = SchemaState::Stale;
            }
        }
    }

    /// Mark every dynamic group as stale
    pub(crate) fn invalidate_all(&mut self) {
        for group in &mut self.groups {
            group.state = SchemaState::Stale;
        }
    }

    pub(crate) fn has_stale_groups(&self) -> bool {
        self.groups.iter().any(|g| g.state == SchemaState::Stale)
    }

    pub(crate) fn push_message(&mut self, message: NodeMessage, limit: usize) {
        self.messages.push(message);
        if self.messages.len() > limit {
            let excess = self.messages.len() - limit;
            self.messages.drain(..excess);
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type, replacing any type with the same ID
    pub fn register(&mut self, node_type: NodeType) {
        if self.types.contains_key(&node_type.id) {
            tracing::warn!("Replacing node type '{}'", node_type.id);
        }
        self.types.insert(node_type.id.clone(), node_type);
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Create a node from a type ID
    pub fn create_node(&self, type_id: &str) -> Option<Node> {
        self.get(type_id).map(Node::new)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough() -> NodeType {
        NodeType::from_fn("pass", "Pass", NodeCategory::Utility, |_| Ok(()))
            .with_input(PortSchema::input("in", "In", PortType::Float))
            .with_dynamic_inputs("extra")
            .with_output(PortSchema::output("out", "Out", PortType::Float))
            .with_field("factor", PortValue::Float(2.0))
    }

    #[test]
    fn test_node_from_type() {
        let node = Node::new(&passthrough());
        assert_eq!(node.node_type, "pass");
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(node.field("factor"), Some(&PortValue::Float(2.0)));
        assert_eq!(
            node.group_state(PortDirection::Input, "extra"),
            Some(SchemaState::Stale)
        );
        assert!(node.has_stale_groups());
    }

    #[test]
    fn test_message_limit() {
        let mut node = Node::new(&passthrough());
        for i in 0..5 {
            node.push_message(NodeMessage::new(MessageSeverity::Info, format!("m{i}")), 3);
        }
        let texts: Vec<_> = node.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m2", "m3", "m4"]);
        assert!(!node.has_errors());
    }

    #[test]
    fn test_registry() {
        let mut registry = NodeRegistry::new();
        registry.register(passthrough());
        assert!(registry.get("pass").is_some());
        assert_eq!(registry.types_in_category(NodeCategory::Utility).count(), 1);
        assert_eq!(registry.types_in_category(NodeCategory::Math).count(), 0);
        assert!(registry.create_node("missing").is_none());
    }
}
