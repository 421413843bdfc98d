// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and edges.
//!
//! The graph owns every node and edge. Edges address ports through
//! [`PortRef`] pairs and nodes never hold edges, so there are no reference
//! cycles between the two. The edge set is kept acyclic at connect time.

use crate::adapter::{Converter, TypeAdapterRegistry};
use crate::descriptor::{EdgeDescriptor, GraphDescriptor, NodeDescriptor, DESCRIPTOR_FORMAT_VERSION};
use crate::edge::{Edge, EdgeId, PortRef};
use crate::events::{GraphEvent, MessageSeverity, NodeMessage};
use crate::kinds::create_default_registry;
use crate::node::{
    ConnectedEdge, LifecycleContext, Node, NodeBehavior, NodeId, NodeRegistry, NodeType, PortDecl,
    PortDerivation, SchemaState,
};
use crate::port::{duplicate_id, PortDirection, PortId, PortSchema, PortType, PortValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Default number of messages kept per node
pub const DEFAULT_MESSAGE_LIMIT: usize = 32;

/// Shared services a graph is constructed with
#[derive(Clone)]
pub struct GraphContext {
    /// Registered node kinds
    pub kinds: Arc<NodeRegistry>,
    /// Type conversions between port types
    pub adapters: Arc<TypeAdapterRegistry>,
}

impl GraphContext {
    /// Create a context from a kind registry and an adapter registry
    pub fn new(kinds: Arc<NodeRegistry>, adapters: Arc<TypeAdapterRegistry>) -> Self {
        Self { kinds, adapters }
    }

    /// Built-in node kinds with the standard conversions
    pub fn standard() -> Self {
        Self::new(
            Arc::new(create_default_registry()),
            Arc::new(TypeAdapterRegistry::standard()),
        )
    }
}

/// Unique identifier for an exposed parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterId(pub Uuid);

impl ParameterId {
    /// Create a new random parameter ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a parameter ID from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ParameterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A value exposed at graph level, read and written by parameter nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposedParameter {
    /// Unique parameter ID
    pub id: ParameterId,
    /// Display name
    pub name: String,
    /// Current value
    pub value: PortValue,
}

/// A node graph
pub struct Graph {
    /// Graph name
    pub name: String,
    context: GraphContext,
    /// Nodes in insertion order
    pub(crate) nodes: IndexMap<NodeId, Node>,
    /// Edges in connection order
    pub(crate) edges: IndexMap<EdgeId, Edge>,
    pub(crate) parameters: IndexMap<ParameterId, ExposedParameter>,
    pub(crate) events: Vec<GraphEvent>,
    pub(crate) message_limit: usize,
    order: Option<Vec<NodeId>>,
    torn_down: bool,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>, context: GraphContext) -> Self {
        Self {
            name: name.into(),
            context,
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            parameters: IndexMap::new(),
            events: Vec::new(),
            message_limit: DEFAULT_MESSAGE_LIMIT,
            order: None,
            torn_down: false,
        }
    }

    /// The services this graph was built with
    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    /// Set how many messages each node keeps
    pub fn set_message_limit(&mut self, limit: usize) {
        self.message_limit = limit.max(1);
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Instantiate a node, enable it and derive its dynamic ports
    pub fn add_node(&mut self, descriptor: NodeDescriptor) -> Result<NodeId, GraphError> {
        if self.torn_down {
            return Err(GraphError::TornDown);
        }
        let node_type = self
            .context
            .kinds
            .get(&descriptor.node_type)
            .ok_or_else(|| GraphError::UnknownNodeType(descriptor.node_type.clone()))?;

        let mut node = Node::new(node_type);
        if let Some(id) = descriptor.id {
            if self.nodes.contains_key(&id) {
                return Err(GraphError::DuplicateNode(id));
            }
            node.id = id;
        }
        if let Some(name) = descriptor.name {
            node.name = name;
        }
        node.position = descriptor.position;
        node.fields.extend(descriptor.fields);

        let id = node.id;
        self.nodes.insert(id, node);
        self.order = None;
        self.run_lifecycle(id, Lifecycle::Enable);
        self.refresh_ports(vec![id]);
        self.events.push(GraphEvent::NodeAdded(id));
        tracing::debug!("Added node {} ({})", id, descriptor.node_type);
        Ok(id)
    }

    /// Remove a node, disconnecting every edge touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node, GraphError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(GraphError::NodeNotFound(node_id));
        }

        let touching: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.involves_node(node_id))
            .map(|e| e.id)
            .collect();
        let mut peers = Vec::new();
        for edge_id in touching {
            if let Some(edge) = self.detach_edge(edge_id) {
                for peer in [edge.from.node, edge.to.node] {
                    if peer != node_id && !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
            }
        }

        self.run_lifecycle(node_id, Lifecycle::Disable);
        let node = self
            .nodes
            .shift_remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        self.order = None;
        self.events.push(GraphEvent::NodeRemoved(node_id));
        tracing::debug!("Removed node {} ({})", node_id, node.node_type);

        self.refresh_ports(peers);
        Ok(node)
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get all nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs, in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Update a field of a node. Dynamic ports are derived again since
    /// fields may drive their shape.
    pub fn update_node_field(
        &mut self,
        node_id: NodeId,
        field: impl Into<String>,
        value: PortValue,
    ) -> Result<Option<PortValue>, GraphError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let field = field.into();
        let previous = node.fields.insert(field.clone(), value);
        node.invalidate_all();

        self.events.push(GraphEvent::NodeFieldChanged {
            node: node_id,
            field,
        });
        self.refresh_ports(vec![node_id]);
        Ok(previous)
    }

    /// Output value a node produced on its last pass
    pub fn output(&self, node_id: NodeId, port: &str) -> Option<&PortValue> {
        self.nodes.get(&node_id)?.produced.get(port)
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Connect an output port to an input port.
    ///
    /// Rejected, leaving the graph untouched, when the destination port is
    /// single and already connected, when the port types neither match nor
    /// convert, or when the edge would close a cycle. Also fails when the
    /// port derivation that follows drops the new edge again.
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<EdgeId, GraphError> {
        if self.torn_down {
            return Err(GraphError::TornDown);
        }
        let source_node = self
            .nodes
            .get(&from.node)
            .ok_or(GraphError::NodeNotFound(from.node))?;
        let target_node = self
            .nodes
            .get(&to.node)
            .ok_or(GraphError::NodeNotFound(to.node))?;

        let source_port = source_node
            .output(&from.port)
            .ok_or_else(|| GraphError::PortNotFound(from.clone()))?;
        let target_port = target_node
            .input(&to.port)
            .ok_or_else(|| GraphError::PortNotFound(to.clone()))?;

        if self.edges.values().any(|e| e.connects(&from, &to)) {
            return Err(GraphError::EdgeAlreadyExists { from, to });
        }

        if !target_port.accept_multiple_edges && self.edges_to(&to).next().is_some() {
            return Err(GraphError::PortCardinalityViolation(to));
        }
        if !source_port.accept_multiple_edges && self.edges_from(&from).next().is_some() {
            return Err(GraphError::PortCardinalityViolation(from));
        }

        let converter = self.converter_for(&source_port.port_type, &target_port.port_type)?;

        if self.would_create_cycle(from.node, to.node) {
            return Err(GraphError::CycleRejected { from, to });
        }

        let edge = Edge::new(from.clone(), to.clone(), converter);
        let id = edge.id;
        self.edges.insert(id, edge);
        if let Some(node) = self.nodes.get_mut(&from.node) {
            node.invalidate_port(PortDirection::Output, &from.port);
        }
        if let Some(node) = self.nodes.get_mut(&to.node) {
            node.invalidate_port(PortDirection::Input, &to.port);
        }
        self.order = None;
        self.events.push(GraphEvent::EdgeConnected(id));
        tracing::debug!("Connected {} -> {} ({})", from, to, id);

        self.refresh_ports(vec![to.node, from.node]);
        if !self.edges.contains_key(&id) {
            return Err(GraphError::EdgeDropped { from, to });
        }
        Ok(id)
    }

    /// Converter for values crossing from one port type to another
    fn converter_for(&self, from: &PortType, to: &PortType) -> Result<Option<Converter>, GraphError> {
        let adapters = &self.context.adapters;
        if !adapters.can_convert(from, to) {
            return Err(GraphError::TypeIncompatible {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok(adapters.resolve(from, to))
    }

    /// Remove an edge
    pub fn disconnect(&mut self, edge_id: EdgeId) -> Result<Edge, GraphError> {
        let edge = self
            .detach_edge(edge_id)
            .ok_or(GraphError::EdgeNotFound(edge_id))?;
        tracing::debug!("Disconnected {} -> {} ({})", edge.from, edge.to, edge_id);
        self.refresh_ports(vec![edge.to.node, edge.from.node]);
        Ok(edge)
    }

    /// Get an edge by ID
    pub fn edge(&self, edge_id: EdgeId) -> Option<&Edge> {
        self.edges.get(&edge_id)
    }

    /// Get all edges, in connection order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Get edges leaving a specific port
    pub fn edges_from<'a>(&'a self, port: &'a PortRef) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.from == *port)
    }

    /// Get edges arriving at a specific port
    pub fn edges_to<'a>(&'a self, port: &'a PortRef) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.to == *port)
    }

    /// Get edges involving a node
    pub fn edges_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(move |e| e.involves_node(node_id))
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether `from -> to` would close a cycle: true when `from` is
    /// reachable from `to` through existing edges.
    fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }

        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in self.edges.values() {
            successors.entry(edge.from.node).or_default().push(edge.to.node);
        }

        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![to];
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = successors.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Remove an edge without re-deriving ports
    fn detach_edge(&mut self, edge_id: EdgeId) -> Option<Edge> {
        let edge = self.edges.shift_remove(&edge_id)?;
        if let Some(node) = self.nodes.get_mut(&edge.from.node) {
            node.invalidate_port(PortDirection::Output, &edge.from.port);
        }
        if let Some(node) = self.nodes.get_mut(&edge.to.node) {
            node.invalidate_port(PortDirection::Input, &edge.to.port);
        }
        self.order = None;
        self.events.push(GraphEvent::EdgeDisconnected(edge_id));
        Some(edge)
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Nodes in execution order, recomputed only after structural changes
    pub fn execution_order(&mut self) -> Result<Vec<NodeId>, GraphError> {
        if let Some(order) = &self.order {
            return Ok(order.clone());
        }
        let order = self.topological_order()?;
        self.order = Some(order.clone());
        Ok(order)
    }

    /// Compute a topological order. Nodes that are ready at the same time
    /// come out in insertion order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let count = self.nodes.len();
        let mut in_degree = vec![0usize; count];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];

        for edge in self.edges.values() {
            let (Some(src), Some(dst)) = (
                self.nodes.get_index_of(&edge.from.node),
                self.nodes.get_index_of(&edge.to.node),
            ) else {
                continue;
            };
            successors[src].push(dst);
            in_degree[dst] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            if let Some((id, _)) = self.nodes.get_index(index) {
                order.push(*id);
            }
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != count {
            return Err(GraphError::CycleDetected);
        }
        Ok(order)
    }

    // ========================================================================
    // Dynamic ports
    // ========================================================================

    /// Derive the stale port groups of the given nodes, following forced
    /// disconnections to the peers they touch.
    fn refresh_ports(&mut self, mut pending: Vec<NodeId>) {
        while let Some(node_id) = pending.pop() {
            let forced = self.derive_stale_groups(node_id);
            for edge_id in forced {
                let Some(edge) = self.detach_edge(edge_id) else {
                    continue;
                };
                tracing::warn!(
                    "Force-disconnected {} -> {} after port derivation on node {}",
                    edge.from,
                    edge.to,
                    node_id
                );
                for peer in [edge.from.node, edge.to.node] {
                    if !pending.contains(&peer) {
                        pending.push(peer);
                    }
                }
            }
        }
    }

    fn derive_stale_groups(&mut self, node_id: NodeId) -> Vec<EdgeId> {
        let kinds = Arc::clone(&self.context.kinds);
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        if !node.has_stale_groups() {
            return Vec::new();
        }
        let Some(node_type) = kinds.get(&node.node_type) else {
            tracing::error!("Node {} has unknown type '{}'", node_id, node.node_type);
            return Vec::new();
        };
        let behavior = node_type.behavior();

        let mut forced = self.derive_direction(node_id, node_type, behavior.as_ref(), PortDirection::Input);
        for edge_id in self.derive_direction(node_id, node_type, behavior.as_ref(), PortDirection::Output) {
            if !forced.contains(&edge_id) {
                forced.push(edge_id);
            }
        }
        forced
    }

    /// Replace the ports of one side of a node with a fresh derivation and
    /// return the edges that no longer fit.
    fn derive_direction(
        &mut self,
        node_id: NodeId,
        node_type: &NodeType,
        behavior: &dyn NodeBehavior,
        direction: PortDirection,
    ) -> Vec<EdgeId> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };

        let mut derived: Vec<(String, Vec<PortSchema>)> = Vec::new();
        for group in node
            .groups
            .iter()
            .filter(|g| g.direction == direction && g.state == SchemaState::Stale)
        {
            let claimed: Vec<&PortId> = node
                .ports(direction)
                .iter()
                .filter(|p| !group.ports.iter().any(|g| g.id == p.id))
                .map(|p| &p.id)
                .collect();
            let connected = self.connected_edges(node_id, direction, &group.ports, &claimed);
            let derivation = PortDerivation {
                node: node_id,
                direction,
                fields: &node.fields,
                edges: &connected,
                parameters: &self.parameters,
            };
            let ports = behavior
                .derive_ports(&group.name, &derivation)
                .into_iter()
                .map(|p| PortSchema { direction, ..p }.into_dynamic())
                .collect();
            derived.push((group.name.clone(), ports));
        }
        if derived.is_empty() {
            return Vec::new();
        }

        let mut ports = Vec::new();
        for decl in node_type.ports(direction) {
            match decl {
                PortDecl::Static(schema) => ports.push(schema.clone()),
                PortDecl::Dynamic(name) => {
                    if let Some((_, fresh)) = derived.iter().find(|(n, _)| n == name) {
                        ports.extend(fresh.iter().cloned());
                    } else if let Some(group) = node.group(direction, name) {
                        ports.extend(group.ports.iter().cloned());
                    }
                }
            }
        }

        if let Some(duplicate) = duplicate_id(&ports) {
            let text = format!(
                "Port derivation produced duplicate {direction:?} identifier '{duplicate}', keeping previous ports"
            );
            tracing::error!("Node {}: {}", node_id, text);
            self.post_message(node_id, NodeMessage::new(MessageSeverity::Error, text));
            return Vec::new();
        }

        let (forced, converters) = self.remap_edges(node_id, direction, &ports);
        for (edge_id, converter) in converters {
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.converter = converter;
            }
        }

        let Some(node) = self.nodes.get_mut(&node_id) else {
            return forced;
        };
        for (name, fresh) in derived {
            if let Some(group) = node
                .groups
                .iter_mut()
                .find(|g| g.direction == direction && g.name == name)
            {
                group.ports = fresh;
                group.state = SchemaState::Fresh;
            }
        }
        let slot = match direction {
            PortDirection::Input => &mut node.inputs,
            PortDirection::Output => &mut node.outputs,
        };
        if *slot != ports {
            *slot = ports;
            self.events.push(GraphEvent::PortSchemaChanged {
                node: node_id,
                direction,
            });
            tracing::debug!("Port schema of node {} changed ({:?})", node_id, direction);
        }
        forced
    }

    /// Edges attached to the given ports of a node, in connection order.
    /// Edges on ports that no other declaration claims count as well; they
    /// only exist while a graph is restored.
    fn connected_edges(
        &self,
        node_id: NodeId,
        direction: PortDirection,
        ports: &[PortSchema],
        claimed: &[&PortId],
    ) -> Vec<ConnectedEdge> {
        self.edges
            .values()
            .filter_map(|edge| {
                let (local, peer) = edge_sides(edge, direction);
                if local.node != node_id {
                    return None;
                }
                let in_group = ports.iter().any(|p| p.id == local.port);
                if !in_group && claimed.contains(&&local.port) {
                    return None;
                }
                let peer_type = self.port_type(peer, direction.opposite())?.clone();
                Some(ConnectedEdge {
                    edge: edge.id,
                    port: local.port.clone(),
                    peer: peer.clone(),
                    peer_type,
                })
            })
            .collect()
    }

    /// Check every edge on one side of a node against a new port list.
    ///
    /// Returns the edges to force-disconnect and the refreshed converters of
    /// the edges that stay.
    #[allow(clippy::type_complexity)]
    fn remap_edges(
        &self,
        node_id: NodeId,
        direction: PortDirection,
        ports: &[PortSchema],
    ) -> (Vec<EdgeId>, Vec<(EdgeId, Option<Converter>)>) {
        let adapters = &self.context.adapters;
        let mut forced = Vec::new();
        let mut converters = Vec::new();
        let mut counts: HashMap<&PortId, usize> = HashMap::new();

        for edge in self.edges.values() {
            let (local, peer) = edge_sides(edge, direction);
            if local.node != node_id {
                continue;
            }
            let Some(schema) = ports.iter().find(|p| p.id == local.port) else {
                forced.push(edge.id);
                continue;
            };
            let count = counts.entry(&schema.id).or_insert(0);
            *count += 1;
            if !schema.accept_multiple_edges && *count > 1 {
                forced.push(edge.id);
                continue;
            }
            let Some(peer_type) = self.port_type(peer, direction.opposite()) else {
                forced.push(edge.id);
                continue;
            };
            let (from_type, to_type) = match direction {
                PortDirection::Input => (peer_type, &schema.port_type),
                PortDirection::Output => (&schema.port_type, peer_type),
            };
            if !adapters.can_convert(from_type, to_type) {
                forced.push(edge.id);
                continue;
            }
            converters.push((edge.id, adapters.resolve(from_type, to_type)));
        }
        (forced, converters)
    }

    fn port_type(&self, port: &PortRef, direction: PortDirection) -> Option<&PortType> {
        self.nodes
            .get(&port.node)?
            .ports(direction)
            .iter()
            .find(|p| p.id == port.port)
            .map(|p| &p.port_type)
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Expose a new parameter
    pub fn add_parameter(&mut self, name: impl Into<String>, value: PortValue) -> ParameterId {
        let id = ParameterId::new();
        self.parameters.insert(
            id,
            ExposedParameter {
                id,
                name: name.into(),
                value,
            },
        );
        self.invalidate_dynamic_nodes();
        id
    }

    /// Get a parameter by ID
    pub fn parameter(&self, id: ParameterId) -> Option<&ExposedParameter> {
        self.parameters.get(&id)
    }

    /// Get all parameters
    pub fn parameters(&self) -> impl Iterator<Item = &ExposedParameter> {
        self.parameters.values()
    }

    /// Change the value of a parameter. A change of payload type re-derives
    /// the dynamic ports of every node.
    pub fn update_parameter(&mut self, id: ParameterId, value: PortValue) -> Result<(), GraphError> {
        let parameter = self
            .parameters
            .get_mut(&id)
            .ok_or(GraphError::ParameterNotFound(id))?;
        let type_changed = parameter.value.port_type() != value.port_type();
        parameter.value = value;
        self.events.push(GraphEvent::ParameterValueChanged(id));
        if type_changed {
            self.invalidate_dynamic_nodes();
        }
        Ok(())
    }

    /// Remove a parameter
    pub fn remove_parameter(&mut self, id: ParameterId) -> Result<ExposedParameter, GraphError> {
        let parameter = self
            .parameters
            .shift_remove(&id)
            .ok_or(GraphError::ParameterNotFound(id))?;
        self.invalidate_dynamic_nodes();
        Ok(parameter)
    }

    /// Set a parameter value from a processing pass. The payload type may
    /// not change mid-pass.
    pub(crate) fn set_parameter_value(
        &mut self,
        id: ParameterId,
        value: PortValue,
    ) -> Result<(), GraphError> {
        let parameter = self
            .parameters
            .get_mut(&id)
            .ok_or(GraphError::ParameterNotFound(id))?;
        let (from, to) = (value.port_type(), parameter.value.port_type());
        if from != to {
            return Err(GraphError::TypeIncompatible { from, to });
        }
        if parameter.value != value {
            parameter.value = value;
            self.events.push(GraphEvent::ParameterValueChanged(id));
        }
        Ok(())
    }

    fn invalidate_dynamic_nodes(&mut self) {
        let mut pending = Vec::new();
        for node in self.nodes.values_mut() {
            if !node.groups.is_empty() {
                node.invalidate_all();
                pending.push(node.id);
            }
        }
        pending.reverse();
        self.refresh_ports(pending);
    }

    // ========================================================================
    // Messages, events, lifecycle
    // ========================================================================

    /// Attach a message to a node and notify the editor layer
    pub fn post_message(&mut self, node_id: NodeId, message: NodeMessage) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            self.events.push(GraphEvent::NodeMessage {
                node: node_id,
                severity: message.severity,
                text: message.text.clone(),
            });
            node.push_message(message, self.message_limit);
        }
    }

    /// Clear the messages attached to a node
    pub fn clear_messages(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.messages.clear();
        }
    }

    /// Take the queued notifications
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    /// Disable every node. Runs once; also called on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.run_lifecycle(id, Lifecycle::Disable);
        }
        tracing::debug!("Tore down graph '{}' ({} nodes)", self.name, self.nodes.len());
    }

    fn run_lifecycle(&mut self, node_id: NodeId, hook: Lifecycle) {
        let kinds = Arc::clone(&self.context.kinds);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let Some(node_type) = kinds.get(&node.node_type) else {
            return;
        };
        let behavior = node_type.behavior();
        let mut ctx = LifecycleContext {
            node,
            parameters: &self.parameters,
            posted: Vec::new(),
        };
        match hook {
            Lifecycle::Enable => behavior.enable(&mut ctx),
            Lifecycle::Disable => behavior.disable(&mut ctx),
        }
        let LifecycleContext { posted, .. } = ctx;
        for message in posted {
            self.post_message(node_id, message);
        }
    }

    // ========================================================================
    // Descriptor form
    // ========================================================================

    /// Describe the graph in plain form
    pub fn to_descriptor(&self) -> GraphDescriptor {
        GraphDescriptor {
            version: DESCRIPTOR_FORMAT_VERSION,
            name: self.name.clone(),
            nodes: self
                .nodes
                .values()
                .map(|node| NodeDescriptor {
                    id: Some(node.id),
                    node_type: node.node_type.clone(),
                    name: Some(node.name.clone()),
                    position: node.position,
                    fields: node.fields.clone(),
                })
                .collect(),
            edges: self
                .edges
                .values()
                .map(|edge| EdgeDescriptor {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                })
                .collect(),
            parameters: self.parameters.values().cloned().collect(),
        }
    }

    /// Rebuild a graph from its plain form, replaying every node and edge
    /// through the regular validation.
    pub fn from_descriptor(descriptor: GraphDescriptor, context: GraphContext) -> Result<Self, GraphError> {
        let mut graph = Self::new(descriptor.name, context);
        for parameter in descriptor.parameters {
            graph.parameters.insert(parameter.id, parameter);
        }
        for node in descriptor.nodes {
            graph.add_node(node)?;
        }
        graph.restore_edges(descriptor.edges)?;
        Ok(graph)
    }

    /// Insert a saved edge set in one step.
    ///
    /// Dynamic ports are derived against the whole set before any edge is
    /// checked, so an edge may sit on a slot that only exists once the other
    /// edges are in place.
    fn restore_edges(&mut self, edges: Vec<EdgeDescriptor>) -> Result<(), GraphError> {
        for EdgeDescriptor { from, to } in edges {
            for end in [&from, &to] {
                if !self.nodes.contains_key(&end.node) {
                    return Err(GraphError::NodeNotFound(end.node));
                }
            }
            if self.edges.values().any(|e| e.connects(&from, &to)) {
                return Err(GraphError::EdgeAlreadyExists { from, to });
            }
            let edge = Edge::new(from, to, None);
            self.edges.insert(edge.id, edge);
        }
        self.order = None;

        // Peers' dynamic ports feed each other's derivations; settle them
        let dynamic: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !n.groups.is_empty())
            .map(|n| n.id)
            .collect();
        for _ in 0..=dynamic.len() {
            let before: Vec<(Vec<PortSchema>, Vec<PortSchema>)> = dynamic
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .map(|n| (n.inputs.clone(), n.outputs.clone()))
                .collect();
            for &id in &dynamic {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.invalidate_all();
                }
                self.derive_stale_groups(id);
            }
            let after: Vec<(Vec<PortSchema>, Vec<PortSchema>)> = dynamic
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .map(|n| (n.inputs.clone(), n.outputs.clone()))
                .collect();
            if before == after {
                break;
            }
        }

        let mut counts: HashMap<&PortRef, usize> = HashMap::new();
        let mut converters = Vec::with_capacity(self.edges.len());
        for edge in self.edges.values() {
            let source_port = self
                .node(edge.from.node)
                .and_then(|n| n.output(&edge.from.port))
                .ok_or_else(|| GraphError::PortNotFound(edge.from.clone()))?;
            let target_port = self
                .node(edge.to.node)
                .and_then(|n| n.input(&edge.to.port))
                .ok_or_else(|| GraphError::PortNotFound(edge.to.clone()))?;
            for (end, port) in [(&edge.from, source_port), (&edge.to, target_port)] {
                let count = counts.entry(end).or_insert(0);
                *count += 1;
                if !port.accept_multiple_edges && *count > 1 {
                    return Err(GraphError::PortCardinalityViolation(end.clone()));
                }
            }
            let converter = self.converter_for(&source_port.port_type, &target_port.port_type)?;
            converters.push((edge.id, converter));
        }
        for (id, converter) in converters {
            if let Some(edge) = self.edges.get_mut(&id) {
                edge.converter = converter;
            }
            self.events.push(GraphEvent::EdgeConnected(id));
        }

        self.topological_order()?;
        Ok(())
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
enum Lifecycle {
    Enable,
    Disable,
}

/// The (local, peer) ends of an edge seen from one side of a node
fn edge_sides(edge: &Edge, direction: PortDirection) -> (&PortRef, &PortRef) {
    match direction {
        PortDirection::Input => (&edge.to, &edge.from),
        PortDirection::Output => (&edge.from, &edge.to),
    }
}

/// Error from a structural graph operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edge not found
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Port not found, or on the wrong side of its node
    #[error("Port not found: {0}")]
    PortNotFound(PortRef),

    /// No node type registered under this ID
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// A node with this ID already exists
    #[error("Duplicate node ID: {0}")]
    DuplicateNode(NodeId),

    /// The edge would close a cycle
    #[error("Connecting {from} -> {to} would create a cycle")]
    CycleRejected {
        /// Source port
        from: PortRef,
        /// Destination port
        to: PortRef,
    },

    /// The graph contains a cycle
    #[error("Graph contains a cycle")]
    CycleDetected,

    /// The port types neither match nor convert
    #[error("Incompatible port types: {from} -> {to}")]
    TypeIncompatible {
        /// Source type
        from: PortType,
        /// Destination type
        to: PortType,
    },

    /// The port accepts a single edge and already has one
    #[error("Port already connected: {0}")]
    PortCardinalityViolation(PortRef),

    /// An edge between these ports already exists
    #[error("Edge already exists: {from} -> {to}")]
    EdgeAlreadyExists {
        /// Source port
        from: PortRef,
        /// Destination port
        to: PortRef,
    },

    /// Port derivation removed the edge right after it was connected
    #[error("Edge {from} -> {to} was dropped by port derivation")]
    EdgeDropped {
        /// Source port
        from: PortRef,
        /// Destination port
        to: PortRef,
    },

    /// The graph was torn down and accepts no further nodes or edges
    #[error("Graph has been torn down")]
    TornDown,

    /// Parameter not found
    #[error("Parameter not found: {0}")]
    ParameterNotFound(ParameterId),

    /// Descriptor could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ProcessError;
    use crate::node::{NodeCategory, PortDerivation};
    use parking_lot::Mutex;

    fn float_source() -> NodeType {
        NodeType::from_fn("source", "Source", NodeCategory::Input, |_| Ok(()))
            .with_output(PortSchema::output("out", "Out", PortType::Float))
    }

    fn float_relay() -> NodeType {
        NodeType::from_fn("relay", "Relay", NodeCategory::Utility, |_| Ok(()))
            .with_input(PortSchema::input("in", "In", PortType::Float))
            .with_output(PortSchema::output("out", "Out", PortType::Float))
    }

    fn string_sink() -> NodeType {
        NodeType::from_fn("sink", "Sink", NodeCategory::Output, |_| Ok(()))
            .with_input(PortSchema::input("in", "In", PortType::String))
    }

    /// One input slot per edge plus a spare
    struct Slots;

    impl NodeBehavior for Slots {
        fn process(&self, _ctx: &mut crate::evaluation::ProcessContext<'_>) -> Result<(), ProcessError> {
            Ok(())
        }

        fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
            (0..=derivation.edges.len())
                .map(|i| PortSchema::input(i.to_string(), format!("In {i}"), PortType::Float))
                .collect()
        }
    }

    /// Always derives the same identifier twice
    struct Duplicates;

    impl NodeBehavior for Duplicates {
        fn process(&self, _ctx: &mut crate::evaluation::ProcessContext<'_>) -> Result<(), ProcessError> {
            Ok(())
        }

        fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
            let count = if derivation.fields.contains_key("broken") { 2 } else { 1 };
            (0..count)
                .map(|_| PortSchema::input("same", "Same", PortType::Float))
                .collect()
        }
    }

    /// Offers an input only while nothing is connected to it
    struct Picky;

    impl NodeBehavior for Picky {
        fn process(&self, _ctx: &mut crate::evaluation::ProcessContext<'_>) -> Result<(), ProcessError> {
            Ok(())
        }

        fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
            if derivation.edges.is_empty() {
                vec![PortSchema::input("in", "In", PortType::Float)]
            } else {
                Vec::new()
            }
        }
    }

    struct Lifecycles(Arc<Mutex<Vec<&'static str>>>);

    impl NodeBehavior for Lifecycles {
        fn process(&self, _ctx: &mut crate::evaluation::ProcessContext<'_>) -> Result<(), ProcessError> {
            Ok(())
        }

        fn enable(&self, _ctx: &mut LifecycleContext<'_>) {
            self.0.lock().push("enable");
        }

        fn disable(&self, _ctx: &mut LifecycleContext<'_>) {
            self.0.lock().push("disable");
        }
    }

    fn context() -> GraphContext {
        let mut kinds = NodeRegistry::new();
        kinds.register(float_source());
        kinds.register(float_relay());
        kinds.register(string_sink());
        kinds.register(
            NodeType::new("slots", "Slots", NodeCategory::Custom, Slots).with_dynamic_inputs("inputs"),
        );
        kinds.register(
            NodeType::new("dupes", "Dupes", NodeCategory::Custom, Duplicates).with_dynamic_inputs("inputs"),
        );
        kinds.register(NodeType::new("picky", "Picky", NodeCategory::Custom, Picky).with_dynamic_inputs("inputs"));
        GraphContext::new(Arc::new(kinds), Arc::new(TypeAdapterRegistry::standard()))
    }

    fn add(graph: &mut Graph, kind: &str) -> NodeId {
        graph.add_node(NodeDescriptor::new(kind)).unwrap()
    }

    fn port(node: NodeId, port: &str) -> PortRef {
        PortRef::new(node, port)
    }

    #[test]
    fn test_add_and_remove_node() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "relay");
        graph.connect(port(a, "out"), port(b, "in")).unwrap();

        let removed = graph.remove_node(a).unwrap();
        assert_eq!(removed.id, a);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.remove_node(a).unwrap_err(), GraphError::NodeNotFound(a));
        assert!(matches!(
            graph.add_node(NodeDescriptor::new("missing")),
            Err(GraphError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_connect_validation() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "relay");
        let c = add(&mut graph, "source");

        assert!(matches!(
            graph.connect(port(a, "in"), port(b, "in")),
            Err(GraphError::PortNotFound(_))
        ));

        graph.connect(port(a, "out"), port(b, "in")).unwrap();
        assert!(matches!(
            graph.connect(port(a, "out"), port(b, "in")),
            Err(GraphError::EdgeAlreadyExists { .. })
        ));
        assert_eq!(
            graph.connect(port(c, "out"), port(b, "in")),
            Err(GraphError::PortCardinalityViolation(port(b, "in")))
        );
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "relay");
        let b = add(&mut graph, "relay");
        let c = add(&mut graph, "relay");
        graph.connect(port(a, "out"), port(b, "in")).unwrap();
        graph.connect(port(b, "out"), port(c, "in")).unwrap();
        graph.drain_events();

        let before: Vec<_> = graph.edges().map(|e| (e.from.clone(), e.to.clone())).collect();
        assert!(matches!(
            graph.connect(port(c, "out"), port(a, "in")),
            Err(GraphError::CycleRejected { .. })
        ));
        assert!(matches!(
            graph.connect(port(a, "out"), port(a, "in")),
            Err(GraphError::CycleRejected { .. })
        ));
        let after: Vec<_> = graph.edges().map(|e| (e.from.clone(), e.to.clone())).collect();
        assert_eq!(before, after);
        assert!(graph.drain_events().is_empty());
    }

    #[test]
    fn test_type_incompatible() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let sink = add(&mut graph, "sink");
        // float -> string converts with the standard adapters
        graph.connect(port(a, "out"), port(sink, "in")).unwrap();

        let registry = TypeAdapterRegistry::new();
        let mut graph = Graph::new("Strict", GraphContext::new(Arc::clone(&context().kinds), Arc::new(registry)));
        let a = add(&mut graph, "source");
        let sink = add(&mut graph, "sink");
        assert_eq!(
            graph.connect(port(a, "out"), port(sink, "in")),
            Err(GraphError::TypeIncompatible {
                from: PortType::Float,
                to: PortType::String,
            })
        );
    }

    #[test]
    fn test_order_respects_edges_and_insertion() {
        let mut graph = Graph::new("Test", context());
        let c = add(&mut graph, "relay");
        let b = add(&mut graph, "relay");
        let a = add(&mut graph, "source");
        let lone = add(&mut graph, "source");
        graph.connect(port(a, "out"), port(b, "in")).unwrap();
        graph.connect(port(b, "out"), port(c, "in")).unwrap();

        let order = graph.execution_order().unwrap();
        let index = |id| order.iter().position(|n| *n == id).unwrap();
        for edge in graph.edges() {
            assert!(index(edge.from.node) < index(edge.to.node));
        }
        // Ready nodes are taken lowest insertion index first
        assert_eq!(order, vec![a, b, c, lone]);
    }

    #[test]
    fn test_order_cache_invalidated() {
        let mut graph = Graph::new("Test", context());
        let b = add(&mut graph, "relay");
        let a = add(&mut graph, "relay");
        assert_eq!(graph.execution_order().unwrap(), vec![b, a]);

        let edge = graph.connect(port(a, "out"), port(b, "in")).unwrap();
        assert_eq!(graph.execution_order().unwrap(), vec![a, b]);

        graph.disconnect(edge).unwrap();
        assert_eq!(graph.execution_order().unwrap(), vec![b, a]);
    }

    #[test]
    fn test_dynamic_slots_grow_and_shrink() {
        let mut graph = Graph::new("Test", context());
        let slots = add(&mut graph, "slots");
        assert_eq!(graph.node(slots).unwrap().inputs().len(), 1);

        let mut edges = Vec::new();
        for n in 0..3 {
            let source = add(&mut graph, "source");
            let edge = graph
                .connect(port(source, "out"), port(slots, &n.to_string()))
                .unwrap();
            edges.push(edge);
            let node = graph.node(slots).unwrap();
            assert_eq!(node.inputs().len(), n + 2);
            assert!(node.inputs().iter().all(|p| p.dynamic));
            assert_eq!(
                node.group_state(PortDirection::Input, "inputs"),
                Some(SchemaState::Fresh)
            );
        }

        for (remaining, edge) in edges.into_iter().enumerate().rev() {
            graph.disconnect(edge).unwrap();
            assert_eq!(graph.node(slots).unwrap().inputs().len(), remaining + 1);
        }
        assert_eq!(graph.node(slots).unwrap().inputs().len(), 1);
    }

    #[test]
    fn test_disconnect_reconnect_is_idempotent() {
        let mut graph = Graph::new("Test", context());
        let slots = add(&mut graph, "slots");
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "source");
        graph.connect(port(a, "out"), port(slots, "0")).unwrap();
        let edge = graph.connect(port(b, "out"), port(slots, "1")).unwrap();

        let snapshot = |graph: &Graph| {
            let edges: Vec<_> = graph.edges().map(|e| (e.from.clone(), e.to.clone())).collect();
            let ports: Vec<_> = graph.nodes().map(|n| n.inputs().to_vec()).collect();
            (graph.node_ids().collect::<Vec<_>>(), edges, ports)
        };
        let before = snapshot(&graph);

        let removed = graph.disconnect(edge).unwrap();
        graph.connect(removed.from, removed.to).unwrap();
        assert_eq!(snapshot(&graph), before);
    }

    #[test]
    fn test_removed_dynamic_port_forces_disconnect() {
        let mut graph = Graph::new("Test", context());
        let slots = add(&mut graph, "slots");
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "source");
        let first = graph.connect(port(a, "out"), port(slots, "0")).unwrap();
        let second = graph.connect(port(b, "out"), port(slots, "1")).unwrap();

        // Removing the first edge leaves two slots; the edge on "1" survives
        graph.disconnect(first).unwrap();
        assert!(graph.edge(second).is_some());
        assert_eq!(graph.node(slots).unwrap().inputs().len(), 2);

        // Removing the source of the remaining edge collapses to one slot
        graph.remove_node(b).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node(slots).unwrap().inputs().len(), 1);
    }

    #[test]
    fn test_duplicate_derivation_rejected() {
        let mut graph = Graph::new("Test", context());
        let node = add(&mut graph, "dupes");
        assert_eq!(graph.node(node).unwrap().inputs().len(), 1);
        graph.drain_events();

        graph
            .update_node_field(node, "broken", PortValue::Bool(true))
            .unwrap();
        let node = graph.node(node).unwrap();
        assert_eq!(node.inputs().len(), 1);
        assert!(node.has_errors());
        assert!(graph
            .drain_events()
            .iter()
            .any(|e| matches!(e, GraphEvent::NodeMessage { severity: MessageSeverity::Error, .. })));
    }

    #[test]
    fn test_connect_reports_edge_dropped_by_derivation() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let picky = add(&mut graph, "picky");

        let result = graph.connect(port(a, "out"), port(picky, "in"));
        assert!(matches!(result, Err(GraphError::EdgeDropped { .. })));
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node(picky).unwrap().inputs().len(), 1);
    }

    #[test]
    fn test_edits_rejected_after_teardown() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "relay");
        graph.teardown();

        assert_eq!(
            graph.add_node(NodeDescriptor::new("source")),
            Err(GraphError::TornDown)
        );
        assert_eq!(graph.connect(port(a, "out"), port(b, "in")), Err(GraphError::TornDown));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_restore_slot_above_gap() {
        let mut graph = Graph::new("Test", context());
        let slots = add(&mut graph, "slots");
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "source");
        let first = graph.connect(port(a, "out"), port(slots, "0")).unwrap();
        graph.connect(port(b, "out"), port(slots, "1")).unwrap();
        graph.disconnect(first).unwrap();

        let loaded = Graph::from_descriptor(graph.to_descriptor(), context()).unwrap();
        assert_eq!(loaded.to_descriptor(), graph.to_descriptor());
        assert_eq!(loaded.node(slots).unwrap().inputs(), graph.node(slots).unwrap().inputs());
        assert!(loaded.edges().all(|e| e.to.port.as_str() == "1"));
    }

    #[test]
    fn test_restore_rejects_invalid_edges() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let b = add(&mut graph, "relay");
        let sink = add(&mut graph, "sink");
        graph.connect(port(a, "out"), port(b, "in")).unwrap();
        let saved = graph.to_descriptor();

        let mut missing = saved.clone();
        missing.edges[0].to = port(b, "nope");
        assert_eq!(
            Graph::from_descriptor(missing, context()).unwrap_err(),
            GraphError::PortNotFound(port(b, "nope"))
        );

        let mut crowded = saved.clone();
        crowded.edges.push(EdgeDescriptor {
            from: port(b, "out"),
            to: port(b, "in"),
        });
        assert!(matches!(
            Graph::from_descriptor(crowded, context()),
            Err(GraphError::PortCardinalityViolation(_))
        ));

        let mut strict = saved;
        strict.edges.push(EdgeDescriptor {
            from: port(b, "out"),
            to: port(sink, "in"),
        });
        let context = GraphContext::new(Arc::clone(&context().kinds), Arc::new(TypeAdapterRegistry::new()));
        assert!(matches!(
            Graph::from_descriptor(strict, context),
            Err(GraphError::TypeIncompatible { .. })
        ));
    }

    #[test]
    fn test_restore_rejects_cycle() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "relay");
        let b = add(&mut graph, "relay");
        graph.connect(port(a, "out"), port(b, "in")).unwrap();
        let mut saved = graph.to_descriptor();
        saved.edges.push(EdgeDescriptor {
            from: port(b, "out"),
            to: port(a, "in"),
        });

        assert_eq!(
            Graph::from_descriptor(saved, context()).unwrap_err(),
            GraphError::CycleDetected
        );
    }

    #[test]
    fn test_events() {
        let mut graph = Graph::new("Test", context());
        let a = add(&mut graph, "source");
        let slots = add(&mut graph, "slots");
        let edge = graph.connect(port(a, "out"), port(slots, "0")).unwrap();
        graph.disconnect(edge).unwrap();

        let events = graph.drain_events();
        assert!(events.contains(&GraphEvent::NodeAdded(a)));
        assert!(events.contains(&GraphEvent::EdgeConnected(edge)));
        assert!(events.contains(&GraphEvent::EdgeDisconnected(edge)));
        assert!(events.contains(&GraphEvent::PortSchemaChanged {
            node: slots,
            direction: PortDirection::Input,
        }));
        assert!(graph.drain_events().is_empty());
    }

    #[test]
    fn test_lifecycle_hooks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut kinds = NodeRegistry::new();
        kinds.register(NodeType::new("life", "Life", NodeCategory::Custom, Lifecycles(calls.clone())));
        let context = GraphContext::new(Arc::new(kinds), Arc::new(TypeAdapterRegistry::new()));

        let mut graph = Graph::new("Test", context);
        let a = add(&mut graph, "life");
        add(&mut graph, "life");
        assert_eq!(*calls.lock(), ["enable", "enable"]);

        graph.remove_node(a).unwrap();
        assert_eq!(calls.lock().len(), 3);

        drop(graph);
        assert_eq!(*calls.lock(), ["enable", "enable", "disable", "disable"]);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let mut graph = Graph::new("Saved", context());
        let a = add(&mut graph, "source");
        let slots = add(&mut graph, "slots");
        graph.connect(port(a, "out"), port(slots, "0")).unwrap();
        graph.add_parameter("Speed", PortValue::Float(3.0));

        let ron = graph.to_descriptor().to_ron().unwrap();
        let loaded = Graph::from_descriptor(GraphDescriptor::from_ron(&ron).unwrap(), context()).unwrap();

        assert_eq!(loaded.name, "Saved");
        assert_eq!(loaded.node_ids().collect::<Vec<_>>(), vec![a, slots]);
        assert_eq!(loaded.edge_count(), 1);
        assert_eq!(loaded.node(slots).unwrap().inputs().len(), 2);
        assert_eq!(loaded.parameters().count(), 1);
    }
}
