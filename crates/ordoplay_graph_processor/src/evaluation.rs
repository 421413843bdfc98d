// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation and execution.
//!
//! A [`Processor`] runs every node once per pass in execution order. Values
//! travel along edges, converted where the port types differ. A node that
//! fails gets an error message, produces nothing for the pass, and its
//! consumers see the value as absent. The rest of the pass continues.

use crate::adapter::ConversionError;
use crate::events::{MessageSeverity, NodeMessage};
use crate::graph::{ExposedParameter, Graph, GraphError, ParameterId};
use crate::node::{Fields, Node, NodeBehavior, NodeId};
use crate::port::{PortId, PortSchema, PortValue};
use crate::settings::ProcessorSettings;
use indexmap::IndexMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Access a node gets while it is processed
pub struct ProcessContext<'a> {
    node: NodeId,
    fields: &'a mut Fields,
    inputs: &'a [PortSchema],
    outputs: &'a [PortSchema],
    values: IndexMap<PortId, Vec<Option<PortValue>>>,
    output_edges: IndexMap<PortId, usize>,
    produced: IndexMap<PortId, PortValue>,
    edge_outputs: IndexMap<PortId, Vec<PortValue>>,
    messages: Vec<NodeMessage>,
    parameters: &'a IndexMap<ParameterId, ExposedParameter>,
    parameter_updates: Vec<(ParameterId, PortValue)>,
}

impl<'a> ProcessContext<'a> {
    /// ID of the node being processed
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Input ports of the node, in display order
    pub fn input_ports(&self) -> &[PortSchema] {
        self.inputs
    }

    /// Output ports of the node, in display order
    pub fn output_ports(&self) -> &[PortSchema] {
        self.outputs
    }

    /// Value of an input port.
    ///
    /// Returns the first connected value, the port default when nothing is
    /// connected, and `None` when the upstream value was not produced.
    pub fn input(&self, port: &str) -> Option<&PortValue> {
        match self.values.get(port) {
            Some(values) => values.first().and_then(Option::as_ref),
            None => self
                .inputs
                .iter()
                .find(|p| p.id.as_str() == port)
                .and_then(|p| p.default_value.as_ref()),
        }
    }

    /// Values arriving at an input port, one per connected edge in
    /// connection order. `None` entries were not produced upstream.
    pub fn inputs(&self, port: &str) -> &[Option<PortValue>] {
        self.values.get(port).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether any edge is connected to the input port
    pub fn is_connected(&self, port: &str) -> bool {
        self.values.contains_key(port)
    }

    /// Whether the port is connected but received no value
    pub fn is_absent(&self, port: &str) -> bool {
        self.values
            .get(port)
            .is_some_and(|values| values.iter().all(Option::is_none))
    }

    /// Value of an input port, or a [`ProcessError::MissingInput`]
    pub fn require_input(&self, port: &str) -> Result<&PortValue, ProcessError> {
        self.input(port)
            .ok_or_else(|| ProcessError::MissingInput(PortId::new(port)))
    }

    /// Get a field value
    pub fn field(&self, name: &str) -> Option<&PortValue> {
        self.fields.get(name)
    }

    /// All field values of the node
    pub fn fields(&self) -> &Fields {
        self.fields
    }

    /// Set a field value. Fields persist across passes.
    pub fn set_field(&mut self, name: impl Into<String>, value: PortValue) {
        self.fields.insert(name.into(), value);
    }

    /// Set the value of an output port, delivered to every edge leaving it
    pub fn set_output(&mut self, port: impl Into<PortId>, value: PortValue) {
        self.produced.insert(port.into(), value);
    }

    /// Set one value per edge leaving the port, in connection order. Edges
    /// beyond the last value receive the last value.
    pub fn set_edge_outputs(&mut self, port: impl Into<PortId>, values: Vec<PortValue>) {
        self.edge_outputs.insert(port.into(), values);
    }

    /// Number of edges leaving an output port
    pub fn output_edge_count(&self, port: &str) -> usize {
        self.output_edges.get(port).copied().unwrap_or(0)
    }

    /// Attach a message to the node
    pub fn message(&mut self, severity: MessageSeverity, text: impl Into<String>) {
        self.messages.push(NodeMessage::new(severity, text));
    }

    /// Look up an exposed parameter of the graph
    pub fn parameter(&self, id: ParameterId) -> Option<&ExposedParameter> {
        self.parameters.get(&id)
    }

    /// Write an exposed parameter once the node succeeds
    pub fn set_parameter(&mut self, id: ParameterId, value: PortValue) {
        self.parameter_updates.push((id, value));
    }

    fn validate(&self) -> Result<(), ProcessError> {
        let written = self
            .produced
            .iter()
            .map(|(port, value)| (port, std::slice::from_ref(value)))
            .chain(self.edge_outputs.iter().map(|(port, values)| (port, values.as_slice())));

        for (port, values) in written {
            let Some(schema) = self.outputs.iter().find(|p| p.id == *port) else {
                return Err(ProcessError::InvalidOutput {
                    port: port.clone(),
                    reason: "no such output port".to_string(),
                });
            };
            if let Some(value) = values.iter().find(|v| v.port_type() != schema.port_type) {
                return Err(ProcessError::InvalidOutput {
                    port: port.clone(),
                    reason: format!("expected {}, got {}", schema.port_type, value.port_type()),
                });
            }
        }
        Ok(())
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Nodes whose `process` was invoked, in order
    pub processed: Vec<NodeId>,
    /// Nodes that failed, with the reason
    pub failed: Vec<(NodeId, ProcessError)>,
    /// Whether the pass stopped early
    pub cancelled: bool,
}

impl RunReport {
    /// Whether every processed node succeeded and the pass ran to the end
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// Whether the node failed during this pass
    pub fn has_failed(&self, node: NodeId) -> bool {
        self.failed.iter().any(|(id, _)| *id == node)
    }
}

/// Runs graphs
#[derive(Debug, Clone, Default)]
pub struct Processor {
    settings: ProcessorSettings,
}

impl Processor {
    /// Create a processor with the given settings
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }

    /// Current settings
    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Run one full pass over the graph
    pub fn run(&self, graph: &mut Graph) -> Result<RunReport, GraphError> {
        self.run_until(graph, |_| true)
    }

    /// Run one pass, consulting `should_continue` before each node. The pass
    /// stops at the first node for which it returns `false`.
    pub fn run_until<F>(&self, graph: &mut Graph, mut should_continue: F) -> Result<RunReport, GraphError>
    where
        F: FnMut(NodeId) -> bool,
    {
        let order = graph.execution_order()?;
        let kinds = Arc::clone(&graph.context().kinds);
        graph.set_message_limit(self.settings.max_messages_per_node);

        for edge in graph.edges.values_mut() {
            edge.buffer = None;
        }
        for node in graph.nodes.values_mut() {
            node.produced.clear();
        }

        let mut report = RunReport::default();
        for node_id in order {
            if !should_continue(node_id) {
                tracing::debug!("Pass over '{}' cancelled before node {}", graph.name, node_id);
                report.cancelled = true;
                break;
            }

            let Some(node) = graph.nodes.get(&node_id) else {
                continue;
            };
            let Some(node_type) = kinds.get(&node.node_type) else {
                let text = format!("Unknown node type '{}'", node.node_type);
                graph.post_message(node_id, NodeMessage::new(MessageSeverity::Error, text));
                continue;
            };
            let behavior = node_type.behavior();

            if self.settings.clear_messages_each_pass {
                graph.clear_messages(node_id);
            }
            match self.process_node(graph, node_id, behavior.as_ref()) {
                Ok(()) => {}
                Err(error) => {
                    tracing::error!("Node {} failed: {}", node_id, error);
                    graph.post_message(
                        node_id,
                        NodeMessage::new(MessageSeverity::Error, format!("Processing failed: {error}")),
                    );
                    report.failed.push((node_id, error));
                }
            }
            report.processed.push(node_id);
        }

        Ok(report)
    }

    fn process_node(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        behavior: &dyn NodeBehavior,
    ) -> Result<(), ProcessError> {
        let (values, warnings) = gather_inputs(graph, node_id);
        for text in warnings {
            graph.post_message(node_id, NodeMessage::new(MessageSeverity::Warning, text));
        }

        let mut output_edges: IndexMap<PortId, usize> = IndexMap::new();
        for edge in graph.edges.values().filter(|e| e.from.node == node_id) {
            *output_edges.entry(edge.from.port.clone()).or_default() += 1;
        }

        let Some(node) = graph.nodes.get_mut(&node_id) else {
            return Ok(());
        };
        let Node {
            fields,
            inputs,
            outputs,
            ..
        } = node;
        let mut ctx = ProcessContext {
            node: node_id,
            fields,
            inputs: inputs.as_slice(),
            outputs: outputs.as_slice(),
            values,
            output_edges,
            produced: IndexMap::new(),
            edge_outputs: IndexMap::new(),
            messages: Vec::new(),
            parameters: &graph.parameters,
            parameter_updates: Vec::new(),
        };

        let mut result = self.invoke(behavior, &mut ctx);
        if result.is_ok() && self.settings.validate_outputs {
            result = ctx.validate();
        }
        let ProcessContext {
            produced,
            edge_outputs,
            messages,
            parameter_updates,
            ..
        } = ctx;

        for message in messages {
            graph.post_message(node_id, message);
        }
        result?;

        push_outputs(graph, node_id, &produced, &edge_outputs);
        if let Some(node) = graph.nodes.get_mut(&node_id) {
            node.produced = produced;
        }
        for (id, value) in parameter_updates {
            if let Err(error) = graph.set_parameter_value(id, value) {
                graph.post_message(
                    node_id,
                    NodeMessage::new(MessageSeverity::Warning, format!("Parameter not updated: {error}")),
                );
            }
        }
        Ok(())
    }

    fn invoke(&self, behavior: &dyn NodeBehavior, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        if !self.settings.catch_panics {
            return behavior.process(ctx);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| behavior.process(ctx))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ProcessError::Panicked(message))
            }
        }
    }
}

/// Collect the values arriving at each input port of a node, applying edge
/// conversions. Conversion failures become absent values plus a warning.
fn gather_inputs(graph: &Graph, node_id: NodeId) -> (IndexMap<PortId, Vec<Option<PortValue>>>, Vec<String>) {
    let mut values: IndexMap<PortId, Vec<Option<PortValue>>> = IndexMap::new();
    let mut warnings = Vec::new();

    for edge in graph.edges.values().filter(|e| e.to.node == node_id) {
        let value = match (&edge.buffer, &edge.converter) {
            (None, _) => None,
            (Some(value), None) => Some(value.clone()),
            (Some(value), Some(converter)) => match converter.apply(value) {
                Ok(converted) => Some(converted),
                Err(error) => {
                    warnings.push(format!("Conversion on {} -> {} failed: {error}", edge.from, edge.to));
                    None
                }
            },
        };
        values.entry(edge.to.port.clone()).or_default().push(value);
    }

    (values, warnings)
}

/// Fill the in-flight slots of the edges leaving a node
fn push_outputs(
    graph: &mut Graph,
    node_id: NodeId,
    produced: &IndexMap<PortId, PortValue>,
    edge_outputs: &IndexMap<PortId, Vec<PortValue>>,
) {
    let mut seen: IndexMap<PortId, usize> = IndexMap::new();
    for edge in graph.edges.values_mut().filter(|e| e.from.node == node_id) {
        let index = seen.entry(edge.from.port.clone()).or_default();
        edge.buffer = match edge_outputs.get(&edge.from.port) {
            Some(values) => values.get((*index).min(values.len().saturating_sub(1))).cloned(),
            None => produced.get(&edge.from.port).cloned(),
        };
        *index += 1;
    }
}

/// Error raised by a node while processing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// The node reported a failure
    #[error("{0}")]
    Failed(String),

    /// A required input had no value
    #[error("Missing required input: {0}")]
    MissingInput(PortId),

    /// The node wrote an output the schema does not allow
    #[error("Invalid output on port {port}: {reason}")]
    InvalidOutput {
        /// Offending port
        port: PortId,
        /// What was wrong
        reason: String,
    },

    /// The node panicked
    #[error("Node panicked: {0}")]
    Panicked(String),

    /// A conversion inside the node failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl ProcessError {
    /// Create a failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
