// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node kinds.

use crate::evaluation::{ProcessContext, ProcessError};
use crate::events::MessageSeverity;
use crate::graph::ParameterId;
use crate::node::{LifecycleContext, NodeBehavior, NodeCategory, NodeRegistry, NodeType, PortDerivation};
use crate::port::{PortDirection, PortSchema, PortType, PortValue};

/// Factor applied by the `scale` node unless its field says otherwise
pub const DEFAULT_SCALE_FACTOR: f32 = 42.0;

/// Create the registry holding every built-in node kind
pub fn create_default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // ========================================================================
    // Constants
    // ========================================================================

    registry.register(constant("float", "Float", PortValue::Float(0.0)));
    registry.register(constant("string", "String", PortValue::String(String::new())));
    registry.register(constant("color", "Color", PortValue::Color([1.0, 1.0, 1.0, 1.0])));

    // ========================================================================
    // Math
    // ========================================================================

    registry.register(
        NodeType::from_fn("scale", "Scale", NodeCategory::Math, |ctx| {
            let value = ctx.input("in").and_then(PortValue::as_float).unwrap_or(0.0);
            let factor = ctx
                .field("factor")
                .and_then(PortValue::as_float)
                .unwrap_or(DEFAULT_SCALE_FACTOR);
            ctx.set_output("out", PortValue::Float(value * factor));
            Ok(())
        })
        .with_description("Multiplies the input by a factor")
        .with_input(PortSchema::input("in", "In", PortType::Float).with_default(PortValue::Float(0.0)))
        .with_output(PortSchema::output("out", "Out", PortType::Float))
        .with_field("factor", PortValue::Float(DEFAULT_SCALE_FACTOR)),
    );

    // ========================================================================
    // Dynamic ports
    // ========================================================================

    registry.register(
        NodeType::new("multi_ports", "Multi Ports", NodeCategory::Utility, MultiPorts)
            .with_description("One input slot per edge plus a spare, forwarded per outgoing edge")
            .with_dynamic_inputs("inputs")
            .with_output(PortSchema::output("outputs", "Out", PortType::Float)),
    );

    registry.register(
        NodeType::new("type_switch", "Type Switch", NodeCategory::Utility, TypeSwitch)
            .with_description("Input type follows the toggle_type field")
            .with_dynamic_inputs("input")
            .with_field("toggle_type", PortValue::Bool(false)),
    );

    registry.register(
        NodeType::new("parameter", "Parameter", NodeCategory::Input, ParameterAccess)
            .with_description("Reads or writes an exposed parameter")
            .with_dynamic_inputs("value")
            .with_dynamic_outputs("value")
            .with_field("parameter", PortValue::String(String::new()))
            .with_field("accessor", PortValue::String(ACCESSOR_GET.to_string())),
    );

    // ========================================================================
    // Output
    // ========================================================================

    registry.register(
        NodeType::from_fn("log", "Log", NodeCategory::Output, |ctx| {
            match ctx.input("in") {
                Some(PortValue::String(text)) => tracing::info!("{}", text),
                Some(other) => tracing::info!("{:?}", other),
                None => tracing::info!("(no value)"),
            }
            Ok(())
        })
        .with_description("Logs its input")
        .with_input(PortSchema::input("in", "In", PortType::String)),
    );

    registry
}

fn constant(id: &str, name: &str, value: PortValue) -> NodeType {
    let port_type = value.port_type();
    NodeType::from_fn(id, name, NodeCategory::Input, |ctx| {
        if let Some(value) = ctx.field("value").cloned() {
            ctx.set_output("out", value);
        }
        Ok(())
    })
    .with_description(format!("Constant {port_type} value"))
    .with_output(PortSchema::output("out", name, port_type))
    .with_field("value", value)
}

/// Float slots named "0".."N": one per connected edge, plus one free slot.
struct MultiPorts;

impl NodeBehavior for MultiPorts {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let values: Vec<PortValue> = ctx
            .input_ports()
            .iter()
            .flat_map(|port| ctx.inputs(port.id.as_str()).iter().flatten().cloned())
            .collect();
        if !values.is_empty() {
            ctx.set_edge_outputs("outputs", values);
        }
        Ok(())
    }

    fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
        // Keep slots up to the highest connected one so no edge loses its port
        let highest = derivation
            .edges
            .iter()
            .filter_map(|e| e.port.as_str().parse::<usize>().ok())
            .map(|index| index + 1)
            .max()
            .unwrap_or(0);
        let count = highest.max(derivation.edges.len()) + 1;

        (0..count)
            .map(|i| PortSchema::input(i.to_string(), format!("In {i}"), PortType::Float))
            .collect()
    }
}

/// Single input whose type is float when `toggle_type` is set, string otherwise
struct TypeSwitch;

impl NodeBehavior for TypeSwitch {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        if let Some(value) = ctx.input("input") {
            tracing::info!("Input: {:?}", value);
        }
        Ok(())
    }

    fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
        let port_type = match derivation.fields.get("toggle_type").and_then(PortValue::as_bool) {
            Some(true) => PortType::Float,
            _ => PortType::String,
        };
        vec![PortSchema::input("input", "In", port_type)]
    }
}

const ACCESSOR_GET: &str = "get";
const ACCESSOR_SET: &str = "set";

fn parameter_id(fields: &crate::node::Fields) -> Option<ParameterId> {
    fields
        .get("parameter")
        .and_then(PortValue::as_str)
        .and_then(ParameterId::parse)
}

fn is_setter(fields: &crate::node::Fields) -> bool {
    fields.get("accessor").and_then(PortValue::as_str) == Some(ACCESSOR_SET)
}

/// Reads (`get`) or writes (`set`) the exposed parameter named by the
/// `parameter` field. The port type follows the parameter's value type.
struct ParameterAccess;

impl NodeBehavior for ParameterAccess {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let fields = ctx.fields();
        let setter = is_setter(fields);
        let Some(parameter) = parameter_id(fields).and_then(|id| ctx.parameter(id)).cloned() else {
            let text = match ctx
                .field("parameter")
                .and_then(PortValue::as_str)
                .filter(|id| !id.is_empty())
            {
                Some(id) => format!("Parameter not found: {id}"),
                None => "Parameter not found".to_string(),
            };
            ctx.message(MessageSeverity::Error, text);
            return Ok(());
        };

        if setter {
            if let Some(value) = ctx.input("input").cloned() {
                ctx.set_parameter(parameter.id, value);
            }
        } else {
            ctx.set_output("output", parameter.value);
        }
        Ok(())
    }

    fn derive_ports(&self, _group: &str, derivation: &PortDerivation<'_>) -> Vec<PortSchema> {
        let Some(parameter) = parameter_id(derivation.fields).and_then(|id| derivation.parameter(id)) else {
            return Vec::new();
        };
        let port_type = parameter.value.port_type();
        match (derivation.direction, is_setter(derivation.fields)) {
            (PortDirection::Input, true) => vec![PortSchema::input("input", "Value", port_type)],
            (PortDirection::Output, false) => vec![PortSchema::output("output", "Value", port_type)],
            _ => Vec::new(),
        }
    }

    fn enable(&self, ctx: &mut LifecycleContext<'_>) {
        let found = parameter_id(&ctx.node.fields)
            .and_then(|id| ctx.parameter(id))
            .is_some();
        if !found {
            ctx.message(MessageSeverity::Warning, "Parameter not found");
        }
    }
}
