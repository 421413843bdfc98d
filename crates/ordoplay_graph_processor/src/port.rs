// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port schemas and the payloads that flow through them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a port, unique per node and per direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub String);

impl PortId {
    /// Create a port ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PortId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::borrow::Borrow<str> for PortId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

impl PortDirection {
    /// The other side of an edge
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// Payload type declared by a port.
///
/// Vector and matrix types are opaque to the core: they only take part in
/// type matching and in the conversions registered with the adapter registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// Matrix 4x4
    Mat4,
    /// String value
    String,
    /// User-defined opaque payload, identified by name
    Object(String),
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Vector2 => f.write_str("vector2"),
            Self::Vector3 => f.write_str("vector3"),
            Self::Vector4 => f.write_str("vector4"),
            Self::Color => f.write_str("color"),
            Self::Mat4 => f.write_str("mat4"),
            Self::String => f.write_str("string"),
            Self::Object(name) => write!(f, "object<{name}>"),
        }
    }
}

/// Value that can be stored in a port or a node field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// Matrix, column major
    Mat4([f32; 16]),
    /// String
    String(String),
    /// Opaque payload of a user-defined type
    Object {
        /// Name of the payload type, matches `PortType::Object`
        type_name: String,
        /// Payload data
        data: serde_json::Value,
    },
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::Vector2(_) => PortType::Vector2,
            Self::Vector3(_) => PortType::Vector3,
            Self::Vector4(_) => PortType::Vector4,
            Self::Color(_) => PortType::Color,
            Self::Mat4(_) => PortType::Mat4,
            Self::String(_) => PortType::String,
            Self::Object { type_name, .. } => PortType::Object(type_name.clone()),
        }
    }

    /// The value as a float, if it is one
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an integer, if it is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a bool, if it is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Schema of one port on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSchema {
    /// Identifier, unique within the node for this direction
    pub id: PortId,
    /// Display name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Declared payload type
    pub port_type: PortType,
    /// Whether more than one edge may attach to this port
    pub accept_multiple_edges: bool,
    /// Whether this port was produced by a dynamic derivation
    pub dynamic: bool,
    /// Default value used when an input is left unconnected
    pub default_value: Option<PortValue>,
    /// Whether this port is required (for inputs)
    pub required: bool,
}

impl PortSchema {
    /// Create a new input port
    pub fn input(id: impl Into<PortId>, name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: PortDirection::Input,
            port_type,
            accept_multiple_edges: false,
            dynamic: false,
            default_value: None,
            required: false,
        }
    }

    /// Create a new output port
    pub fn output(id: impl Into<PortId>, name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: PortDirection::Output,
            port_type,
            accept_multiple_edges: true, // Outputs can have multiple connections by default
            dynamic: false,
            default_value: None,
            required: false,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allow several edges on this port
    pub fn multiple(mut self) -> Self {
        self.accept_multiple_edges = true;
        self
    }

    /// Allow at most one edge on this port
    pub fn single(mut self) -> Self {
        self.accept_multiple_edges = false;
        self
    }

    pub(crate) fn into_dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}

/// Find the first identifier that appears more than once in a schema list.
pub(crate) fn duplicate_id(ports: &[PortSchema]) -> Option<&PortId> {
    let mut seen = std::collections::HashSet::with_capacity(ports.len());
    ports.iter().map(|p| &p.id).find(|id| !seen.insert(*id))
}
