// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph processing core for `OrdoPlay` Editor.
//!
//! This crate owns the graph model that the editor's visual graphs sit on:
//! - Typed input/output ports, including ports derived from the edges and
//!   fields of a node
//! - Connection validation with cycle rejection
//! - Type conversion between ports through a shared adapter registry
//! - Execution scheduling with per-node failure isolation
//! - Change notifications and a serializable descriptor form
//!
//! ## Architecture
//!
//! A [`Graph`] owns its nodes and edges in insertion order. Node kinds are
//! registered in a [`NodeRegistry`] and conversions in a
//! [`TypeAdapterRegistry`]; both are shared between graphs through a
//! [`GraphContext`]. A [`Processor`] runs one pass at a time.

pub mod adapter;
pub mod descriptor;
pub mod edge;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod kinds;
pub mod node;
pub mod port;
pub mod settings;

pub use adapter::{ConversionError, TypeAdapter, TypeAdapterRegistry};
pub use descriptor::{EdgeDescriptor, GraphDescriptor, NodeDescriptor};
pub use edge::{Edge, EdgeId, PortRef};
pub use evaluation::{ProcessContext, ProcessError, Processor, RunReport};
pub use events::{GraphEvent, MessageSeverity, NodeMessage};
pub use graph::{ExposedParameter, Graph, GraphContext, GraphError, ParameterId};
pub use node::{Node, NodeBehavior, NodeCategory, NodeId, NodeRegistry, NodeType};
pub use port::{PortDirection, PortId, PortSchema, PortType, PortValue};
pub use settings::ProcessorSettings;
