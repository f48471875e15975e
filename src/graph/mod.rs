//! Graph layer: the editor-facing data model and its compiler
//!
//! - [`model`] - Nodes, edges, content hash and pin footprint
//! - [`compiler`] - Deterministic graph → program compilation
//! - [`program`] - The typed intermediate representation the runner executes

pub mod compiler;
pub mod model;
pub mod program;

pub use compiler::compile;
pub use model::{Edge, Graph, Node, NodeKind};
pub use program::{ComponentSpec, Program, Reaction, ReactionTarget};
