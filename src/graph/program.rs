//! Compiled program representation
//!
//! A [`Program`] is a typed intermediate representation executed directly by
//! the runner: one component spec per executable node plus an explicit
//! reaction table. It is self-contained — handing it a port is all the
//! runner needs — and is owned exclusively by the supervisor for the
//! lifetime of one runner.

use crate::graph::model::NodeKind;
use serde::{Deserialize, Serialize};

/// One component instantiation, keyed by node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub node_id: String,
    pub kind: NodeKind,
    pub config: serde_json::Value,
}

/// One target of a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTarget {
    pub node_id: String,
    pub input: String,
    /// Whether the source's current value travels with the invocation,
    /// or the input is a bare trigger.
    pub carries_value: bool,
}

/// All wiring for one (source node, output) pair: when that output fires,
/// every target input is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub source: String,
    pub output: String,
    pub targets: Vec<ReactionTarget>,
}

/// A compiled, self-contained program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub components: Vec<ComponentSpec>,
    pub reactions: Vec<Reaction>,
    /// Structural identity of the source graph
    pub content_hash: u64,
    /// Hash of the referenced physical pin set
    pub pin_footprint: u64,
}

impl Program {
    /// Find the reaction for a (source, output) pair, if any edge group
    /// produced one.
    pub fn reaction(&self, source: &str, output: &str) -> Option<&Reaction> {
        self.reactions
            .iter()
            .find(|r| r.source == source && r.output == output)
    }

    pub fn component(&self, node_id: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.node_id == node_id)
    }
}
