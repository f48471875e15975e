//! Graph data model
//!
//! The node/edge graph as supplied by the editor, plus the two identity
//! hashes the supervisor's change detection is built on: `content_hash`
//! (did anything change at all) and `pin_footprint` (did the set of
//! physical pins change — the only edit that forces a runner restart).

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Fixed catalogue of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Led,
    Button,
    Sensor,
    Interval,
    Trigger,
    Smooth,
    Gate,
    Note,
}

impl NodeKind {
    /// Presentation-only kinds never participate in execution.
    pub fn is_presentation(self) -> bool {
        matches!(self, NodeKind::Note)
    }

    /// Input handles this kind accepts.
    pub fn inputs(self) -> &'static [&'static str] {
        match self {
            NodeKind::Led => &["on", "off", "toggle", "set"],
            NodeKind::Button => &[],
            NodeKind::Sensor => &[],
            NodeKind::Interval => &["start", "stop"],
            NodeKind::Trigger => &["set"],
            NodeKind::Smooth => &["set"],
            NodeKind::Gate => &["check"],
            NodeKind::Note => &[],
        }
    }

    /// Output handles this kind exposes.
    pub fn outputs(self) -> &'static [&'static str] {
        match self {
            NodeKind::Led => &["change"],
            NodeKind::Button => &["change", "press", "release"],
            NodeKind::Sensor => &["change"],
            NodeKind::Interval => &["change"],
            NodeKind::Trigger => &["change", "fire"],
            NodeKind::Smooth => &["change"],
            NodeKind::Gate => &["change", "pass"],
            NodeKind::Note => &[],
        }
    }

    /// Whether an input accepts any number of incoming edges.
    pub fn is_variadic_input(self, input: &str) -> bool {
        matches!(self, NodeKind::Gate if input == "check")
    }
}

/// A graph node: identity, kind tag, and the kind-specific configuration
/// payload. The payload stays as JSON here; the compiler validates it
/// against the kind's typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A typed connection between an output handle and an input handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    #[serde(rename = "sourceOutput")]
    pub source_output: String,
    pub target: String,
    #[serde(rename = "targetInput")]
    pub target_input: String,
}

/// The node set plus edge set, versioned only by structural identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Content hash over normalized nodes and edges.
    ///
    /// Node and edge order is irrelevant; two graphs with the same
    /// normalized content hash equal. Used to decide "did anything
    /// actually change" before recompiling.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        for node in nodes {
            node.id.hash(&mut hasher);
            node.kind.hash(&mut hasher);
            // serde_json maps are sorted, so the string form is canonical.
            node.config.to_string().hash(&mut hasher);
        }

        let mut edges: Vec<&Edge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            (&a.source, &a.source_output, &a.target, &a.target_input)
                .cmp(&(&b.source, &b.source_output, &b.target, &b.target_input))
        });
        for edge in edges {
            edge.source.hash(&mut hasher);
            edge.source_output.hash(&mut hasher);
            edge.target.hash(&mut hasher);
            edge.target_input.hash(&mut hasher);
        }

        hasher.finish()
    }

    /// The sorted, deduplicated set of physical pins the graph references.
    pub fn referenced_pins(&self) -> Vec<u8> {
        let pins: BTreeSet<u8> = self
            .nodes
            .iter()
            .filter(|n| !n.kind.is_presentation())
            .filter_map(|n| n.config.get("pin"))
            .filter_map(|v| v.as_u64())
            .filter(|&p| p <= u8::MAX as u64)
            .map(|p| p as u8)
            .collect();
        pins.into_iter().collect()
    }

    /// Hash of the referenced pin set.
    ///
    /// Value-only edits keep this stable; only pin-set edits change it,
    /// which is what decides whether a live runner must be restarted.
    pub fn pin_footprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.referenced_pins().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn led(id: &str, pin: u8) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Led,
            config: json!({ "pin": pin }),
        }
    }

    fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Graph {
        Graph { nodes, edges }
    }

    #[test]
    fn test_content_hash_ignores_ordering() {
        let a = graph(vec![led("a", 13), led("b", 12)], vec![]);
        let b = graph(vec![led("b", 12), led("a", 13)], vec![]);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_sees_config_changes() {
        let a = graph(vec![led("a", 13)], vec![]);
        let b = graph(vec![led("a", 12)], vec![]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_pin_footprint_stable_under_value_edits() {
        let mut interval = Node {
            id: "i".to_string(),
            kind: NodeKind::Interval,
            config: json!({ "interval": 500 }),
        };
        let a = graph(vec![led("a", 13), interval.clone()], vec![]);
        interval.config = json!({ "interval": 900 });
        let b = graph(vec![led("a", 13), interval], vec![]);

        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.pin_footprint(), b.pin_footprint());
    }

    #[test]
    fn test_pin_footprint_changes_with_pin_edits() {
        let a = graph(vec![led("a", 13)], vec![]);
        let b = graph(vec![led("a", 7)], vec![]);
        assert_ne!(a.pin_footprint(), b.pin_footprint());
    }

    #[test]
    fn test_referenced_pins_sorted_and_deduped() {
        let g = graph(vec![led("a", 13), led("b", 4), led("c", 13)], vec![]);
        assert_eq!(g.referenced_pins(), vec![4, 13]);
    }

    #[test]
    fn test_presentation_nodes_do_not_contribute_pins() {
        let note = Node {
            id: "n".to_string(),
            kind: NodeKind::Note,
            config: json!({ "pin": 9, "text": "wiring diagram" }),
        };
        let g = graph(vec![note], vec![]);
        assert!(g.referenced_pins().is_empty());
    }

    #[test]
    fn test_graph_deserializes_editor_json() {
        let g: Graph = serde_json::from_value(json!({
            "nodes": [
                { "id": "interval-1", "type": "interval", "config": { "interval": 500 } },
                { "id": "led-1", "type": "led", "config": { "pin": 13 } }
            ],
            "edges": [
                {
                    "source": "interval-1", "sourceOutput": "change",
                    "target": "led-1", "targetInput": "toggle"
                }
            ]
        }))
        .unwrap();
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges[0].target_input, "toggle");
    }
}
