//! Integration tests for graph compilation
//!
//! Validates the compiler's determinism and the two change-detection
//! hashes the supervisor's restart rule is built on.

use pinflow::graph;
use pinflow::graph::model::{Edge, Graph, Node, NodeKind};
use proptest::prelude::*;
use serde_json::json;

fn node(id: &str, kind: NodeKind, config: serde_json::Value) -> Node {
    Node {
        id: id.to_string(),
        kind,
        config,
    }
}

fn edge(source: &str, output: &str, target: &str, input: &str) -> Edge {
    Edge {
        source: source.to_string(),
        source_output: output.to_string(),
        target: target.to_string(),
        target_input: input.to_string(),
    }
}

/// Scenario: `Interval(interval=500)` output `change` wired to `Led(pin=13)`
/// input `toggle` compiles into a program that, once running, flips the LED
/// at the configured cadence. Here we verify the compiled shape; the live
/// behavior is covered by the runner tests.
#[test]
fn test_interval_to_led_program_shape() {
    let g = Graph {
        nodes: vec![
            node("interval-1", NodeKind::Interval, json!({ "interval": 500 })),
            node("led-1", NodeKind::Led, json!({ "pin": 13 })),
        ],
        edges: vec![edge("interval-1", "change", "led-1", "toggle")],
    };

    let program = graph::compile(&g).unwrap();
    assert_eq!(program.components.len(), 2);

    let reaction = program.reaction("interval-1", "change").unwrap();
    assert_eq!(reaction.targets.len(), 1);
    assert_eq!(reaction.targets[0].node_id, "led-1");
    assert_eq!(reaction.targets[0].input, "toggle");
    assert!(!reaction.targets[0].carries_value);
}

#[test]
fn test_value_only_edit_preserves_pin_footprint() {
    let base = Graph {
        nodes: vec![
            node("interval-1", NodeKind::Interval, json!({ "interval": 500 })),
            node("led-1", NodeKind::Led, json!({ "pin": 13 })),
        ],
        edges: vec![edge("interval-1", "change", "led-1", "toggle")],
    };
    let mut edited = base.clone();
    edited.nodes[0].config = json!({ "interval": 900 });

    let a = graph::compile(&base).unwrap();
    let b = graph::compile(&edited).unwrap();

    // Content differs, pin footprint does not: the supervisor must rewire,
    // not restart.
    assert_ne!(a.content_hash, b.content_hash);
    assert_eq!(a.pin_footprint, b.pin_footprint);
}

#[test]
fn test_pin_edit_changes_pin_footprint() {
    let base = Graph {
        nodes: vec![node("led-1", NodeKind::Led, json!({ "pin": 13 }))],
        edges: vec![],
    };
    let mut edited = base.clone();
    edited.nodes[0].config = json!({ "pin": 12 });

    assert_ne!(
        graph::compile(&base).unwrap().pin_footprint,
        graph::compile(&edited).unwrap().pin_footprint
    );
}

#[test]
fn test_stale_edge_dropped_not_an_error() {
    let g = Graph {
        nodes: vec![node("led-1", NodeKind::Led, json!({ "pin": 13 }))],
        edges: vec![edge("deleted-node", "change", "led-1", "toggle")],
    };
    let program = graph::compile(&g).unwrap();
    assert!(program.reactions.is_empty());
}

fn arb_graph() -> impl Strategy<Value = Graph> {
    prop::collection::vec((0usize..4, 2u8..20, 10u64..5_000), 1..6).prop_map(|specs| {
        let nodes = specs
            .into_iter()
            .enumerate()
            .map(|(i, (choice, pin, interval))| {
                let kind =
                    [NodeKind::Led, NodeKind::Button, NodeKind::Interval, NodeKind::Note][choice];
                let config = match kind {
                    NodeKind::Interval => json!({ "interval": interval }),
                    NodeKind::Note => json!({ "text": "x" }),
                    _ => json!({ "pin": pin }),
                };
                Node {
                    id: format!("n{}", i),
                    kind,
                    config,
                }
            })
            .collect();
        Graph {
            nodes,
            edges: vec![],
        }
    })
}

proptest! {
    /// Compilation is a pure function of normalized content: shuffling node
    /// order never changes the compiled program or its hashes.
    #[test]
    fn prop_compile_deterministic_under_reordering(g in arb_graph()) {
        let mut reversed = g.clone();
        reversed.nodes.reverse();

        let a = graph::compile(&g).unwrap();
        let b = graph::compile(&reversed).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.content_hash, b.content_hash);
        prop_assert_eq!(a.pin_footprint, b.pin_footprint);
    }

    /// The pin footprint ignores every non-pin field.
    #[test]
    fn prop_footprint_ignores_interval_values(ms_a in 10u64..10_000, ms_b in 10u64..10_000) {
        let make = |ms: u64| Graph {
            nodes: vec![
                Node {
                    id: "i".to_string(),
                    kind: NodeKind::Interval,
                    config: json!({ "interval": ms }),
                },
                Node {
                    id: "led".to_string(),
                    kind: NodeKind::Led,
                    config: json!({ "pin": 13 }),
                },
            ],
            edges: vec![],
        };
        prop_assert_eq!(make(ms_a).pin_footprint(), make(ms_b).pin_footprint());
    }
}
