//! Graph compiler
//!
//! Compiles a [`Graph`] into a [`Program`]. Pure and deterministic for
//! identical normalized graph content — the supervisor's change detection
//! depends on that. Presentation-only nodes are filtered, outgoing edges
//! are grouped per (source, output), and edges whose endpoints no longer
//! exist on the live component set are dropped silently.

use crate::error::CompileError;
use crate::graph::model::{Graph, NodeKind};
use crate::graph::program::{ComponentSpec, Program, Reaction, ReactionTarget};
use crate::runtime;
use std::collections::{BTreeMap, HashMap};

/// Input names that consume the source's value; every other input is a
/// bare trigger.
pub const VALUE_ACCEPTING_INPUTS: &[&str] = &["set", "check"];

/// Compile a graph into an executable program.
pub fn compile(graph: &Graph) -> Result<Program, CompileError> {
    // Executable nodes only, keyed for edge validation.
    let mut kinds: HashMap<&str, NodeKind> = HashMap::new();
    let mut components: Vec<ComponentSpec> = Vec::new();

    for node in &graph.nodes {
        if node.kind.is_presentation() {
            continue;
        }
        if kinds.insert(&node.id, node.kind).is_some() {
            return Err(CompileError::DuplicateNode(node.id.clone()));
        }

        // Validate the payload against the kind's typed parameters now,
        // so a malformed graph never reaches a live runner.
        runtime::validate_config(&node.id, node.kind, &node.config)?;

        components.push(ComponentSpec {
            node_id: node.id.clone(),
            kind: node.kind,
            config: node.config.clone(),
        });
    }
    components.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    // Group live edges by (source, output). BTreeMap keeps the reaction
    // table deterministic.
    let mut groups: BTreeMap<(String, String), Vec<ReactionTarget>> = BTreeMap::new();
    for edge in &graph.edges {
        let (Some(&source_kind), Some(&target_kind)) =
            (kinds.get(edge.source.as_str()), kinds.get(edge.target.as_str()))
        else {
            // Stale edge: one endpoint was deleted or demoted. Drop it.
            tracing::debug!(
                "Dropping stale edge {}:{} -> {}:{}",
                edge.source,
                edge.source_output,
                edge.target,
                edge.target_input
            );
            continue;
        };

        // A handle that no longer exists after a node-type change is the
        // same stale-edge case.
        if !source_kind.outputs().contains(&edge.source_output.as_str())
            || !target_kind.inputs().contains(&edge.target_input.as_str())
        {
            tracing::debug!(
                "Dropping edge with unknown handle {}:{} -> {}:{}",
                edge.source,
                edge.source_output,
                edge.target,
                edge.target_input
            );
            continue;
        }

        let target = ReactionTarget {
            node_id: edge.target.clone(),
            input: edge.target_input.clone(),
            carries_value: VALUE_ACCEPTING_INPUTS.contains(&edge.target_input.as_str()),
        };

        groups
            .entry((edge.source.clone(), edge.source_output.clone()))
            .or_default()
            .push(target);
    }

    let reactions = groups
        .into_iter()
        .map(|((source, output), mut targets)| {
            targets.sort_by(|a, b| (&a.node_id, &a.input).cmp(&(&b.node_id, &b.input)));
            targets.dedup();
            Reaction {
                source,
                output,
                targets,
            }
        })
        .collect();

    Ok(Program {
        components,
        reactions,
        content_hash: graph.content_hash(),
        pin_footprint: graph.pin_footprint(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Edge, Node};
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

    fn interval_led_graph() -> Graph {
        Graph {
            nodes: vec![
                node("interval-1", NodeKind::Interval, json!({ "interval": 500 })),
                node("led-1", NodeKind::Led, json!({ "pin": 13 })),
            ],
            edges: vec![edge("interval-1", "change", "led-1", "toggle")],
        }
    }

    #[test]
    fn test_compile_interval_to_led() {
        let program = compile(&interval_led_graph()).unwrap();

        assert_eq!(program.components.len(), 2);
        let reaction = program.reaction("interval-1", "change").expect("wired");
        assert_eq!(reaction.targets.len(), 1);
        assert_eq!(reaction.targets[0].node_id, "led-1");
        assert_eq!(reaction.targets[0].input, "toggle");
        // `toggle` is a bare trigger, not value-accepting.
        assert!(!reaction.targets[0].carries_value);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let g = interval_led_graph();
        let mut reversed = g.clone();
        reversed.nodes.reverse();

        let a = compile(&g).unwrap();
        let b = compile(&reversed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_presentation_nodes_filtered() {
        let mut g = interval_led_graph();
        g.nodes.push(node("note-1", NodeKind::Note, json!({ "text": "hi" })));

        let program = compile(&g).unwrap();
        assert!(program.component("note-1").is_none());
        assert_eq!(program.components.len(), 2);
    }

    #[test]
    fn test_stale_edges_dropped_silently() {
        let mut g = interval_led_graph();
        // Target node vanished.
        g.edges.push(edge("interval-1", "change", "ghost", "toggle"));
        // Handle renamed away by a node-type change.
        g.edges.push(edge("interval-1", "tick", "led-1", "toggle"));
        g.edges.push(edge("interval-1", "change", "led-1", "flip"));

        let program = compile(&g).unwrap();
        assert_eq!(program.reactions.len(), 1);
        assert_eq!(program.reactions[0].targets.len(), 1);
    }

    #[test]
    fn test_value_accepting_allow_list() {
        let g = Graph {
            nodes: vec![
                node("sensor-1", NodeKind::Sensor, json!({ "pin": 0 })),
                node("smooth-1", NodeKind::Smooth, json!({ "alpha": 0.25 })),
            ],
            edges: vec![edge("sensor-1", "change", "smooth-1", "set")],
        };
        let program = compile(&g).unwrap();
        assert!(program.reaction("sensor-1", "change").unwrap().targets[0].carries_value);
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let g = Graph {
            nodes: vec![
                node("led-1", NodeKind::Led, json!({ "pin": 13 })),
                node("led-1", NodeKind::Led, json!({ "pin": 12 })),
            ],
            edges: vec![],
        };
        assert_eq!(
            compile(&g).unwrap_err(),
            CompileError::DuplicateNode("led-1".to_string())
        );
    }

    #[test]
    fn test_missing_required_param_rejected() {
        let g = Graph {
            nodes: vec![node("led-1", NodeKind::Led, json!({}))],
            edges: vec![],
        };
        assert!(matches!(
            compile(&g).unwrap_err(),
            CompileError::MissingParam { .. }
        ));
    }

    #[test]
    fn test_multiple_targets_share_a_source() {
        let g = Graph {
            nodes: vec![
                node("button-1", NodeKind::Button, json!({ "pin": 2 })),
                node("led-1", NodeKind::Led, json!({ "pin": 13 })),
                node("led-2", NodeKind::Led, json!({ "pin": 12 })),
            ],
            edges: vec![
                edge("button-1", "press", "led-2", "toggle"),
                edge("button-1", "press", "led-1", "toggle"),
            ],
        };
        let program = compile(&g).unwrap();
        let reaction = program.reaction("button-1", "press").unwrap();
        // Targets are sorted for determinism.
        assert_eq!(reaction.targets[0].node_id, "led-1");
        assert_eq!(reaction.targets[1].node_id, "led-2");
    }
}
