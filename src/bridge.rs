//! Runtime bridge
//!
//! The closed message protocol between a runner and the rest of the
//! application. Messages travel over bounded crossbeam channels; the
//! value stream uses `try_send` so a slow consumer drops samples instead
//! of wedging the runner.

use crate::graph::program::Program;
use crate::types::{Pin, RunnerStats, Value};
use serde::{Deserialize, Serialize};

/// Messages a runner emits while (or instead of) running its program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeMessage {
    /// Program-level readiness: the board answered the handshake and all
    /// components are attached. Distinct from board-firmware readiness.
    Ready { pins: Vec<Pin> },
    Info { message: String },
    Warn { message: String },
    Error { message: String },
    /// Construction-time failure: the program never started.
    Fail { message: String },
    /// A component's value changed. Emitted regardless of listeners so the
    /// editor can animate dangling outputs.
    NodeValue {
        node_id: String,
        output: String,
        value: Value,
    },
    Stats(RunnerStats),
    /// The runner closed its port deliberately.
    Close,
    /// The runner worker exited.
    Exit { graceful: bool },
}

/// Commands accepted by a live runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerCommand {
    /// Fire-and-forget value injection targeted at a specific node.
    ExternalValue { node_id: String, value: Value },
    /// Swap in a value-only program revision without restarting.
    Rewire(Program),
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_message_wire_format() {
        let msg = RuntimeMessage::NodeValue {
            node_id: "led-1".to_string(),
            output: "change".to_string(),
            value: Value::Bool(true),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "node-value");
        assert_eq!(json["node_id"], "led-1");
        assert_eq!(json["value"], true);
    }

    #[test]
    fn test_exit_roundtrip() {
        let msg = RuntimeMessage::Exit { graceful: true };
        let text = serde_json::to_string(&msg).unwrap();
        let back: RuntimeMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
