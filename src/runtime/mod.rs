//! Per-node runtime components
//!
//! Every node kind maps to a runtime component selected by a registry keyed
//! on the kind tag. A component exposes a current value, input methods, and
//! a closed event union covering everything it can do: fire a named output
//! or request a hardware side effect. Components with timing behavior own
//! their deadlines and cancel them on teardown.

pub mod control;
pub mod hardware;
pub mod runner;

use crate::error::CompileError;
use crate::graph::model::NodeKind;
use crate::graph::program::ComponentSpec;
use crate::types::{PinMode, Value};
use std::time::Instant;

pub use control::{Gate, Interval, Smooth, Trigger};
pub use hardware::{Button, Led, Sensor};

/// Everything a component can emit: logical outputs plus hardware requests.
///
/// A closed union — the runner handles every variant exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentEvent {
    /// A named output fired carrying the component's current value.
    Output { output: &'static str, value: Value },
    SetPinMode { pin: u8, mode: PinMode },
    DigitalWrite { pin: u8, on: bool },
    AnalogWrite { pin: u8, value: u16 },
    ReportAnalog { channel: u8 },
    ReportDigital { port: u8 },
}

/// A hardware report routed to a component by the runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareSignal {
    Analog { channel: u8, value: u16 },
    Digital { pin: u8, on: bool },
}

/// Context handed to component hooks.
pub struct ComponentCtx<'a> {
    pub now: Instant,
    pub events: &'a mut Vec<ComponentEvent>,
}

impl ComponentCtx<'_> {
    pub fn emit(&mut self, output: &'static str, value: Value) {
        self.events.push(ComponentEvent::Output { output, value });
    }
}

/// A live runtime component.
pub trait Component: Send {
    fn node_id(&self) -> &str;
    fn kind(&self) -> NodeKind;

    /// The component's current value.
    fn value(&self) -> &Value;

    /// Called once when the board signals readiness; pin modes and report
    /// requests go out here. Wiring never starts before this.
    fn attach(&mut self, ctx: &mut ComponentCtx);

    /// Invoke an input method. `value` is present only for value-accepting
    /// inputs; `source` identifies the firing node for variadic inputs.
    fn apply_input(
        &mut self,
        input: &str,
        value: Option<&Value>,
        source: Option<&str>,
        ctx: &mut ComponentCtx,
    );

    /// Deadline expiry for components that own timers.
    fn on_timer(&mut self, _ctx: &mut ComponentCtx) {}

    /// A hardware report routed to this component.
    fn on_signal(&mut self, _signal: HardwareSignal, _ctx: &mut ComponentCtx) {}

    /// The next timer deadline, if one is armed.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Apply a value-only configuration change in place.
    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError>;

    /// Teardown hook; timer-owning components cancel their deadlines here.
    fn detach(&mut self, _ctx: &mut ComponentCtx) {}
}

/// Current-value holder enforcing the idempotence rule: setting a
/// deep-equal value is a no-op and must not fire downstream.
#[derive(Debug, Clone)]
pub struct ValueCell {
    value: Value,
}

impl ValueCell {
    pub fn new(initial: Value) -> Self {
        Self { value: initial }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Returns true only if the value actually changed.
    pub fn set(&mut self, new: Value) -> bool {
        if self.value == new {
            return false;
        }
        self.value = new;
        true
    }
}

/// Instantiate the component for a compiled spec.
pub fn build(spec: &ComponentSpec) -> Result<Box<dyn Component>, CompileError> {
    Ok(match spec.kind {
        NodeKind::Led => Box::new(Led::new(&spec.node_id, &spec.config)?),
        NodeKind::Button => Box::new(Button::new(&spec.node_id, &spec.config)?),
        NodeKind::Sensor => Box::new(Sensor::new(&spec.node_id, &spec.config)?),
        NodeKind::Interval => Box::new(Interval::new(&spec.node_id, &spec.config)?),
        NodeKind::Trigger => Box::new(Trigger::new(&spec.node_id, &spec.config)?),
        NodeKind::Smooth => Box::new(Smooth::new(&spec.node_id, &spec.config)?),
        NodeKind::Gate => Box::new(Gate::new(&spec.node_id, &spec.config)?),
        // Presentation kinds are filtered at compile time; reaching here is
        // a compiler bug surfaced as a config error rather than a panic.
        NodeKind::Note => {
            return Err(CompileError::InvalidParam {
                node: spec.node_id.clone(),
                param: "type".to_string(),
                reason: "presentation nodes are not executable".to_string(),
            })
        }
    })
}

/// Validate a node's configuration payload without instantiating it.
pub fn validate_config(
    node_id: &str,
    kind: NodeKind,
    config: &serde_json::Value,
) -> Result<(), CompileError> {
    match kind {
        NodeKind::Led => Led::new(node_id, config).map(|_| ()),
        NodeKind::Button => Button::new(node_id, config).map(|_| ()),
        NodeKind::Sensor => Sensor::new(node_id, config).map(|_| ()),
        NodeKind::Interval => Interval::new(node_id, config).map(|_| ()),
        NodeKind::Trigger => Trigger::new(node_id, config).map(|_| ()),
        NodeKind::Smooth => Smooth::new(node_id, config).map(|_| ()),
        NodeKind::Gate => Gate::new(node_id, config).map(|_| ()),
        NodeKind::Note => Ok(()),
    }
}

// ---- config parsing helpers ----

pub(crate) fn require_u8(
    node: &str,
    config: &serde_json::Value,
    key: &str,
) -> Result<u8, CompileError> {
    let value = config.get(key).ok_or_else(|| CompileError::MissingParam {
        node: node.to_string(),
        param: key.to_string(),
    })?;
    value
        .as_u64()
        .filter(|&v| v <= u8::MAX as u64)
        .map(|v| v as u8)
        .ok_or_else(|| CompileError::InvalidParam {
            node: node.to_string(),
            param: key.to_string(),
            reason: format!("expected an integer in 0..=255, got {}", value),
        })
}

pub(crate) fn optional_u64(
    node: &str,
    config: &serde_json::Value,
    key: &str,
    default: u64,
) -> Result<u64, CompileError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| CompileError::InvalidParam {
            node: node.to_string(),
            param: key.to_string(),
            reason: format!("expected a non-negative integer, got {}", value),
        }),
    }
}

pub(crate) fn optional_f64(
    node: &str,
    config: &serde_json::Value,
    key: &str,
    default: f64,
) -> Result<f64, CompileError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| CompileError::InvalidParam {
            node: node.to_string(),
            param: key.to_string(),
            reason: format!("expected a number, got {}", value),
        }),
    }
}

pub(crate) fn optional_bool(
    node: &str,
    config: &serde_json::Value,
    key: &str,
    default: bool,
) -> Result<bool, CompileError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| CompileError::InvalidParam {
            node: node.to_string(),
            param: key.to_string(),
            reason: format!("expected a boolean, got {}", value),
        }),
    }
}

pub(crate) fn optional_str<'a>(
    node: &str,
    config: &'a serde_json::Value,
    key: &str,
    default: &'a str,
) -> Result<&'a str, CompileError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_str().ok_or_else(|| CompileError::InvalidParam {
            node: node.to_string(),
            param: key.to_string(),
            reason: format!("expected a string, got {}", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_cell_idempotence() {
        let mut cell = ValueCell::new(Value::Number(1.0));
        assert!(!cell.set(Value::Number(1.0)));
        assert!(cell.set(Value::Number(2.0)));
        assert!(!cell.set(Value::Number(2.0)));
        assert_eq!(cell.get(), &Value::Number(2.0));
    }

    #[test]
    fn test_build_from_spec() {
        let spec = ComponentSpec {
            node_id: "led-1".to_string(),
            kind: NodeKind::Led,
            config: json!({ "pin": 13 }),
        };
        let component = build(&spec).unwrap();
        assert_eq!(component.node_id(), "led-1");
        assert_eq!(component.kind(), NodeKind::Led);
    }

    #[test]
    fn test_validate_config_reports_missing_pin() {
        let err = validate_config("led-1", NodeKind::Led, &json!({})).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingParam {
                node: "led-1".to_string(),
                param: "pin".to_string(),
            }
        );
    }

    #[test]
    fn test_require_u8_range_check() {
        assert!(require_u8("n", &json!({ "pin": 300 }), "pin").is_err());
        assert_eq!(require_u8("n", &json!({ "pin": 13 }), "pin").unwrap(), 13);
    }
}
