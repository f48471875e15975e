//! Core data types for pinflow
//!
//! This module contains the fundamental data structures shared across the
//! board layer, the graph compiler and the runtime.
//!
//! # Main Types
//!
//! - [`Pin`] / [`PinMode`] - Physical pin descriptions reported by a probed board
//! - [`Value`] - A node's current value as seen by the editor
//! - [`ProbeOutcome`] - Terminal result of probing one (board, port) pair
//! - [`ConnectionStatus`] - Coarse supervisor state surfaced to the editor
//! - [`RunnerStats`] - Counters reported periodically by a live runner

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capability mode a physical pin supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    DigitalInput,
    DigitalOutput,
    Analog,
    Pwm,
    Servo,
    Shift,
    I2c,
    OneWire,
    Stepper,
    Encoder,
    Serial,
    Pullup,
    /// Mode id we do not recognize; preserved for display.
    Unknown(u8),
}

impl PinMode {
    /// Map a Firmata capability mode id to a `PinMode`.
    pub fn from_firmata(mode: u8) -> Self {
        match mode {
            0x00 => PinMode::DigitalInput,
            0x01 => PinMode::DigitalOutput,
            0x02 => PinMode::Analog,
            0x03 => PinMode::Pwm,
            0x04 => PinMode::Servo,
            0x05 => PinMode::Shift,
            0x06 => PinMode::I2c,
            0x07 => PinMode::OneWire,
            0x08 => PinMode::Stepper,
            0x09 => PinMode::Encoder,
            0x0A => PinMode::Serial,
            0x0B => PinMode::Pullup,
            other => PinMode::Unknown(other),
        }
    }

    /// Map back to the Firmata mode id for `SET_PIN_MODE`.
    pub fn to_firmata(self) -> u8 {
        match self {
            PinMode::DigitalInput => 0x00,
            PinMode::DigitalOutput => 0x01,
            PinMode::Analog => 0x02,
            PinMode::Pwm => 0x03,
            PinMode::Servo => 0x04,
            PinMode::Shift => 0x05,
            PinMode::I2c => 0x06,
            PinMode::OneWire => 0x07,
            PinMode::Stepper => 0x08,
            PinMode::Encoder => 0x09,
            PinMode::Serial => 0x0A,
            PinMode::Pullup => 0x0B,
            PinMode::Unknown(other) => other,
        }
    }
}

/// A physical pin as reported by the board's capability response.
///
/// The pin set attached to a `ready` probe result is the single source of
/// truth the pin-selection UI relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    /// Physical pin number
    pub number: u8,
    /// Capability modes this pin supports
    pub modes: Vec<PinMode>,
    /// Analog channel index, if the pin is analog-capable
    pub analog_channel: Option<u8>,
}

impl Pin {
    pub fn supports(&self, mode: PinMode) -> bool {
        self.modes.contains(&mode)
    }
}

/// A node's current value.
///
/// Equality is deep equality; setting a component to an equal value is a
/// no-op and produces no downstream firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Loose truthiness used by gate inputs: false, 0 and "" are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Terminal result of probing one (board, port) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Board is running the expected firmware; carries the full pin set.
    Ready(Vec<Pin>),
    /// Board is present but does not speak the expected protocol.
    NeedsFlash,
    /// Port could not be acquired or the worker produced no terminal state.
    Unreachable,
    /// The port vanished mid-probe.
    Disconnected,
}

/// Coarse connection state surfaced to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Idle,
    Scanning,
    Connecting,
    Flashing,
    Starting,
    Running,
    Reconfiguring,
    Disconnected,
    Error,
}

/// Counters reported periodically by a live runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerStats {
    /// Node value changes emitted to the bridge
    pub values_emitted: u64,
    /// Reactions dispatched between components
    pub reactions_fired: u64,
    /// Bridge messages dropped because the event channel was full
    pub dropped_messages: u64,
    /// Time since the runner entered its running phase
    #[serde(with = "duration_millis")]
    pub uptime: Duration,
}

/// Serialize durations as integer milliseconds for the editor bridge.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_mode_roundtrip() {
        for id in 0u8..=0x0B {
            assert_eq!(PinMode::from_firmata(id).to_firmata(), id);
        }
        assert_eq!(PinMode::from_firmata(0x42), PinMode::Unknown(0x42));
    }

    #[test]
    fn test_pin_supports() {
        let pin = Pin {
            number: 13,
            modes: vec![PinMode::DigitalInput, PinMode::DigitalOutput],
            analog_channel: None,
        };
        assert!(pin.supports(PinMode::DigitalOutput));
        assert!(!pin.supports(PinMode::Pwm));
    }

    #[test]
    fn test_value_deep_equality() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::Bool(true));
        assert_eq!(Value::Text("on".into()), Value::from("on"));
    }

    #[test]
    fn test_value_truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(Value::Number(0.5).truthy());
        assert!(!Value::Text(String::new()).truthy());
    }

    #[test]
    fn test_value_untagged_serde() {
        let v: Value = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, Value::Number(3.5));
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        assert_eq!(serde_json::to_string(&Value::from("x")).unwrap(), "\"x\"");
    }
}
