//! Hardware components: nodes bound to a physical pin

use crate::error::CompileError;
use crate::graph::model::NodeKind;
use crate::runtime::{
    optional_bool, require_u8, Component, ComponentCtx, ComponentEvent, HardwareSignal, ValueCell,
};
use crate::types::{PinMode, Value};

/// Digital (or PWM) output pin.
///
/// Inputs: `on`, `off`, `toggle`, `set`. A numeric `set` in 0..=255 drives
/// the pin as PWM; everything else resolves to a digital level.
pub struct Led {
    id: String,
    pin: u8,
    value: ValueCell,
}

impl Led {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        Ok(Self {
            id: id.to_string(),
            pin: require_u8(id, config, "pin")?,
            value: ValueCell::new(Value::Bool(false)),
        })
    }

    fn set_level(&mut self, on: bool, ctx: &mut ComponentCtx) {
        if self.value.set(Value::Bool(on)) {
            ctx.events.push(ComponentEvent::DigitalWrite { pin: self.pin, on });
            ctx.emit("change", Value::Bool(on));
        }
    }

    fn set_brightness(&mut self, raw: f64, ctx: &mut ComponentCtx) {
        let duty = raw.clamp(0.0, 255.0).round();
        if self.value.set(Value::Number(duty)) {
            ctx.events.push(ComponentEvent::AnalogWrite {
                pin: self.pin,
                value: duty as u16,
            });
            ctx.emit("change", Value::Number(duty));
        }
    }
}

impl Component for Led {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Led
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, ctx: &mut ComponentCtx) {
        ctx.events.push(ComponentEvent::SetPinMode {
            pin: self.pin,
            mode: PinMode::DigitalOutput,
        });
        ctx.events.push(ComponentEvent::DigitalWrite {
            pin: self.pin,
            on: false,
        });
    }

    fn apply_input(
        &mut self,
        input: &str,
        value: Option<&Value>,
        _source: Option<&str>,
        ctx: &mut ComponentCtx,
    ) {
        match input {
            "on" => self.set_level(true, ctx),
            "off" => self.set_level(false, ctx),
            "toggle" => {
                let next = !self.value.get().truthy();
                self.set_level(next, ctx);
            }
            "set" => match value {
                Some(Value::Number(n)) => self.set_brightness(*n, ctx),
                Some(v) => self.set_level(v.truthy(), ctx),
                None => {}
            },
            other => tracing::debug!("{}: ignoring unknown input `{}`", self.id, other),
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let pin = require_u8(&self.id, config, "pin")?;
        if pin != self.pin {
            // Same footprint, different assignment: re-establish the mode
            // and current level on the new pin.
            self.pin = pin;
            ctx.events.push(ComponentEvent::SetPinMode {
                pin,
                mode: PinMode::DigitalOutput,
            });
            ctx.events.push(ComponentEvent::DigitalWrite {
                pin,
                on: self.value.get().truthy(),
            });
        }
        Ok(())
    }
}

/// Digital input pin with optional pull-up.
///
/// Outputs: `change` on every level change, plus `press`/`release` edges.
pub struct Button {
    id: String,
    pin: u8,
    pullup: bool,
    value: ValueCell,
}

impl Button {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        Ok(Self {
            id: id.to_string(),
            pin: require_u8(id, config, "pin")?,
            pullup: optional_bool(id, config, "pullup", false)?,
            value: ValueCell::new(Value::Bool(false)),
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl Component for Button {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Button
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, ctx: &mut ComponentCtx) {
        let mode = if self.pullup {
            PinMode::Pullup
        } else {
            PinMode::DigitalInput
        };
        ctx.events.push(ComponentEvent::SetPinMode {
            pin: self.pin,
            mode,
        });
        ctx.events.push(ComponentEvent::ReportDigital {
            port: self.pin / 8,
        });
    }

    fn apply_input(
        &mut self,
        input: &str,
        _value: Option<&Value>,
        _source: Option<&str>,
        _ctx: &mut ComponentCtx,
    ) {
        tracing::debug!("{}: ignoring unknown input `{}`", self.id, input);
    }

    fn on_signal(&mut self, signal: HardwareSignal, ctx: &mut ComponentCtx) {
        let HardwareSignal::Digital { pin, on } = signal else {
            return;
        };
        if pin != self.pin {
            return;
        }
        // With a pull-up the resting level is high; invert to "pressed".
        let pressed = if self.pullup { !on } else { on };
        if self.value.set(Value::Bool(pressed)) {
            ctx.emit("change", Value::Bool(pressed));
            if pressed {
                ctx.emit("press", Value::Bool(true));
            } else {
                ctx.emit("release", Value::Bool(false));
            }
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let pin = require_u8(&self.id, config, "pin")?;
        let pullup = optional_bool(&self.id, config, "pullup", false)?;
        if pin != self.pin || pullup != self.pullup {
            self.pin = pin;
            self.pullup = pullup;
            self.attach(ctx);
        }
        Ok(())
    }
}

/// Analog input channel.
///
/// The configured `pin` is the analog channel index (A0 = 0). Output:
/// `change` with the raw 10-bit reading.
pub struct Sensor {
    id: String,
    channel: u8,
    value: ValueCell,
}

impl Sensor {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        Ok(Self {
            id: id.to_string(),
            channel: require_u8(id, config, "pin")?,
            value: ValueCell::new(Value::Number(0.0)),
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl Component for Sensor {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sensor
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, ctx: &mut ComponentCtx) {
        ctx.events.push(ComponentEvent::ReportAnalog {
            channel: self.channel,
        });
    }

    fn apply_input(
        &mut self,
        input: &str,
        _value: Option<&Value>,
        _source: Option<&str>,
        _ctx: &mut ComponentCtx,
    ) {
        tracing::debug!("{}: ignoring unknown input `{}`", self.id, input);
    }

    fn on_signal(&mut self, signal: HardwareSignal, ctx: &mut ComponentCtx) {
        let HardwareSignal::Analog { channel, value } = signal else {
            return;
        };
        if channel != self.channel {
            return;
        }
        if self.value.set(Value::Number(value as f64)) {
            ctx.emit("change", Value::Number(value as f64));
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let channel = require_u8(&self.id, config, "pin")?;
        if channel != self.channel {
            self.channel = channel;
            self.attach(ctx);
        }
        Ok(())
    }
}
