//! Control components: timing, filtering and logic nodes
//!
//! These own their timers (as deadlines the runner polls) and must cancel
//! them on teardown.

use crate::error::CompileError;
use crate::graph::model::NodeKind;
use crate::runtime::{
    optional_f64, optional_str, optional_u64, Component, ComponentCtx, ValueCell,
};
use crate::types::Value;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Floor for periodic emitters; shorter intervals saturate the serial loop.
pub const MIN_INTERVAL_MS: u64 = 10;

/// Periodic emitter.
///
/// Fires `change` with an incrementing count. Reschedules from the previous
/// deadline (wall-clock deltas), not from "now", so the cadence does not
/// drift with processing time.
pub struct Interval {
    id: String,
    interval: Duration,
    running: bool,
    next_due: Option<Instant>,
    count: u64,
    value: ValueCell,
}

impl Interval {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        let interval_ms = optional_u64(id, config, "interval", 1_000)?.max(MIN_INTERVAL_MS);
        Ok(Self {
            id: id.to_string(),
            interval: Duration::from_millis(interval_ms),
            running: false,
            next_due: None,
            count: 0,
            value: ValueCell::new(Value::Number(0.0)),
        })
    }
}

impl Component for Interval {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Interval
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, ctx: &mut ComponentCtx) {
        self.running = true;
        self.next_due = Some(ctx.now + self.interval);
    }

    fn apply_input(
        &mut self,
        input: &str,
        _value: Option<&Value>,
        _source: Option<&str>,
        ctx: &mut ComponentCtx,
    ) {
        match input {
            "start" => {
                if !self.running {
                    self.running = true;
                    self.next_due = Some(ctx.now + self.interval);
                }
            }
            "stop" => {
                self.running = false;
                self.next_due = None;
            }
            other => tracing::debug!("{}: ignoring unknown input `{}`", self.id, other),
        }
    }

    fn on_timer(&mut self, ctx: &mut ComponentCtx) {
        if !self.running {
            return;
        }
        self.count += 1;
        let value = Value::Number(self.count as f64);
        self.value.set(value.clone());
        ctx.emit("change", value);

        // Advance from the missed deadline, skipping any backlog so a
        // stalled loop does not burst-fire.
        if let Some(due) = self.next_due {
            let mut next = due + self.interval;
            while next <= ctx.now {
                next += self.interval;
            }
            self.next_due = Some(next);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.next_due
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let interval_ms = optional_u64(&self.id, config, "interval", 1_000)?.max(MIN_INTERVAL_MS);
        let interval = Duration::from_millis(interval_ms);
        if interval != self.interval {
            self.interval = interval;
            if self.running {
                self.next_due = Some(ctx.now + interval);
            }
        }
        Ok(())
    }

    fn detach(&mut self, _ctx: &mut ComponentCtx) {
        self.running = false;
        self.next_due = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerDirection {
    Increasing,
    Decreasing,
}

/// Threshold-movement detector.
///
/// Keeps a sliding time-window history of recent values and fires `fire`
/// when the value has moved in the configured direction by at least the
/// configured absolute (or relative) threshold since the oldest sample
/// still within the window. Does not re-fire until the direction reverses.
pub struct Trigger {
    id: String,
    direction: TriggerDirection,
    threshold: f64,
    relative: bool,
    window: Duration,
    history: VecDeque<(Instant, f64)>,
    armed: bool,
    last_sample: Option<f64>,
    value: ValueCell,
}

impl Trigger {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        let direction = match optional_str(id, config, "behaviour", "increasing")? {
            "increasing" => TriggerDirection::Increasing,
            "decreasing" => TriggerDirection::Decreasing,
            other => {
                return Err(CompileError::InvalidParam {
                    node: id.to_string(),
                    param: "behaviour".to_string(),
                    reason: format!("expected `increasing` or `decreasing`, got `{}`", other),
                })
            }
        };
        Ok(Self {
            id: id.to_string(),
            direction,
            threshold: optional_f64(id, config, "threshold", 1.0)?,
            relative: optional_str(id, config, "mode", "absolute")? == "relative",
            window: Duration::from_millis(optional_u64(id, config, "within", 250)?),
            history: VecDeque::new(),
            armed: true,
            last_sample: None,
            value: ValueCell::new(Value::Number(0.0)),
        })
    }

    fn movement_meets_threshold(&self, delta: f64, oldest: f64) -> bool {
        let magnitude = if self.relative {
            if oldest == 0.0 {
                return false;
            }
            delta / oldest.abs()
        } else {
            delta
        };
        match self.direction {
            TriggerDirection::Increasing => magnitude >= self.threshold,
            TriggerDirection::Decreasing => magnitude <= -self.threshold,
        }
    }
}

impl Component for Trigger {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Trigger
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, _ctx: &mut ComponentCtx) {}

    fn apply_input(
        &mut self,
        input: &str,
        value: Option<&Value>,
        _source: Option<&str>,
        ctx: &mut ComponentCtx,
    ) {
        if input != "set" {
            tracing::debug!("{}: ignoring unknown input `{}`", self.id, input);
            return;
        }
        let Some(sample) = value.and_then(Value::as_f64) else {
            return;
        };
        let now = ctx.now;

        // Drop samples that fell out of the window.
        while let Some(&(t, _)) = self.history.front() {
            if t + self.window < now {
                self.history.pop_front();
            } else {
                break;
            }
        }

        // A move against the configured direction re-arms the trigger.
        if let Some(prev) = self.last_sample {
            if !self.armed {
                let reversed = match self.direction {
                    TriggerDirection::Increasing => sample < prev,
                    TriggerDirection::Decreasing => sample > prev,
                };
                if reversed {
                    self.armed = true;
                }
            }
        }
        self.last_sample = Some(sample);
        self.history.push_back((now, sample));

        if self.value.set(Value::Number(sample)) {
            ctx.emit("change", Value::Number(sample));
        }

        if self.armed {
            let oldest = self.history.front().map(|&(_, v)| v).unwrap_or(sample);
            if self.movement_meets_threshold(sample - oldest, oldest) {
                self.armed = false;
                ctx.emit("fire", Value::Number(sample));
            }
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        _ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let fresh = Trigger::new(&self.id, config)?;
        self.direction = fresh.direction;
        self.threshold = fresh.threshold;
        self.relative = fresh.relative;
        self.window = fresh.window;
        Ok(())
    }
}

enum SmoothMode {
    Exponential { alpha: f64, state: Option<f64> },
    MovingAverage { window: usize, samples: VecDeque<f64> },
}

/// Smoothing filter: exponential smoothing or fixed-size moving average,
/// selectable per node.
pub struct Smooth {
    id: String,
    mode: SmoothMode,
    value: ValueCell,
}

impl Smooth {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        let mode = match optional_str(id, config, "mode", "exponential")? {
            "exponential" => {
                let alpha = optional_f64(id, config, "alpha", 0.5)?;
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(CompileError::InvalidParam {
                        node: id.to_string(),
                        param: "alpha".to_string(),
                        reason: format!("expected 0.0..=1.0, got {}", alpha),
                    });
                }
                SmoothMode::Exponential { alpha, state: None }
            }
            "moving-average" => {
                let window = optional_u64(id, config, "window", 5)?.max(1) as usize;
                SmoothMode::MovingAverage {
                    window,
                    samples: VecDeque::new(),
                }
            }
            other => {
                return Err(CompileError::InvalidParam {
                    node: id.to_string(),
                    param: "mode".to_string(),
                    reason: format!("expected `exponential` or `moving-average`, got `{}`", other),
                })
            }
        };
        Ok(Self {
            id: id.to_string(),
            mode,
            value: ValueCell::new(Value::Number(0.0)),
        })
    }

    fn smooth(&mut self, input: f64) -> f64 {
        match &mut self.mode {
            SmoothMode::Exponential { alpha, state } => {
                let next = match *state {
                    Some(prev) => *alpha * input + (1.0 - *alpha) * prev,
                    None => input,
                };
                *state = Some(next);
                next
            }
            SmoothMode::MovingAverage { window, samples } => {
                samples.push_back(input);
                while samples.len() > *window {
                    samples.pop_front();
                }
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        }
    }
}

impl Component for Smooth {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Smooth
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, _ctx: &mut ComponentCtx) {}

    fn apply_input(
        &mut self,
        input: &str,
        value: Option<&Value>,
        _source: Option<&str>,
        ctx: &mut ComponentCtx,
    ) {
        if input != "set" {
            tracing::debug!("{}: ignoring unknown input `{}`", self.id, input);
            return;
        }
        let Some(sample) = value.and_then(Value::as_f64) else {
            return;
        };
        let smoothed = self.smooth(sample);
        if self.value.set(Value::Number(smoothed)) {
            ctx.emit("change", Value::Number(smoothed));
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        _ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let fresh = Smooth::new(&self.id, config)?;
        self.mode = fresh.mode;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateOp {
    And,
    Or,
}

/// Logic gate with variadic `check` inputs.
///
/// Each upstream source keeps its latest truthiness; the gate's value is
/// the operator folded over all seen sources. `pass` fires on the rising
/// edge of the result.
pub struct Gate {
    id: String,
    op: GateOp,
    seen: BTreeMap<String, bool>,
    value: ValueCell,
}

impl Gate {
    pub fn new(id: &str, config: &serde_json::Value) -> Result<Self, CompileError> {
        let op = match optional_str(id, config, "op", "and")? {
            "and" => GateOp::And,
            "or" => GateOp::Or,
            other => {
                return Err(CompileError::InvalidParam {
                    node: id.to_string(),
                    param: "op".to_string(),
                    reason: format!("expected `and` or `or`, got `{}`", other),
                })
            }
        };
        Ok(Self {
            id: id.to_string(),
            op,
            seen: BTreeMap::new(),
            value: ValueCell::new(Value::Bool(false)),
        })
    }

    fn evaluate(&self) -> bool {
        if self.seen.is_empty() {
            return false;
        }
        match self.op {
            GateOp::And => self.seen.values().all(|&v| v),
            GateOp::Or => self.seen.values().any(|&v| v),
        }
    }
}

impl Component for Gate {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Gate
    }

    fn value(&self) -> &Value {
        self.value.get()
    }

    fn attach(&mut self, _ctx: &mut ComponentCtx) {}

    fn apply_input(
        &mut self,
        input: &str,
        value: Option<&Value>,
        source: Option<&str>,
        ctx: &mut ComponentCtx,
    ) {
        if input != "check" {
            tracing::debug!("{}: ignoring unknown input `{}`", self.id, input);
            return;
        }
        let truthy = value.map(Value::truthy).unwrap_or(true);
        let key = source.unwrap_or("external").to_string();
        self.seen.insert(key, truthy);

        let result = self.evaluate();
        if self.value.set(Value::Bool(result)) {
            ctx.emit("change", Value::Bool(result));
            if result {
                ctx.emit("pass", Value::Bool(true));
            }
        }
    }

    fn reconfigure(
        &mut self,
        config: &serde_json::Value,
        _ctx: &mut ComponentCtx,
    ) -> Result<(), CompileError> {
        let fresh = Gate::new(&self.id, config)?;
        self.op = fresh.op;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_at<'a>(now: Instant, events: &'a mut Vec<crate::runtime::ComponentEvent>) -> ComponentCtx<'a> {
        ComponentCtx { now, events }
    }

    fn fired(events: &[crate::runtime::ComponentEvent], name: &str) -> usize {
        events
            .iter()
            .filter(|e| {
                matches!(e, crate::runtime::ComponentEvent::Output { output, .. } if *output == name)
            })
            .count()
    }

    #[test]
    fn test_interval_clamps_to_floor() {
        let interval = Interval::new("i", &json!({ "interval": 1 })).unwrap();
        assert_eq!(interval.interval, Duration::from_millis(MIN_INTERVAL_MS));
    }

    #[test]
    fn test_interval_reschedules_without_drift() {
        let mut interval = Interval::new("i", &json!({ "interval": 100 })).unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();

        interval.attach(&mut ctx_at(t0, &mut events));
        let due1 = interval.next_deadline().unwrap();
        assert_eq!(due1, t0 + Duration::from_millis(100));

        // The loop services the timer 30ms late; the next deadline still
        // lands on the original grid.
        interval.on_timer(&mut ctx_at(due1 + Duration::from_millis(30), &mut events));
        assert_eq!(
            interval.next_deadline().unwrap(),
            t0 + Duration::from_millis(200)
        );
        assert_eq!(fired(&events, "change"), 1);
    }

    #[test]
    fn test_interval_skips_backlog_after_stall() {
        let mut interval = Interval::new("i", &json!({ "interval": 100 })).unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();
        interval.attach(&mut ctx_at(t0, &mut events));

        // Serviced 450ms late: one fire, no burst; next on the grid.
        interval.on_timer(&mut ctx_at(t0 + Duration::from_millis(550), &mut events));
        assert_eq!(fired(&events, "change"), 1);
        assert_eq!(
            interval.next_deadline().unwrap(),
            t0 + Duration::from_millis(600)
        );
    }

    #[test]
    fn test_interval_stop_cancels_timer() {
        let mut interval = Interval::new("i", &json!({})).unwrap();
        let mut events = Vec::new();
        let t0 = Instant::now();
        interval.attach(&mut ctx_at(t0, &mut events));
        assert!(interval.next_deadline().is_some());

        interval.apply_input("stop", None, None, &mut ctx_at(t0, &mut events));
        assert!(interval.next_deadline().is_none());
    }

    #[test]
    fn test_trigger_scenario() {
        // Trigger(behaviour=increasing, threshold=5, within=250ms) fed
        // [0 at t0, 3 at t0+100, 6 at t0+150] fires once at the third
        // sample, and not again for 6.1 at t0+151.
        let mut trigger = Trigger::new(
            "t",
            &json!({ "behaviour": "increasing", "threshold": 5, "within": 250 }),
        )
        .unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();

        let feed = |trigger: &mut Trigger, events: &mut Vec<_>, ms: u64, v: f64| {
            trigger.apply_input(
                "set",
                Some(&Value::Number(v)),
                None,
                &mut ctx_at(t0 + Duration::from_millis(ms), events),
            );
        };

        feed(&mut trigger, &mut events, 0, 0.0);
        feed(&mut trigger, &mut events, 100, 3.0);
        assert_eq!(fired(&events, "fire"), 0);

        feed(&mut trigger, &mut events, 150, 6.0);
        assert_eq!(fired(&events, "fire"), 1);

        // Direction unchanged, already fired: no re-fire.
        feed(&mut trigger, &mut events, 151, 6.1);
        assert_eq!(fired(&events, "fire"), 1);
    }

    #[test]
    fn test_trigger_rearms_on_direction_reversal() {
        let mut trigger = Trigger::new(
            "t",
            &json!({ "behaviour": "increasing", "threshold": 5, "within": 10_000 }),
        )
        .unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();

        let feed = |trigger: &mut Trigger, events: &mut Vec<_>, ms: u64, v: f64| {
            trigger.apply_input(
                "set",
                Some(&Value::Number(v)),
                None,
                &mut ctx_at(t0 + Duration::from_millis(ms), events),
            );
        };

        feed(&mut trigger, &mut events, 0, 0.0);
        feed(&mut trigger, &mut events, 10, 6.0); // fires
        assert_eq!(fired(&events, "fire"), 1);

        feed(&mut trigger, &mut events, 20, 2.0); // reversal: re-arms
        feed(&mut trigger, &mut events, 30, 9.0); // 9 - 0 >= 5: fires again
        assert_eq!(fired(&events, "fire"), 2);
    }

    #[test]
    fn test_trigger_window_expiry_prevents_slow_drift_firing() {
        let mut trigger = Trigger::new(
            "t",
            &json!({ "behaviour": "increasing", "threshold": 5, "within": 100 }),
        )
        .unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();

        // Climbs 2 per 80ms: each comparison sees only the last sample or
        // two, never a 5-point delta inside 100ms.
        for (i, v) in [(0u64, 0.0), (80, 2.0), (160, 4.0), (240, 6.0), (320, 8.0)] {
            trigger.apply_input(
                "set",
                Some(&Value::Number(v)),
                None,
                &mut ctx_at(t0 + Duration::from_millis(i), &mut events),
            );
        }
        assert_eq!(fired(&events, "fire"), 0);
    }

    #[test]
    fn test_smooth_exponential() {
        let mut smooth = Smooth::new("s", &json!({ "alpha": 0.5 })).unwrap();
        let mut events = Vec::new();
        let t0 = Instant::now();

        smooth.apply_input("set", Some(&Value::Number(10.0)), None, &mut ctx_at(t0, &mut events));
        assert_eq!(smooth.value(), &Value::Number(10.0)); // seeded

        smooth.apply_input("set", Some(&Value::Number(20.0)), None, &mut ctx_at(t0, &mut events));
        assert_eq!(smooth.value(), &Value::Number(15.0)); // 0.5*20 + 0.5*10
    }

    #[test]
    fn test_smooth_moving_average_window() {
        let mut smooth =
            Smooth::new("s", &json!({ "mode": "moving-average", "window": 2 })).unwrap();
        let mut events = Vec::new();
        let t0 = Instant::now();

        for v in [10.0, 20.0, 40.0] {
            smooth.apply_input("set", Some(&Value::Number(v)), None, &mut ctx_at(t0, &mut events));
        }
        // Window holds [20, 40].
        assert_eq!(smooth.value(), &Value::Number(30.0));
    }

    #[test]
    fn test_gate_and_over_sources() {
        let mut gate = Gate::new("g", &json!({ "op": "and" })).unwrap();
        let t0 = Instant::now();
        let mut events = Vec::new();

        gate.apply_input(
            "check",
            Some(&Value::Bool(true)),
            Some("a"),
            &mut ctx_at(t0, &mut events),
        );
        assert_eq!(fired(&events, "pass"), 1);

        gate.apply_input(
            "check",
            Some(&Value::Bool(false)),
            Some("b"),
            &mut ctx_at(t0, &mut events),
        );
        assert_eq!(gate.value(), &Value::Bool(false));

        gate.apply_input(
            "check",
            Some(&Value::Bool(true)),
            Some("b"),
            &mut ctx_at(t0, &mut events),
        );
        assert_eq!(fired(&events, "pass"), 2);
    }
}
