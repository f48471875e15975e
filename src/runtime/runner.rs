//! Runner worker
//!
//! Executes a compiled [`Program`] against a board: owns the serial link
//! exclusively, gates component wiring on board readiness, dispatches
//! reactions, services component timers, and streams [`RuntimeMessage`]s
//! out. At most one runner exists per application instance; the supervisor
//! enforces that and the grace period after teardown.

use crate::board::firmata;
use crate::board::link::BoardLink;
use crate::board::probe::{firmata_handshake, HandshakeOutcome};
use crate::bridge::{RunnerCommand, RuntimeMessage};
use crate::config::RunnerConfig;
use crate::graph::model::NodeKind;
use crate::graph::program::Program;
use crate::runtime::{self, Component, ComponentCtx, ComponentEvent, HardwareSignal};
use crate::types::{RunnerStats, Value};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Reactions dispatched per pump before the cascade is cut off. Guards
/// against cyclic graphs re-firing forever within one event.
const CASCADE_BUDGET: usize = 1_000;

/// Handle to a live runner worker.
pub struct RunnerHandle {
    commands: Sender<RunnerCommand>,
    pub messages: Receiver<RuntimeMessage>,
    join: Option<JoinHandle<()>>,
    port: String,
}

impl RunnerHandle {
    pub fn send(&self, command: RunnerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn external_value(&self, node_id: &str, value: Value) {
        let _ = self.commands.send(RunnerCommand::ExternalValue {
            node_id: node_id.to_string(),
            value,
        });
    }

    pub fn rewire(&self, program: Program) {
        let _ = self.commands.send(RunnerCommand::Rewire(program));
    }

    /// Stop the worker and wait for it to release the port.
    ///
    /// The worker reacts to `Stop` within one loop iteration, so the join
    /// is prompt; the caller still owes the grace period before reusing
    /// the port.
    pub fn stop(mut self) {
        let _ = self.commands.send(RunnerCommand::Stop);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("Runner worker for {} panicked", self.port);
            }
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(RunnerCommand::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn a runner for `program` on an already-opened link.
pub fn spawn(link: Box<dyn BoardLink>, program: Program, config: RunnerConfig) -> RunnerHandle {
    let (command_tx, command_rx) = bounded(256);
    let (message_tx, message_rx) = bounded(10_000);
    let port = link.port_name().to_string();
    let thread_port = port.clone();

    let join = std::thread::Builder::new()
        .name(format!("runner-{}", port))
        .spawn(move || {
            let mut worker = RunnerWorker {
                link,
                program,
                config,
                command_rx,
                message_tx,
                components: BTreeMap::new(),
                decoder: firmata::Decoder::new(),
                analog_routes: HashMap::new(),
                digital_routes: HashMap::new(),
                digital_shadow: HashMap::new(),
                stats: RunnerStats::default(),
                fatal: None,
            };
            worker.run();
            tracing::debug!("Runner worker for {} exited", thread_port);
        })
        .expect("spawn runner thread");

    RunnerHandle {
        commands: command_tx,
        messages: message_rx,
        join: Some(join),
        port,
    }
}

struct RunnerWorker {
    link: Box<dyn BoardLink>,
    program: Program,
    config: RunnerConfig,
    command_rx: Receiver<RunnerCommand>,
    message_tx: Sender<RuntimeMessage>,
    /// Live components keyed by node id; BTreeMap for deterministic
    /// iteration order in timers and teardown.
    components: BTreeMap<String, Box<dyn Component>>,
    decoder: firmata::Decoder,
    /// analog channel → interested node ids
    analog_routes: HashMap<u8, Vec<String>>,
    /// digital pin → interested node ids
    digital_routes: HashMap<u8, Vec<String>>,
    /// Last written output bits per digital port
    digital_shadow: HashMap<u8, u8>,
    stats: RunnerStats,
    /// Set when the link reported a disconnection mid-pump
    fatal: Option<String>,
}

impl RunnerWorker {
    fn run(&mut self) {
        // Construction: any failure here is caught and reported, never a
        // crash of the worker.
        if let Err(e) = self.build_components() {
            self.send(RuntimeMessage::Fail {
                message: e.to_string(),
            });
            self.send(RuntimeMessage::Exit { graceful: false });
            return;
        }

        // Board readiness gate: opening the port reset the board, so wait
        // for the firmware to come back up before any wiring happens.
        let pins = match firmata_handshake(
            self.link.as_mut(),
            self.config.ready_timeout(),
            Duration::from_millis(250),
            None,
        ) {
            HandshakeOutcome::Ready(pins) => pins,
            HandshakeOutcome::TimedOut | HandshakeOutcome::Aborted => {
                self.send(RuntimeMessage::Fail {
                    message: "board did not become ready".to_string(),
                });
                self.send(RuntimeMessage::Exit { graceful: false });
                return;
            }
            HandshakeOutcome::Disconnected => {
                self.send(RuntimeMessage::Error {
                    message: format!("port {} disconnected", self.link.port_name()),
                });
                self.send(RuntimeMessage::Exit { graceful: false });
                return;
            }
        };

        self.attach_all();
        self.send(RuntimeMessage::Ready { pins });

        let started = Instant::now();
        let mut last_stats = Instant::now();
        let graceful = loop {
            match self.drain_commands() {
                ControlFlow::Stop => break true,
                ControlFlow::Continue => {}
            }

            self.pump_serial();
            self.pump_timers();

            if let Some(reason) = self.fatal.take() {
                self.send(RuntimeMessage::Error { message: reason });
                break false;
            }

            if last_stats.elapsed() >= self.config.stats_interval() {
                self.stats.uptime = started.elapsed();
                self.try_send(RuntimeMessage::Stats(self.stats.clone()));
                last_stats = Instant::now();
            }
        };

        self.detach_all();
        if graceful {
            self.send(RuntimeMessage::Close);
        }
        self.send(RuntimeMessage::Exit { graceful });
    }

    fn build_components(&mut self) -> Result<(), crate::error::CompileError> {
        for spec in &self.program.components {
            let component = runtime::build(spec)?;
            self.components.insert(spec.node_id.clone(), component);
        }
        self.rebuild_routes();
        Ok(())
    }

    /// Signal routing derives from the program's hardware nodes.
    fn rebuild_routes(&mut self) {
        self.analog_routes.clear();
        self.digital_routes.clear();
        for spec in &self.program.components {
            let Some(pin) = spec.config.get("pin").and_then(|v| v.as_u64()) else {
                continue;
            };
            let pin = pin as u8;
            match spec.kind {
                NodeKind::Sensor => self
                    .analog_routes
                    .entry(pin)
                    .or_default()
                    .push(spec.node_id.clone()),
                NodeKind::Button => self
                    .digital_routes
                    .entry(pin)
                    .or_default()
                    .push(spec.node_id.clone()),
                _ => {}
            }
        }
    }

    fn attach_all(&mut self) {
        let ids: Vec<String> = self.components.keys().cloned().collect();
        for id in ids {
            self.with_component(&id, |c, ctx| c.attach(ctx));
        }
    }

    fn detach_all(&mut self) {
        let ids: Vec<String> = self.components.keys().cloned().collect();
        for id in ids {
            // Teardown events (timer cancellation) need no dispatch.
            let mut events = Vec::new();
            let mut ctx = ComponentCtx {
                now: Instant::now(),
                events: &mut events,
            };
            if let Some(c) = self.components.get_mut(&id) {
                c.detach(&mut ctx);
            }
        }
    }

    fn drain_commands(&mut self) -> ControlFlow {
        loop {
            match self.command_rx.try_recv() {
                Ok(RunnerCommand::Stop) => return ControlFlow::Stop,
                Ok(RunnerCommand::ExternalValue { node_id, value }) => {
                    self.with_component(&node_id, |c, ctx| {
                        c.apply_input("set", Some(&value), None, ctx)
                    });
                }
                Ok(RunnerCommand::Rewire(program)) => self.rewire(program),
                Err(TryRecvError::Empty) => return ControlFlow::Continue,
                // Supervisor went away; shut down with it.
                Err(TryRecvError::Disconnected) => return ControlFlow::Stop,
            }
        }
    }

    /// Apply a value-only program revision in place.
    ///
    /// Components present in both programs are reconfigured; added nodes
    /// are built and attached; removed nodes are detached and dropped. The
    /// reaction table is replaced wholesale. Pin modes are only touched by
    /// components whose assignment actually moved.
    fn rewire(&mut self, program: Program) {
        self.send(RuntimeMessage::Info {
            message: "applying graph update".to_string(),
        });

        let mut retained: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        for spec in &program.components {
            match self.components.remove(&spec.node_id) {
                Some(mut component) if component.kind() == spec.kind => {
                    let mut events = Vec::new();
                    let mut ctx = ComponentCtx {
                        now: Instant::now(),
                        events: &mut events,
                    };
                    match component.reconfigure(&spec.config, &mut ctx) {
                        Ok(()) => {
                            retained.insert(spec.node_id.clone(), component);
                            self.dispatch(&spec.node_id, events);
                        }
                        Err(e) => {
                            self.send(RuntimeMessage::Warn {
                                message: format!("{}: {}", spec.node_id, e),
                            });
                            retained.insert(spec.node_id.clone(), component);
                        }
                    }
                }
                // New node, or same id with a different kind: fresh build.
                _ => match runtime::build(spec) {
                    Ok(mut component) => {
                        let mut events = Vec::new();
                        let mut ctx = ComponentCtx {
                            now: Instant::now(),
                            events: &mut events,
                        };
                        component.attach(&mut ctx);
                        retained.insert(spec.node_id.clone(), component);
                        self.dispatch(&spec.node_id, events);
                    }
                    Err(e) => self.send(RuntimeMessage::Warn {
                        message: format!("{}: {}", spec.node_id, e),
                    }),
                },
            }
        }

        // Whatever is left in the old map was removed from the graph.
        for (id, mut component) in std::mem::take(&mut self.components) {
            let mut events = Vec::new();
            let mut ctx = ComponentCtx {
                now: Instant::now(),
                events: &mut events,
            };
            component.detach(&mut ctx);
            tracing::debug!("Dropped component {}", id);
        }

        self.components = retained;
        self.program = program;
        self.rebuild_routes();
    }

    fn pump_serial(&mut self) {
        let mut buf = [0u8; 256];
        let n = match self.link.read(&mut buf, Duration::from_millis(10)) {
            Ok(n) => n,
            Err(e) if e.is_disconnection() => {
                self.fatal = Some(format!("port {} disconnected", self.link.port_name()));
                return;
            }
            Err(e) => {
                self.fatal = Some(e.to_string());
                return;
            }
        };

        for event in self.decoder.feed(&buf[..n]) {
            match event {
                firmata::FirmataEvent::Analog { channel, value } => {
                    let targets = self.analog_routes.get(&channel).cloned().unwrap_or_default();
                    for id in targets {
                        self.with_component(&id, |c, ctx| {
                            c.on_signal(HardwareSignal::Analog { channel, value }, ctx)
                        });
                    }
                }
                firmata::FirmataEvent::Digital { port, bits } => {
                    for bit in 0..8u8 {
                        let pin = port * 8 + bit;
                        let Some(targets) = self.digital_routes.get(&pin).cloned() else {
                            continue;
                        };
                        let on = bits & (1 << bit) != 0;
                        for id in targets {
                            self.with_component(&id, |c, ctx| {
                                c.on_signal(HardwareSignal::Digital { pin, on }, ctx)
                            });
                        }
                    }
                }
                firmata::FirmataEvent::Text(text) => {
                    self.try_send(RuntimeMessage::Info { message: text });
                }
                _ => {}
            }
        }
    }

    fn pump_timers(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .components
            .iter()
            .filter(|(_, c)| c.next_deadline().map(|d| d <= now).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.with_component(&id, |c, ctx| c.on_timer(ctx));
        }
    }

    /// Run a hook on one component, then dispatch whatever it emitted.
    fn with_component<F>(&mut self, id: &str, f: F)
    where
        F: FnOnce(&mut Box<dyn Component>, &mut ComponentCtx),
    {
        let mut events = Vec::new();
        {
            let Some(component) = self.components.get_mut(id) else {
                tracing::debug!("No component `{}` in the live set", id);
                return;
            };
            let mut ctx = ComponentCtx {
                now: Instant::now(),
                events: &mut events,
            };
            f(component, &mut ctx);
        }
        self.dispatch(id, events);
    }

    /// Breadth-first reaction dispatch with a cascade budget.
    fn dispatch(&mut self, source: &str, events: Vec<ComponentEvent>) {
        let mut queue: VecDeque<(String, ComponentEvent)> = events
            .into_iter()
            .map(|e| (source.to_string(), e))
            .collect();
        let mut budget = CASCADE_BUDGET;

        while let Some((src, event)) = queue.pop_front() {
            if budget == 0 {
                self.try_send(RuntimeMessage::Warn {
                    message: "reaction cascade exceeded budget; dropping remainder".to_string(),
                });
                return;
            }
            budget -= 1;

            match event {
                ComponentEvent::Output { output, value } => {
                    self.stats.values_emitted += 1;
                    // Posted unconditionally: the editor shows live values
                    // even for dangling outputs.
                    self.try_send(RuntimeMessage::NodeValue {
                        node_id: src.clone(),
                        output: output.to_string(),
                        value: value.clone(),
                    });

                    let Some(reaction) = self.program.reaction(&src, output) else {
                        continue;
                    };
                    for target in reaction.targets.clone() {
                        self.stats.reactions_fired += 1;
                        let carried = target.carries_value.then(|| value.clone());
                        let mut events = Vec::new();
                        {
                            let Some(component) = self.components.get_mut(&target.node_id) else {
                                continue;
                            };
                            let mut ctx = ComponentCtx {
                                now: Instant::now(),
                                events: &mut events,
                            };
                            component.apply_input(
                                &target.input,
                                carried.as_ref(),
                                Some(&src),
                                &mut ctx,
                            );
                        }
                        queue.extend(events.into_iter().map(|e| (target.node_id.clone(), e)));
                    }
                }
                ComponentEvent::SetPinMode { pin, mode } => {
                    self.write(&firmata::set_pin_mode(pin, mode));
                }
                ComponentEvent::DigitalWrite { pin, on } => {
                    let port = pin / 8;
                    let bits = self.digital_shadow.entry(port).or_insert(0);
                    if on {
                        *bits |= 1 << (pin % 8);
                    } else {
                        *bits &= !(1 << (pin % 8));
                    }
                    let bits = *bits;
                    self.write(&firmata::digital_write(port, bits));
                }
                ComponentEvent::AnalogWrite { pin, value } => {
                    self.write(&firmata::analog_write(pin, value));
                }
                ComponentEvent::ReportAnalog { channel } => {
                    self.write(&firmata::report_analog(channel, true));
                }
                ComponentEvent::ReportDigital { port } => {
                    self.write(&firmata::report_digital(port, true));
                }
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.fatal.is_some() {
            return;
        }
        if let Err(e) = self.link.write(bytes) {
            if e.is_disconnection() {
                self.fatal = Some(format!("port {} disconnected", self.link.port_name()));
            } else {
                self.fatal = Some(e.to_string());
            }
        }
    }

    fn send(&self, msg: RuntimeMessage) {
        let _ = self.message_tx.send(msg);
    }

    /// Hot-path send: drop on a full channel, counting the drop.
    fn try_send(&mut self, msg: RuntimeMessage) {
        if self.message_tx.try_send(msg).is_err() {
            self.stats.dropped_messages += 1;
        }
    }
}

enum ControlFlow {
    Continue,
    Stop,
}
