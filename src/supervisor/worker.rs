//! Supervisor worker — the central state machine
//!
//! One thread owns every transition: discovery (scan → probe → flash →
//! re-probe), runner lifecycle (compile → spawn → ready → run), the
//! pin-footprint restart rule, failure recovery with back-off, and the
//! health monitor. The prober and runner are separate worker threads that
//! communicate only via channels; only one of {prober, flasher, runner}
//! ever holds the serial port, and acquiring it always waits out the
//! previous holder plus the grace period.

use crate::board::flasher;
use crate::board::link::LinkFactory;
use crate::board::probe::{self, ProbeHandle};
use crate::board::registry::BoardIdentity;
use crate::board::scanner::{self, Port};
use crate::bridge::RuntimeMessage;
use crate::config::AppConfig;
use crate::graph;
use crate::graph::model::Graph;
use crate::graph::program::Program;
use crate::monitor::{HealthMonitor, MonitorEvent};
use crate::runtime::runner::{self, RunnerHandle};
use crate::supervisor::{OrchestratorCommand, OrchestratorEvent};
use crate::types::{ConnectionStatus, Pin, ProbeOutcome, Value};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Loop tick while idle; commands and serial traffic are polled at this
/// cadence.
const TICK: Duration = Duration::from_millis(5);

/// Extra slack on top of the probe window before a hung probe worker is
/// killed and the port declared unreachable.
const PROBE_WAIT_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopped,
}

struct AcceptedBoard {
    board: &'static BoardIdentity,
    port: String,
    pins: Vec<Pin>,
}

struct ActiveRunner {
    handle: RunnerHandle,
    pin_footprint: u64,
    content_hash: u64,
}

/// The worker owning all orchestration state. Construct via
/// [`crate::supervisor::Orchestrator`].
pub struct SupervisorWorker {
    config: AppConfig,
    factory: Box<dyn LinkFactory>,
    command_rx: Receiver<OrchestratorCommand>,
    event_tx: Sender<OrchestratorEvent>,
    /// Commands buffered while discovery held the loop
    pending: VecDeque<OrchestratorCommand>,

    state: SupervisorState,
    program: Option<Program>,
    accepted: Option<AcceptedBoard>,
    runner: Option<ActiveRunner>,
    monitor: HealthMonitor,

    /// When the next automatic discovery attempt may run (back-off)
    next_discovery: Option<Instant>,
    /// Deadline for the runner's program-level ready message
    ready_deadline: Option<Instant>,
    last_poll: Instant,
    /// Whether failures schedule automatic rediscovery
    auto_discover: bool,
    shutdown: bool,
}

impl SupervisorWorker {
    pub fn new(
        config: AppConfig,
        factory: Box<dyn LinkFactory>,
        command_rx: Receiver<OrchestratorCommand>,
        event_tx: Sender<OrchestratorEvent>,
    ) -> Self {
        Self {
            config,
            factory,
            command_rx,
            event_tx,
            pending: VecDeque::new(),
            state: SupervisorState::Idle,
            program: None,
            accepted: None,
            runner: None,
            monitor: HealthMonitor::new(),
            next_discovery: None,
            ready_deadline: None,
            last_poll: Instant::now(),
            auto_discover: false,
            shutdown: false,
        }
    }

    /// Run until shutdown.
    pub fn run(&mut self) {
        tracing::info!("Supervisor started");
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Idle,
        });

        while !self.shutdown {
            self.process_commands();
            if self.shutdown {
                break;
            }

            self.pump_runner();
            self.check_ready_deadline();
            self.monitor_tick();

            let discovery_due = self
                .next_discovery
                .map(|t| Instant::now() >= t)
                .unwrap_or(false);
            if discovery_due && self.runner.is_none() {
                self.next_discovery = None;
                self.discover(None);
            }

            std::thread::sleep(TICK);
        }

        self.teardown_runner(true);
        self.emit(OrchestratorEvent::Shutdown);
        tracing::info!("Supervisor stopped");
    }

    // ---- command handling ----

    fn process_commands(&mut self) {
        while let Some(cmd) = self.next_command() {
            self.handle_command(cmd);
            if self.shutdown {
                return;
            }
        }
    }

    fn next_command(&mut self) -> Option<OrchestratorCommand> {
        if let Some(cmd) = self.pending.pop_front() {
            return Some(cmd);
        }
        match self.command_rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                // Editor went away entirely.
                self.shutdown = true;
                None
            }
        }
    }

    fn handle_command(&mut self, cmd: OrchestratorCommand) {
        match cmd {
            OrchestratorCommand::CheckBoard { ip } => {
                if ip.is_some() {
                    self.emit(OrchestratorEvent::Warn {
                        message: "network boards are not supported; scanning serial ports"
                            .to_string(),
                    });
                }
                self.auto_discover = true;
                if let Some(accepted) = &self.accepted {
                    // Already connected: answer from current state.
                    self.emit(OrchestratorEvent::Ready {
                        port: accepted.port.clone(),
                        pins: accepted.pins.clone(),
                    });
                } else {
                    self.discover(None);
                }
            }
            OrchestratorCommand::UploadGraph { graph, port } => {
                self.auto_discover = true;
                self.upload_graph(graph, port);
            }
            OrchestratorCommand::ExternalValue { node_id, value } => {
                self.inject_value(&node_id, value);
            }
            OrchestratorCommand::StopRunner => {
                self.auto_discover = false;
                self.next_discovery = None;
                self.teardown_runner(true);
                self.state = SupervisorState::Stopped;
                self.emit(OrchestratorEvent::Status {
                    status: ConnectionStatus::Idle,
                });
            }
            OrchestratorCommand::PortUnplugged { port } => {
                if let Some(event) = self.monitor.notify_unplugged(&port) {
                    self.handle_monitor_event(event);
                }
            }
            OrchestratorCommand::Shutdown => {
                self.shutdown = true;
            }
        }
    }

    /// Drain commands arriving mid-discovery. Stop/shutdown abort the
    /// discovery pass; everything else is buffered for the main loop.
    fn discovery_interrupted(&mut self) -> bool {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                OrchestratorCommand::Shutdown => {
                    self.shutdown = true;
                    return true;
                }
                OrchestratorCommand::StopRunner => {
                    self.auto_discover = false;
                    self.pending.push_back(OrchestratorCommand::StopRunner);
                    return true;
                }
                other => self.pending.push_back(other),
            }
        }
        false
    }

    // ---- discovery ----

    fn discover(&mut self, preferred: Option<&str>) {
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Scanning,
        });
        self.emit(OrchestratorEvent::Info {
            message: "searching for connected boards".to_string(),
        });

        let ports = self.factory.list_ports();
        let matches = scanner::match_boards(&ports);
        if matches.is_empty() {
            self.emit(OrchestratorEvent::Fail {
                message: "no boards found".to_string(),
            });
            self.schedule_rediscovery();
            return;
        }

        for (board, mut candidates) in matches {
            if let Some(preferred) = preferred {
                // Stable: the preferred port leads, enumeration order holds
                // for the rest.
                candidates.sort_by_key(|p| p.path != preferred);
            }
            for port in candidates {
                if self.discovery_interrupted() {
                    return;
                }
                if self.try_port(board, &port) {
                    return;
                }
            }
        }

        self.emit(OrchestratorEvent::Fail {
            message: "no responsive board found".to_string(),
        });
        self.schedule_rediscovery();
    }

    /// Probe one (board, port) pair, flashing if needed. Returns true if
    /// the port was accepted.
    fn try_port(&mut self, board: &'static BoardIdentity, port: &Port) -> bool {
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Connecting,
        });
        self.emit(OrchestratorEvent::Info {
            message: format!("probing {} as {}", port.path, board.name),
        });

        match self.probe_port(board, &port.path) {
            ProbeOutcome::Ready(pins) => {
                self.accept(board, &port.path, pins);
                true
            }
            ProbeOutcome::NeedsFlash => self.flash_and_reprobe(board, &port.path),
            ProbeOutcome::Unreachable => {
                tracing::debug!("{} unreachable as {}", port.path, board.name);
                false
            }
            ProbeOutcome::Disconnected => {
                tracing::debug!("{} vanished while probing", port.path);
                false
            }
        }
    }

    fn probe_port(&mut self, board: &BoardIdentity, path: &str) -> ProbeOutcome {
        let link = match self.factory.open(path, board.runtime_baud) {
            Ok(link) => link,
            Err(e) if e.is_disconnection() => return ProbeOutcome::Disconnected,
            Err(e) => {
                tracing::debug!("Cannot open {}: {}", path, e);
                return ProbeOutcome::Unreachable;
            }
        };

        let handle: ProbeHandle = probe::spawn(link, self.config.probe.clone());
        let wait = self.config.probe.window() + PROBE_WAIT_MARGIN;
        match handle.wait(wait) {
            Some(outcome) => outcome,
            None => {
                // The worker produced no terminal message in the bounded
                // window: kill it rather than hang the state machine.
                tracing::warn!("Probe of {} hung; killing worker", path);
                handle.kill();
                ProbeOutcome::Unreachable
            }
        }
    }

    fn flash_and_reprobe(&mut self, board: &'static BoardIdentity, path: &str) -> bool {
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Flashing,
        });
        self.emit(OrchestratorEvent::Flashing {
            board: board.name.to_string(),
            attempt: 1,
        });
        self.emit(OrchestratorEvent::Info {
            message: format!("writing {} firmware to {}", board.name, path),
        });

        match flasher::flash(self.factory.as_ref(), board, path, &self.config.flash) {
            Ok(()) => {
                self.emit(OrchestratorEvent::Info {
                    message: "firmware written; re-probing".to_string(),
                });
                match self.probe_port(board, path) {
                    ProbeOutcome::Ready(pins) => {
                        self.accept(board, path, pins);
                        true
                    }
                    other => {
                        tracing::warn!("{} not ready after flashing: {:?}", path, other);
                        self.emit(OrchestratorEvent::Error {
                            message: format!("{} did not respond after flashing", path),
                        });
                        false
                    }
                }
            }
            Err(e) if e.is_disconnection() => {
                // Never reported as a flash defect.
                self.emit(OrchestratorEvent::Disconnected {
                    port: path.to_string(),
                });
                false
            }
            Err(e) => {
                // Missing firmware or exhausted retries: distinct,
                // non-retrying, user-visible failure.
                self.emit(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                self.emit(OrchestratorEvent::Status {
                    status: ConnectionStatus::Error,
                });
                false
            }
        }
    }

    fn accept(&mut self, board: &'static BoardIdentity, path: &str, pins: Vec<Pin>) {
        tracing::info!("Accepted {} on {}", board.name, path);
        self.accepted = Some(AcceptedBoard {
            board,
            port: path.to_string(),
            pins: pins.clone(),
        });
        self.monitor.set_accepted(Some(path.to_string()));
        self.next_discovery = None;
        self.emit(OrchestratorEvent::Ready {
            port: path.to_string(),
            pins,
        });

        if let Some(program) = self.program.clone() {
            self.start_runner(program);
        }
    }

    // ---- graph upload & runner lifecycle ----

    fn upload_graph(&mut self, graph: Graph, port: Option<String>) {
        self.emit(OrchestratorEvent::Info {
            message: "compiling graph".to_string(),
        });
        let program = match graph::compile(&graph) {
            Ok(program) => program,
            Err(e) => {
                // Malformed graph: surfaced, no retry, runner untouched.
                self.emit(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        let live = self
            .runner
            .as_ref()
            .map(|a| (a.pin_footprint, a.content_hash));
        if let Some((pin_footprint, content_hash)) = live {
            if pin_footprint != program.pin_footprint {
                // The physical pin set changed: full restart.
                self.emit(OrchestratorEvent::Status {
                    status: ConnectionStatus::Reconfiguring,
                });
                self.emit(OrchestratorEvent::Info {
                    message: "pin layout changed; restarting program".to_string(),
                });
                self.teardown_runner(true);
                self.start_runner(program);
            } else if content_hash != program.content_hash {
                // Value-only edit: rewire in place, no restart.
                if let Some(active) = self.runner.as_mut() {
                    active.handle.rewire(program.clone());
                    active.content_hash = program.content_hash;
                }
                self.program = Some(program);
            } else {
                self.emit(OrchestratorEvent::Info {
                    message: "graph unchanged".to_string(),
                });
            }
            return;
        }

        self.program = Some(program.clone());
        match (&self.accepted, port) {
            (Some(_), _) => self.start_runner(program),
            (None, preferred) => self.discover(preferred.as_deref()),
        }
    }

    fn start_runner(&mut self, program: Program) {
        let (port, baud) = match &self.accepted {
            Some(accepted) => (accepted.port.clone(), accepted.board.runtime_baud),
            None => {
                tracing::warn!("start_runner without an accepted port");
                return;
            }
        };
        debug_assert!(self.runner.is_none(), "runner already holds the port");

        self.state = SupervisorState::Starting;
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Starting,
        });
        self.emit(OrchestratorEvent::Info {
            message: format!("starting program on {}", port),
        });

        let link = match self.factory.open(&port, baud) {
            Ok(link) => link,
            Err(e) => {
                if e.is_disconnection() {
                    self.handle_monitor_event(MonitorEvent::AcceptedPortLost(port));
                } else {
                    self.emit(OrchestratorEvent::Error {
                        message: e.to_string(),
                    });
                    self.runner_failed();
                }
                return;
            }
        };

        let handle = runner::spawn(link, program.clone(), self.config.runner.clone());
        self.runner = Some(ActiveRunner {
            handle,
            pin_footprint: program.pin_footprint,
            content_hash: program.content_hash,
        });
        self.program = Some(program);
        self.ready_deadline =
            Some(Instant::now() + self.config.runner.ready_timeout() + Duration::from_secs(1));
    }

    fn inject_value(&mut self, node_id: &str, value: Value) {
        match &self.runner {
            Some(active) => active.handle.external_value(node_id, value),
            None => self.emit(OrchestratorEvent::Warn {
                message: format!("no running program to receive value for {}", node_id),
            }),
        }
    }

    // ---- runner supervision ----

    fn pump_runner(&mut self) {
        let Some(active) = &self.runner else {
            return;
        };
        let mut messages = Vec::new();
        while let Ok(msg) = active.handle.messages.try_recv() {
            messages.push(msg);
        }

        for msg in messages {
            match msg {
                RuntimeMessage::Ready { pins } => {
                    self.state = SupervisorState::Running;
                    self.ready_deadline = None;
                    let port = self
                        .accepted
                        .as_ref()
                        .map(|a| a.port.clone())
                        .unwrap_or_default();
                    self.emit(OrchestratorEvent::Status {
                        status: ConnectionStatus::Running,
                    });
                    self.emit(OrchestratorEvent::Ready { port, pins });
                }
                RuntimeMessage::Info { message } => {
                    self.emit(OrchestratorEvent::Info { message })
                }
                RuntimeMessage::Warn { message } => {
                    self.emit(OrchestratorEvent::Warn { message })
                }
                RuntimeMessage::NodeValue {
                    node_id,
                    output,
                    value,
                } => {
                    // Hot path: drop rather than block on a slow editor.
                    let _ = self.event_tx.try_send(OrchestratorEvent::NodeValue {
                        node_id,
                        output,
                        value,
                    });
                }
                RuntimeMessage::Stats(stats) => {
                    let _ = self.event_tx.try_send(OrchestratorEvent::Stats(stats));
                }
                RuntimeMessage::Error { message } => {
                    self.emit(OrchestratorEvent::Error { message })
                }
                RuntimeMessage::Fail { message } => {
                    self.emit(OrchestratorEvent::Fail { message })
                }
                RuntimeMessage::Close => self.emit(OrchestratorEvent::Close),
                RuntimeMessage::Exit { graceful } => {
                    self.emit(OrchestratorEvent::Exit);
                    // The worker thread has exited; drop the stale handle.
                    self.runner = None;
                    if !graceful {
                        // Crash or disconnect while running: full
                        // rediscovery, never a silent restart.
                        self.runner_failed();
                    }
                    return;
                }
            }
        }
    }

    fn check_ready_deadline(&mut self) {
        let Some(deadline) = self.ready_deadline else {
            return;
        };
        if self.state != SupervisorState::Starting || Instant::now() < deadline {
            return;
        }
        self.ready_deadline = None;
        self.emit(OrchestratorEvent::Error {
            message: "program did not become ready".to_string(),
        });
        self.runner_failed();
    }

    /// Common failure path: tear down, return to idle, schedule
    /// rediscovery after the back-off delay.
    fn runner_failed(&mut self) {
        // A crash caused by the port vanishing is a disconnection, and must
        // go through the monitor path so the loss is reported exactly once.
        if let Some(port) = self.monitor.accepted().map(str::to_string) {
            let present = self.factory.list_ports().iter().any(|p| p.path == port);
            if !present {
                if let Some(event) = self.monitor.notify_unplugged(&port) {
                    self.handle_monitor_event(event);
                    return;
                }
            }
        }

        self.teardown_runner(false);
        self.accepted = None;
        self.monitor.set_accepted(None);
        self.state = SupervisorState::Idle;
        self.emit(OrchestratorEvent::Status {
            status: ConnectionStatus::Idle,
        });
        self.schedule_rediscovery();
    }

    /// Kill the runner (if any) and wait out the grace period so the OS
    /// has released the serial handle before anyone reopens it.
    fn teardown_runner(&mut self, announce: bool) {
        let Some(active) = self.runner.take() else {
            return;
        };
        if announce {
            self.emit(OrchestratorEvent::Info {
                message: "stopping program".to_string(),
            });
        }
        let messages = active.handle.messages.clone();
        active.handle.stop();
        // Forward the runner's final words before the handle goes away.
        while let Ok(msg) = messages.try_recv() {
            match msg {
                RuntimeMessage::Close => self.emit(OrchestratorEvent::Close),
                RuntimeMessage::Exit { .. } => self.emit(OrchestratorEvent::Exit),
                RuntimeMessage::Error { message } => {
                    self.emit(OrchestratorEvent::Error { message })
                }
                _ => {}
            }
        }
        std::thread::sleep(self.config.runner.grace_period());
        self.ready_deadline = None;
    }

    // ---- health monitoring ----

    fn monitor_tick(&mut self) {
        if self.last_poll.elapsed() < self.config.discovery.poll_interval() {
            return;
        }
        self.last_poll = Instant::now();

        let ports = self.factory.list_ports();
        for event in self.monitor.observe(&ports) {
            self.handle_monitor_event(event);
        }
    }

    fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::DeviceListChanged => {
                self.emit(OrchestratorEvent::Connect);
            }
            MonitorEvent::AcceptedPortLost(port) => {
                tracing::warn!("Accepted port {} disconnected", port);
                self.emit(OrchestratorEvent::Disconnected { port });
                self.emit(OrchestratorEvent::Status {
                    status: ConnectionStatus::Disconnected,
                });
                self.teardown_runner(false);
                self.accepted = None;
                self.monitor.set_accepted(None);
                self.state = SupervisorState::Idle;
                self.schedule_rediscovery();
            }
        }
    }

    fn schedule_rediscovery(&mut self) {
        if !self.auto_discover || self.shutdown {
            return;
        }
        let backoff = self.config.discovery.backoff();
        tracing::debug!("Rediscovery scheduled in {:?}", backoff);
        self.next_discovery = Some(Instant::now() + backoff);
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }
}
