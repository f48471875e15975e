//! Orchestrator: command/event plumbing around the supervisor worker
//!
//! The worker runs in its own thread and owns every state transition;
//! the editor talks to it exclusively through bounded channels. This module
//! is the editor-facing surface:
//!
//! - [`OrchestratorCommand`] - requests from the editor (check board, upload
//!   a graph, inject a value, stop, shutdown)
//! - [`OrchestratorEvent`] - status/value stream back to the editor
//! - [`EditorHandle`] - editor-side handle for sending commands and
//!   receiving events
//! - [`Orchestrator`] - entry point that spawns the worker loop

pub mod worker;

use crate::board::link::{LinkFactory, SerialLinkFactory};
use crate::config::AppConfig;
use crate::graph::model::Graph;
use crate::types::{ConnectionStatus, Pin, RunnerStats, Value};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

pub use worker::SupervisorWorker;

/// Requests from the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestratorCommand {
    /// Discover a board and report readiness. `ip` is accepted for
    /// contract compatibility; network boards are not handled here.
    CheckBoard {
        #[serde(default)]
        ip: Option<String>,
    },
    /// Compile and run a graph. With `port`, that port is tried first.
    UploadGraph {
        graph: Graph,
        #[serde(default)]
        port: Option<String>,
    },
    /// Fire-and-forget value injection into the running program.
    ExternalValue { node_id: String, value: Value },
    /// Explicitly stop the runner and stay idle.
    StopRunner,
    /// OS hot-plug notification: a device at `port` was removed.
    PortUnplugged { port: String },
    Shutdown,
}

/// Status/value stream to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestratorEvent {
    Status { status: ConnectionStatus },
    Info { message: String },
    Warn { message: String },
    Error { message: String },
    /// Terminal failure of a discovery or upload request.
    Fail { message: String },
    /// Firmware is being written to a board.
    Flashing { board: String, attempt: u32 },
    /// A board (and later, its program) is ready on `port`.
    Ready { port: String, pins: Vec<Pin> },
    /// The device list changed — something was plugged in or removed.
    Connect,
    /// The accepted port vanished.
    Disconnected { port: String },
    NodeValue {
        node_id: String,
        output: String,
        value: Value,
    },
    Stats(RunnerStats),
    Close,
    Exit,
    Shutdown,
}

/// Editor-side handle.
pub struct EditorHandle {
    /// Receiver for orchestrator events
    pub events: Receiver<OrchestratorEvent>,
    /// Sender for commands to the orchestrator
    pub commands: Sender<OrchestratorCommand>,
}

impl EditorHandle {
    pub fn send_command(&self, cmd: OrchestratorCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<OrchestratorEvent> {
        self.events.try_recv().ok()
    }

    /// Receive all pending events.
    pub fn drain(&self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            events.push(ev);
        }
        events
    }

    pub fn check_board(&self) {
        let _ = self
            .commands
            .send(OrchestratorCommand::CheckBoard { ip: None });
    }

    pub fn upload_graph(&self, graph: Graph) {
        let _ = self
            .commands
            .send(OrchestratorCommand::UploadGraph { graph, port: None });
    }

    pub fn upload_graph_to(&self, graph: Graph, port: impl Into<String>) {
        let _ = self.commands.send(OrchestratorCommand::UploadGraph {
            graph,
            port: Some(port.into()),
        });
    }

    pub fn external_value(&self, node_id: impl Into<String>, value: Value) {
        let _ = self.commands.send(OrchestratorCommand::ExternalValue {
            node_id: node_id.into(),
            value,
        });
    }

    pub fn stop_runner(&self) {
        let _ = self.commands.send(OrchestratorCommand::StopRunner);
    }

    pub fn notify_unplugged(&self, port: impl Into<String>) {
        let _ = self
            .commands
            .send(OrchestratorCommand::PortUnplugged { port: port.into() });
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(OrchestratorCommand::Shutdown);
    }
}

/// The orchestrator backend; spawn [`Orchestrator::run`] on its own thread.
pub struct Orchestrator {
    config: AppConfig,
    factory: Box<dyn LinkFactory>,
    command_rx: Receiver<OrchestratorCommand>,
    event_tx: Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Create an orchestrator against real serial hardware.
    pub fn new(config: AppConfig) -> (Self, EditorHandle) {
        Self::with_factory(config, Box::new(SerialLinkFactory))
    }

    /// Create an orchestrator with a custom hardware seam (mock boards in
    /// tests).
    pub fn with_factory(
        config: AppConfig,
        factory: Box<dyn LinkFactory>,
    ) -> (Self, EditorHandle) {
        let (cmd_tx, cmd_rx) = bounded(config.channels.command_capacity);
        let (event_tx, event_rx) = bounded(config.channels.event_capacity);

        let orchestrator = Self {
            config,
            factory,
            command_rx: cmd_rx,
            event_tx,
        };
        let handle = EditorHandle {
            events: event_rx,
            commands: cmd_tx,
        };
        (orchestrator, handle)
    }

    /// Run the supervisor loop until shutdown.
    pub fn run(self) {
        let mut worker = SupervisorWorker::new(
            self.config,
            self.factory,
            self.command_rx,
            self.event_tx,
        );
        worker.run();
    }
}
