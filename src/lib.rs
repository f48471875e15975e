//! # pinflow: node-graph orchestration for Firmata microcontrollers
//!
//! pinflow takes a visual node/edge graph from an editor, compiles it into
//! a typed in-process program, and runs that program against a physically
//! connected microcontroller: discovering the board over serial, flashing
//! known-good firmware when it does not answer, supervising the runner
//! worker, and streaming per-node values back out.
//!
//! ## Architecture
//!
//! - **Board layer**: port scanning, probing, flashing and the Firmata
//!   protocol, behind a transport trait with a mock implementation
//! - **Graph layer**: the editor's node/edge model and a deterministic
//!   compiler producing a typed program (components + reaction table)
//! - **Runtime**: one component per node kind, a runner worker owning the
//!   serial port, and the closed runtime message protocol
//! - **Supervisor**: the single state machine owning discovery, runner
//!   lifecycle, pin-footprint restarts and disconnect recovery
//! - **Communication**: bounded crossbeam channels everywhere; workers
//!   never share memory with the supervisor
//!
//! ## Example
//!
//! ```ignore
//! use pinflow::config::AppConfig;
//! use pinflow::supervisor::Orchestrator;
//!
//! let (orchestrator, editor) = Orchestrator::new(AppConfig::default());
//! std::thread::spawn(move || orchestrator.run());
//!
//! editor.check_board();
//! for event in editor.drain() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod board;
pub mod bridge;
pub mod config;
pub mod error;
pub mod graph;
pub mod monitor;
pub mod runtime;
pub mod supervisor;
pub mod types;

// Re-export commonly used types
pub use bridge::{RunnerCommand, RuntimeMessage};
pub use config::AppConfig;
pub use error::{PinflowError, Result};
pub use graph::{Graph, NodeKind, Program};
pub use supervisor::{EditorHandle, Orchestrator, OrchestratorCommand, OrchestratorEvent};
pub use types::{ConnectionStatus, Pin, PinMode, ProbeOutcome, Value};
