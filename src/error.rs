//! Error handling for pinflow
//!
//! This module defines custom error types and a Result alias for use
//! throughout the application. The taxonomy distinguishes recoverable
//! conditions (a vanished port) from user-visible terminal failures
//! (a missing firmware image, repeated flash failures).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pinflow operations
#[derive(Error, Debug)]
pub enum PinflowError {
    /// The physical device vanished. Always recoverable by re-discovery.
    #[error("Port disconnected: {0}")]
    PortDisconnected(String),

    /// Firmware write failed while the port still exists.
    #[error("Flash failure on {port}: {message}")]
    FlashFailure { port: String, message: String },

    /// No terminal probe message within the probe window.
    #[error("Probe timeout on {0}")]
    ProbeTimeout(String),

    /// Board is present but does not speak the expected protocol.
    #[error("Probe rejected on {port}: {message}")]
    ProbeRejected { port: String, message: String },

    /// Malformed graph. Surfaced to the user; the runner is never started.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// The runner exited unexpectedly while running.
    #[error("Runner crashed: {0}")]
    RunnerCrash(String),

    /// Firmware image missing from disk. Hard, user-visible failure.
    #[error("Firmware image not found: {0}")]
    FirmwareMissing(PathBuf),

    /// Firmware image exists but could not be parsed.
    #[error("Firmware image invalid: {0}")]
    FirmwareInvalid(String),

    /// Errors surfaced by the serial layer
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PinflowError>,
    },
}

impl PinflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PinflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means the physical device went away.
    ///
    /// Disconnections are never terminal: the caller schedules rediscovery
    /// instead of surfacing a defect.
    pub fn is_disconnection(&self) -> bool {
        match self {
            PinflowError::PortDisconnected(_) => true,
            PinflowError::Serial(e) => matches!(e.kind(), serialport::ErrorKind::NoDevice),
            PinflowError::Io(e) => io_is_disconnection(e),
            PinflowError::WithContext { source, .. } => source.is_disconnection(),
            _ => false,
        }
    }
}

/// Classify an IO error as a device-removal condition.
///
/// Serial drivers report an unplugged device as one of a small set of kinds
/// depending on platform and on whether the failure hit an open, read or
/// write call.
pub fn io_is_disconnection(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Errors produced while compiling a graph into a program.
///
/// These surface to the user and never start a runner; there is no retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node {node}: missing required parameter `{param}`")]
    MissingParam { node: String, param: String },

    #[error("Node {node}: invalid parameter `{param}`: {reason}")]
    InvalidParam {
        node: String,
        param: String,
        reason: String,
    },
}

/// Result type alias for pinflow operations
pub type Result<T> = std::result::Result<T, PinflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PinflowError::ProbeTimeout("/dev/ttyUSB0".to_string());
        assert_eq!(err.to_string(), "Probe timeout on /dev/ttyUSB0");
    }

    #[test]
    fn test_error_with_context() {
        let err = PinflowError::Config("bad value".to_string());
        let with_ctx = err.with_context("Failed to load config");
        assert!(with_ctx.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_disconnection_classification() {
        assert!(PinflowError::PortDisconnected("/dev/ttyACM0".into()).is_disconnection());
        assert!(!PinflowError::FlashFailure {
            port: "/dev/ttyACM0".into(),
            message: "out of sync".into()
        }
        .is_disconnection());

        let io = PinflowError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.is_disconnection());

        // Disconnection survives context wrapping.
        let wrapped =
            PinflowError::PortDisconnected("/dev/ttyACM0".into()).with_context("while flashing");
        assert!(wrapped.is_disconnection());
    }

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::MissingParam {
            node: "led-1".into(),
            param: "pin".into(),
        };
        assert!(err.to_string().contains("led-1"));
        assert!(err.to_string().contains("pin"));
    }
}
