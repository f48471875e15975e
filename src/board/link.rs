//! Board transport abstraction
//!
//! [`BoardLink`] is the unified byte-level interface every port holder
//! (prober, flasher, runner) speaks through. A [`LinkFactory`] is the single
//! hardware-access seam: the real implementation opens `serialport` handles
//! and enumerates system ports, while tests substitute a mock factory.

use crate::board::scanner::{self, Port};
use crate::error::{io_is_disconnection, PinflowError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Byte transport to one board on one port.
///
/// Implementations must be `Send`: links are opened by the supervisor and
/// moved into the worker thread that exclusively holds the port.
pub trait BoardLink: Send {
    /// Write all bytes to the board.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` on timeout. A vanished device surfaces as
    /// [`PinflowError::PortDisconnected`], never as a generic IO error.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Pulse DTR/RTS to reset the board into its bootloader.
    fn pulse_reset(&mut self) -> Result<()>;

    /// System path of the underlying port.
    fn port_name(&self) -> &str;
}

/// Factory that opens links and enumerates ports — the seam where the real
/// serial layer and the mock board swap.
pub trait LinkFactory: Send {
    fn open(&self, path: &str, baud: u32) -> Result<Box<dyn BoardLink>>;

    /// Enumerate currently present ports.
    fn list_ports(&self) -> Vec<Port>;
}

/// Real serial implementation backed by the `serialport` crate.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialLink {
    /// Open a serial port at the given baud rate, 8N1, no flow control.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| classify_serial(path, e))?;

        tracing::debug!("Opened {} at {} baud", path, baud);

        Ok(Self {
            port,
            name: path.to_string(),
        })
    }
}

/// Fold device-removal serial errors into the disconnection variant.
fn classify_serial(path: &str, e: serialport::Error) -> PinflowError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => PinflowError::PortDisconnected(path.to_string()),
        _ => PinflowError::Serial(e),
    }
}

/// Fold device-removal IO errors into the disconnection variant.
fn classify_io(path: &str, e: std::io::Error) -> PinflowError {
    if io_is_disconnection(&e) {
        PinflowError::PortDisconnected(path.to_string())
    } else {
        PinflowError::Io(e)
    }
}

impl BoardLink for SerialLink {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .map_err(|e| classify_io(&self.name, e))?;
        self.port
            .flush()
            .map_err(|e| classify_io(&self.name, e))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| classify_serial(&self.name, e))?;

        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(classify_io(&self.name, e)),
        }
    }

    fn pulse_reset(&mut self) -> Result<()> {
        // Arduino-style auto-reset: drop DTR/RTS, hold, raise again.
        self.port
            .write_data_terminal_ready(false)
            .map_err(|e| classify_serial(&self.name, e))?;
        self.port
            .write_request_to_send(false)
            .map_err(|e| classify_serial(&self.name, e))?;
        std::thread::sleep(Duration::from_millis(250));
        self.port
            .write_data_terminal_ready(true)
            .map_err(|e| classify_serial(&self.name, e))?;
        self.port
            .write_request_to_send(true)
            .map_err(|e| classify_serial(&self.name, e))?;
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

/// Factory for real serial links.
pub struct SerialLinkFactory;

impl LinkFactory for SerialLinkFactory {
    fn open(&self, path: &str, baud: u32) -> Result<Box<dyn BoardLink>> {
        Ok(Box::new(SerialLink::open(path, baud)?))
    }

    fn list_ports(&self) -> Vec<Port> {
        scanner::list_ports()
    }
}
