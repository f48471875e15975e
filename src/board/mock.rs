//! Mock board for testing without hardware
//!
//! Implements [`BoardLink`]/[`LinkFactory`] over an in-memory conversation:
//! a Firmata personality for probe/runner tests, an STK500 bootloader
//! personality for flash tests, a silent personality for mis-flashed
//! boards, and a vanishing personality for disconnect handling.
//!
//! Only compiled for tests and the `mock-board` feature.

use crate::board::firmata::{self, END_SYSEX, START_SYSEX};
use crate::board::link::{BoardLink, LinkFactory};
use crate::board::scanner::Port;
use crate::error::{PinflowError, Result};
use crate::types::{Pin, PinMode};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// STK500 subset understood by the bootloader personality
const STK_GET_SYNC: u8 = 0x30;
const STK_ENTER_PROGMODE: u8 = 0x50;
const STK_LEAVE_PROGMODE: u8 = 0x51;
const STK_LOAD_ADDRESS: u8 = 0x55;
const STK_PROG_PAGE: u8 = 0x64;
const CRC_EOP: u8 = 0x20;
const RESP_STK_INSYNC: u8 = 0x14;
const RESP_STK_OK: u8 = 0x10;

/// How a mock board behaves on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Speaks the Firmata handshake and accepts runtime writes.
    Firmata,
    /// Speaks the STK500 bootloader protocol. With `then_firmata`, the
    /// board answers Firmata after a completed flash (as a real reflash
    /// would make it).
    Bootloader { then_firmata: bool },
    /// Accepts everything, says nothing. A mis-flashed board.
    Silent,
    /// Behaves silently, then vanishes after `reads` read calls.
    VanishAfter { reads: u32 },
}

impl MockBehavior {
    pub fn bootloader() -> Self {
        MockBehavior::Bootloader { then_firmata: true }
    }
}

/// Shared observable state for one mock port.
///
/// Links are moved into worker threads, so assertions go through this
/// shared handle rather than the link itself.
#[derive(Default)]
pub struct MockState {
    /// Bytes queued for the host to read
    inbox: Mutex<VecDeque<u8>>,
    /// Raw bytes the host wrote
    writes: Mutex<Vec<u8>>,
    /// Flash image received by the bootloader personality
    flashed: Mutex<Vec<u8>>,
    /// Pin modes set via SET_PIN_MODE
    pin_modes: Mutex<HashMap<u8, u8>>,
    /// Digital pin levels from DIGITAL_MESSAGE frames
    digital_pins: Mutex<HashMap<u8, bool>>,
    /// PWM duty cycles from ANALOG_MESSAGE frames
    pwm_pins: Mutex<HashMap<u8, u16>>,
    /// Times the port was opened
    open_count: AtomicU32,
    /// Device removed; all traffic fails with a disconnection
    vanished: AtomicBool,
    /// Bootloader completed a flash; next open speaks Firmata
    reflashed: AtomicBool,
}

/// A default uno-like pin table: 14 digital pins (six PWM-capable) and six
/// analog inputs on pins 14..19.
pub fn default_pins() -> Vec<Pin> {
    let pwm = [3u8, 5, 6, 9, 10, 11];
    let mut pins = Vec::new();
    for n in 0u8..14 {
        let mut modes = vec![
            PinMode::DigitalInput,
            PinMode::DigitalOutput,
            PinMode::Pullup,
        ];
        if pwm.contains(&n) {
            modes.push(PinMode::Pwm);
        }
        pins.push(Pin {
            number: n,
            modes,
            analog_channel: None,
        });
    }
    for ch in 0u8..6 {
        pins.push(Pin {
            number: 14 + ch,
            modes: vec![PinMode::DigitalInput, PinMode::DigitalOutput, PinMode::Analog],
            analog_channel: Some(ch),
        });
    }
    pins
}

/// One open mock link.
pub struct MockBoard {
    path: String,
    behavior: MockBehavior,
    state: Arc<MockState>,
    pins: Vec<Pin>,
    /// Unparsed host bytes
    parse_buf: Vec<u8>,
    reads_done: u32,
}

impl MockBoard {
    pub fn new(path: &str, behavior: MockBehavior) -> Self {
        Self::with_state(path, behavior, Arc::new(MockState::default()))
    }

    /// A board already running the expected firmware.
    pub fn firmata(path: &str) -> Self {
        Self::new(path, MockBehavior::Firmata)
    }

    fn with_state(path: &str, behavior: MockBehavior, state: Arc<MockState>) -> Self {
        Self {
            path: path.to_string(),
            behavior,
            state,
            pins: default_pins(),
            parse_buf: Vec::new(),
            reads_done: 0,
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }

    fn queue(&self, bytes: &[u8]) {
        self.state.inbox.lock().unwrap().extend(bytes.iter().copied());
    }

    fn handle_firmata_host_bytes(&mut self) {
        loop {
            let Some(&b0) = self.parse_buf.first() else {
                return;
            };
            match b0 {
                START_SYSEX => {
                    let Some(end) = self.parse_buf.iter().position(|&b| b == END_SYSEX) else {
                        return; // incomplete frame
                    };
                    let payload: Vec<u8> = self.parse_buf.drain(..=end).collect();
                    self.handle_sysex(&payload[1..payload.len() - 1]);
                }
                firmata::SET_PIN_MODE => {
                    if self.parse_buf.len() < 3 {
                        return;
                    }
                    let frame: Vec<u8> = self.parse_buf.drain(..3).collect();
                    self.state
                        .pin_modes
                        .lock()
                        .unwrap()
                        .insert(frame[1], frame[2]);
                }
                b if b & 0xF0 == firmata::DIGITAL_MESSAGE => {
                    if self.parse_buf.len() < 3 {
                        return;
                    }
                    let frame: Vec<u8> = self.parse_buf.drain(..3).collect();
                    let port = frame[0] & 0x0F;
                    let bits = frame[1] | ((frame[2] & 1) << 7);
                    let mut digital = self.state.digital_pins.lock().unwrap();
                    for i in 0..8u8 {
                        digital.insert(port * 8 + i, bits & (1 << i) != 0);
                    }
                }
                b if b & 0xF0 == firmata::ANALOG_MESSAGE => {
                    if self.parse_buf.len() < 3 {
                        return;
                    }
                    let frame: Vec<u8> = self.parse_buf.drain(..3).collect();
                    let pin = frame[0] & 0x0F;
                    let value = frame[1] as u16 | ((frame[2] as u16) << 7);
                    self.state.pwm_pins.lock().unwrap().insert(pin, value);
                }
                b if b & 0xF0 == firmata::REPORT_ANALOG || b & 0xF0 == firmata::REPORT_DIGITAL => {
                    if self.parse_buf.len() < 2 {
                        return;
                    }
                    self.parse_buf.drain(..2);
                }
                _ => {
                    self.parse_buf.remove(0);
                }
            }
        }
    }

    fn handle_sysex(&mut self, payload: &[u8]) {
        match payload.first() {
            Some(&firmata::SYSEX_QUERY_FIRMWARE) => {
                let mut reply = vec![START_SYSEX, firmata::SYSEX_QUERY_FIRMWARE, 2, 5];
                reply.extend(firmata::encode_two_byte_string("StandardFirmata.ino"));
                reply.push(END_SYSEX);
                self.queue(&reply);
            }
            Some(&firmata::SYSEX_CAPABILITY_QUERY) => {
                let mut reply = vec![START_SYSEX, firmata::SYSEX_CAPABILITY_RESPONSE];
                for pin in &self.pins {
                    for mode in &pin.modes {
                        reply.push(mode.to_firmata());
                        reply.push(if *mode == PinMode::Analog { 10 } else { 1 });
                    }
                    reply.push(0x7F);
                }
                reply.push(END_SYSEX);
                self.queue(&reply);
            }
            Some(&firmata::SYSEX_ANALOG_MAPPING_QUERY) => {
                let mut reply = vec![START_SYSEX, firmata::SYSEX_ANALOG_MAPPING_RESPONSE];
                for pin in &self.pins {
                    reply.push(pin.analog_channel.unwrap_or(127));
                }
                reply.push(END_SYSEX);
                self.queue(&reply);
            }
            _ => {}
        }
    }

    fn handle_bootloader_host_bytes(&mut self) {
        loop {
            let Some(&b0) = self.parse_buf.first() else {
                return;
            };
            match b0 {
                STK_GET_SYNC | STK_ENTER_PROGMODE => {
                    if self.parse_buf.len() < 2 {
                        return;
                    }
                    self.parse_buf.drain(..2);
                    self.queue(&[RESP_STK_INSYNC, RESP_STK_OK]);
                }
                STK_LEAVE_PROGMODE => {
                    if self.parse_buf.len() < 2 {
                        return;
                    }
                    self.parse_buf.drain(..2);
                    self.queue(&[RESP_STK_INSYNC, RESP_STK_OK]);
                    if !self.state.flashed.lock().unwrap().is_empty() {
                        self.state.reflashed.store(true, Ordering::SeqCst);
                    }
                }
                STK_LOAD_ADDRESS => {
                    if self.parse_buf.len() < 4 {
                        return;
                    }
                    self.parse_buf.drain(..4);
                    self.queue(&[RESP_STK_INSYNC, RESP_STK_OK]);
                }
                STK_PROG_PAGE => {
                    if self.parse_buf.len() < 4 {
                        return;
                    }
                    let len = ((self.parse_buf[1] as usize) << 8) | self.parse_buf[2] as usize;
                    let total = 4 + len + 1;
                    if self.parse_buf.len() < total {
                        return;
                    }
                    let frame: Vec<u8> = self.parse_buf.drain(..total).collect();
                    if *frame.last().unwrap() == CRC_EOP {
                        self.state
                            .flashed
                            .lock()
                            .unwrap()
                            .extend_from_slice(&frame[4..4 + len]);
                        self.queue(&[RESP_STK_INSYNC, RESP_STK_OK]);
                    }
                }
                _ => {
                    self.parse_buf.remove(0);
                }
            }
        }
    }
}

impl BoardLink for MockBoard {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state.vanished.load(Ordering::SeqCst) {
            return Err(PinflowError::PortDisconnected(self.path.clone()));
        }
        self.state.writes.lock().unwrap().extend_from_slice(data);
        self.parse_buf.extend_from_slice(data);

        match self.behavior {
            MockBehavior::Firmata => self.handle_firmata_host_bytes(),
            MockBehavior::Bootloader { .. } => self.handle_bootloader_host_bytes(),
            MockBehavior::Silent | MockBehavior::VanishAfter { .. } => self.parse_buf.clear(),
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.state.vanished.load(Ordering::SeqCst) {
            return Err(PinflowError::PortDisconnected(self.path.clone()));
        }
        if let MockBehavior::VanishAfter { reads } = self.behavior {
            self.reads_done += 1;
            if self.reads_done > reads {
                self.state.vanished.store(true, Ordering::SeqCst);
                return Err(PinflowError::PortDisconnected(self.path.clone()));
            }
        }

        let mut inbox = self.state.inbox.lock().unwrap();
        if inbox.is_empty() {
            drop(inbox);
            std::thread::sleep(timeout.min(Duration::from_millis(2)));
            return Ok(0);
        }
        let n = buf.len().min(inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().unwrap();
        }
        Ok(n)
    }

    fn pulse_reset(&mut self) -> Result<()> {
        if self.state.vanished.load(Ordering::SeqCst) {
            return Err(PinflowError::PortDisconnected(self.path.clone()));
        }
        // A reset restarts the conversation.
        self.parse_buf.clear();
        self.state.inbox.lock().unwrap().clear();
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.path
    }
}

struct MockEntry {
    behavior: MockBehavior,
    product_id: u16,
    state: Arc<MockState>,
}

/// Factory exposing a configurable set of mock ports.
#[derive(Clone, Default)]
pub struct MockFactory {
    entries: Arc<Mutex<HashMap<String, MockEntry>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(path: &str, product_id: u16, behavior: MockBehavior) -> Self {
        let factory = Self::new();
        factory.add_board(path, product_id, behavior);
        factory
    }

    pub fn add_board(&self, path: &str, product_id: u16, behavior: MockBehavior) {
        self.entries.lock().unwrap().insert(
            path.to_string(),
            MockEntry {
                behavior,
                product_id,
                state: Arc::new(MockState::default()),
            },
        );
    }

    /// Simulate the device being unplugged: it disappears from enumeration
    /// and live links start failing with disconnections.
    pub fn unplug(&self, path: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get(path) {
            entry.state.vanished.store(true, Ordering::SeqCst);
        }
    }

    /// Queue an analog reading for the host to receive.
    pub fn push_analog(&self, path: &str, channel: u8, value: u16) {
        if let Some(entry) = self.entries.lock().unwrap().get(path) {
            let frame = [
                firmata::ANALOG_MESSAGE | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ];
            entry.state.inbox.lock().unwrap().extend(frame);
        }
    }

    /// Queue a digital port report for the host to receive.
    pub fn push_digital(&self, path: &str, port: u8, bits: u8) {
        if let Some(entry) = self.entries.lock().unwrap().get(path) {
            let frame = firmata::digital_write(port, bits);
            entry.state.inbox.lock().unwrap().extend(frame);
        }
    }

    pub fn flashed_bytes(&self, path: &str) -> Vec<u8> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|e| e.state.flashed.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self, path: &str) -> u32 {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|e| e.state.open_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn digital_pin(&self, path: &str, pin: u8) -> Option<bool> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .and_then(|e| e.state.digital_pins.lock().unwrap().get(&pin).copied())
    }

    pub fn pin_mode(&self, path: &str, pin: u8) -> Option<u8> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .and_then(|e| e.state.pin_modes.lock().unwrap().get(&pin).copied())
    }

    pub fn pwm_value(&self, path: &str, pin: u8) -> Option<u16> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .and_then(|e| e.state.pwm_pins.lock().unwrap().get(&pin).copied())
    }
}

impl LinkFactory for MockFactory {
    fn open(&self, path: &str, _baud: u32) -> Result<Box<dyn BoardLink>> {
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(path) else {
            return Err(PinflowError::PortDisconnected(path.to_string()));
        };
        if entry.state.vanished.load(Ordering::SeqCst) {
            return Err(PinflowError::PortDisconnected(path.to_string()));
        }
        entry.state.open_count.fetch_add(1, Ordering::SeqCst);

        // A completed reflash leaves the board speaking Firmata.
        let behavior = match entry.behavior {
            MockBehavior::Bootloader { then_firmata: true }
                if entry.state.reflashed.load(Ordering::SeqCst) =>
            {
                MockBehavior::Firmata
            }
            b => b,
        };

        Ok(Box::new(MockBoard::with_state(
            path,
            behavior,
            entry.state.clone(),
        )))
    }

    fn list_ports(&self) -> Vec<Port> {
        let entries = self.entries.lock().unwrap();
        let mut ports: Vec<Port> = entries
            .iter()
            .filter(|(_, e)| !e.state.vanished.load(Ordering::SeqCst))
            .map(|(path, e)| Port {
                path: path.clone(),
                vendor_id: Some(0x2341),
                product_id: Some(e.product_id),
            })
            .collect();
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_firmata_handshake() {
        let mut board = MockBoard::firmata("/dev/mock0");
        board.write(&firmata::query_firmware()).unwrap();

        let mut buf = [0u8; 128];
        let n = board.read(&mut buf, Duration::from_millis(10)).unwrap();
        let mut decoder = firmata::Decoder::new();
        let events = decoder.feed(&buf[..n]);
        assert!(matches!(
            events.first(),
            Some(firmata::FirmataEvent::Firmware { .. })
        ));
    }

    #[test]
    fn test_mock_records_digital_writes() {
        let mut board = MockBoard::firmata("/dev/mock0");
        // Pin 13 on, rest of port 1 off.
        board.write(&firmata::digital_write(1, 1 << 5)).unwrap();
        assert_eq!(
            board.state().digital_pins.lock().unwrap().get(&13),
            Some(&true)
        );
    }

    #[test]
    fn test_mock_unplug_disconnects_live_links() {
        let factory = MockFactory::with_board("/dev/mock0", 0x0043, MockBehavior::Firmata);
        let mut link = factory.open("/dev/mock0", 57_600).unwrap();

        factory.unplug("/dev/mock0");
        assert!(factory.list_ports().is_empty());

        let err = link.write(&[0x00]).unwrap_err();
        assert!(err.is_disconnection());
        assert!(factory.open("/dev/mock0", 57_600).is_err());
    }
}
