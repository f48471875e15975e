//! Firmata wire protocol
//!
//! Message encoding and an incremental decoder for the subset of Firmata the
//! prober and runner need: the firmware/capability handshake, pin mode and
//! output writes, and analog/digital report streams. All payload bytes are
//! 7-bit; multibyte values travel as LSB/MSB pairs.

use crate::types::{Pin, PinMode};

pub const START_SYSEX: u8 = 0xF0;
pub const END_SYSEX: u8 = 0xF7;
pub const SET_PIN_MODE: u8 = 0xF4;
pub const REPORT_VERSION: u8 = 0xF9;
pub const SYSTEM_RESET: u8 = 0xFF;
pub const DIGITAL_MESSAGE: u8 = 0x90;
pub const ANALOG_MESSAGE: u8 = 0xE0;
pub const REPORT_ANALOG: u8 = 0xC0;
pub const REPORT_DIGITAL: u8 = 0xD0;

pub const SYSEX_QUERY_FIRMWARE: u8 = 0x79;
pub const SYSEX_CAPABILITY_QUERY: u8 = 0x6B;
pub const SYSEX_CAPABILITY_RESPONSE: u8 = 0x6C;
pub const SYSEX_ANALOG_MAPPING_QUERY: u8 = 0x69;
pub const SYSEX_ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
pub const SYSEX_STRING_DATA: u8 = 0x71;
pub const SYSEX_EXTENDED_ANALOG: u8 = 0x6F;

/// Sentinel in an analog mapping response for "not analog-capable".
const NOT_ANALOG: u8 = 127;

/// A decoded inbound Firmata message.
#[derive(Debug, Clone, PartialEq)]
pub enum FirmataEvent {
    /// Protocol version report (sent by boards on reset)
    ProtocolVersion { major: u8, minor: u8 },
    /// Firmware name/version — proof the board runs the expected firmware
    Firmware {
        major: u8,
        minor: u8,
        name: String,
    },
    /// Capability table: per-pin supported modes
    Capabilities(Vec<Pin>),
    /// Per-pin analog channel mapping
    AnalogMapping(Vec<Option<u8>>),
    /// 10-bit analog reading on a channel
    Analog { channel: u8, value: u16 },
    /// Digital port state bitmap (8 pins per port)
    Digital { port: u8, bits: u8 },
    /// Free-form text from the board
    Text(String),
}

// ---- encoding ----

pub fn query_firmware() -> [u8; 3] {
    [START_SYSEX, SYSEX_QUERY_FIRMWARE, END_SYSEX]
}

pub fn query_capabilities() -> [u8; 3] {
    [START_SYSEX, SYSEX_CAPABILITY_QUERY, END_SYSEX]
}

pub fn query_analog_mapping() -> [u8; 3] {
    [START_SYSEX, SYSEX_ANALOG_MAPPING_QUERY, END_SYSEX]
}

pub fn set_pin_mode(pin: u8, mode: PinMode) -> [u8; 3] {
    [SET_PIN_MODE, pin & 0x7F, mode.to_firmata()]
}

/// Write a full digital port (8 pins) as a 14-bit bitmap.
pub fn digital_write(port: u8, bits: u8) -> [u8; 3] {
    [
        DIGITAL_MESSAGE | (port & 0x0F),
        bits & 0x7F,
        (bits >> 7) & 0x7F,
    ]
}

/// PWM/analog write. Pins above 15 use the extended analog sysex.
pub fn analog_write(pin: u8, value: u16) -> Vec<u8> {
    if pin <= 15 {
        vec![
            ANALOG_MESSAGE | (pin & 0x0F),
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
        ]
    } else {
        vec![
            START_SYSEX,
            SYSEX_EXTENDED_ANALOG,
            pin & 0x7F,
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
            END_SYSEX,
        ]
    }
}

pub fn report_analog(channel: u8, enabled: bool) -> [u8; 2] {
    [REPORT_ANALOG | (channel & 0x0F), enabled as u8]
}

pub fn report_digital(port: u8, enabled: bool) -> [u8; 2] {
    [REPORT_DIGITAL | (port & 0x0F), enabled as u8]
}

pub fn system_reset() -> [u8; 1] {
    [SYSTEM_RESET]
}

// ---- decoding ----

#[derive(Debug)]
enum DecodeState {
    Idle,
    /// Fixed-length command: opcode byte seen, collecting data bytes
    Fixed { command: u8, channel: u8, buf: Vec<u8>, needed: usize },
    /// Inside a sysex frame, collecting until END_SYSEX
    Sysex { buf: Vec<u8> },
}

/// Incremental Firmata decoder.
///
/// Feed raw bytes as they arrive; complete messages come out as events.
/// Unknown commands and malformed sysex payloads are skipped, not errors —
/// a mis-flashed board emitting garbage must not wedge the prober.
pub struct Decoder {
    state: DecodeState,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Idle,
        }
    }

    /// Feed a chunk of bytes, returning all events completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FirmataEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            if let Some(ev) = self.push(b) {
                events.push(ev);
            }
        }
        events
    }

    fn push(&mut self, byte: u8) -> Option<FirmataEvent> {
        match &mut self.state {
            DecodeState::Idle => {
                match byte {
                    START_SYSEX => {
                        self.state = DecodeState::Sysex { buf: Vec::new() };
                    }
                    REPORT_VERSION => {
                        self.state = DecodeState::Fixed {
                            command: REPORT_VERSION,
                            channel: 0,
                            buf: Vec::new(),
                            needed: 2,
                        };
                    }
                    b if b & 0xF0 == ANALOG_MESSAGE => {
                        self.state = DecodeState::Fixed {
                            command: ANALOG_MESSAGE,
                            channel: b & 0x0F,
                            buf: Vec::new(),
                            needed: 2,
                        };
                    }
                    b if b & 0xF0 == DIGITAL_MESSAGE => {
                        self.state = DecodeState::Fixed {
                            command: DIGITAL_MESSAGE,
                            channel: b & 0x0F,
                            buf: Vec::new(),
                            needed: 2,
                        };
                    }
                    // Data byte with no active command, or a command we do
                    // not track: skip.
                    _ => {}
                }
                None
            }
            DecodeState::Fixed {
                command,
                channel,
                buf,
                needed,
            } => {
                buf.push(byte & 0x7F);
                if buf.len() < *needed {
                    return None;
                }
                let (command, channel) = (*command, *channel);
                let data = std::mem::take(buf);
                self.state = DecodeState::Idle;
                Some(match command {
                    REPORT_VERSION => FirmataEvent::ProtocolVersion {
                        major: data[0],
                        minor: data[1],
                    },
                    ANALOG_MESSAGE => FirmataEvent::Analog {
                        channel,
                        value: data[0] as u16 | ((data[1] as u16) << 7),
                    },
                    DIGITAL_MESSAGE => FirmataEvent::Digital {
                        port: channel,
                        bits: data[0] | ((data[1] & 1) << 7),
                    },
                    _ => return None,
                })
            }
            DecodeState::Sysex { buf } => {
                if byte != END_SYSEX {
                    buf.push(byte);
                    return None;
                }
                let payload = std::mem::take(buf);
                self.state = DecodeState::Idle;
                decode_sysex(&payload)
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_sysex(payload: &[u8]) -> Option<FirmataEvent> {
    let (&id, body) = payload.split_first()?;
    match id {
        SYSEX_QUERY_FIRMWARE => {
            if body.len() < 2 {
                return None;
            }
            Some(FirmataEvent::Firmware {
                major: body[0],
                minor: body[1],
                name: decode_two_byte_string(&body[2..]),
            })
        }
        SYSEX_CAPABILITY_RESPONSE => Some(FirmataEvent::Capabilities(decode_capabilities(body))),
        SYSEX_ANALOG_MAPPING_RESPONSE => Some(FirmataEvent::AnalogMapping(
            body.iter()
                .map(|&b| if b == NOT_ANALOG { None } else { Some(b) })
                .collect(),
        )),
        SYSEX_STRING_DATA => Some(FirmataEvent::Text(decode_two_byte_string(body))),
        _ => None,
    }
}

/// Capability response: per pin, (mode, resolution) pairs terminated by 0x7F.
fn decode_capabilities(body: &[u8]) -> Vec<Pin> {
    let mut pins = Vec::new();
    let mut modes = Vec::new();
    let mut iter = body.iter().copied();

    loop {
        match iter.next() {
            Some(0x7F) => {
                pins.push(Pin {
                    number: pins.len() as u8,
                    modes: std::mem::take(&mut modes),
                    analog_channel: None,
                });
            }
            Some(mode) => {
                // Resolution byte follows each mode; we only keep the mode.
                let _resolution = iter.next();
                modes.push(PinMode::from_firmata(mode));
            }
            None => break,
        }
    }

    pins
}

/// Strings travel as two 7-bit bytes per character, LSB first.
fn decode_two_byte_string(body: &[u8]) -> String {
    body.chunks(2)
        .map(|pair| {
            let lo = pair[0] as u16;
            let hi = pair.get(1).copied().unwrap_or(0) as u16;
            char::from_u32((lo | (hi << 7)) as u32).unwrap_or('\u{FFFD}')
        })
        .collect()
}

/// Encode a string as two 7-bit bytes per character (for mock boards).
pub fn encode_two_byte_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for c in s.chars() {
        let v = c as u32 as u16;
        out.push((v & 0x7F) as u8);
        out.push(((v >> 7) & 0x7F) as u8);
    }
    out
}

/// Attach analog channel indices from a mapping response to a pin set.
pub fn apply_analog_mapping(pins: &mut [Pin], mapping: &[Option<u8>]) {
    for (pin, channel) in pins.iter_mut().zip(mapping.iter()) {
        pin.analog_channel = *channel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_protocol_version() {
        let mut dec = Decoder::new();
        let events = dec.feed(&[REPORT_VERSION, 2, 5]);
        assert_eq!(
            events,
            vec![FirmataEvent::ProtocolVersion { major: 2, minor: 5 }]
        );
    }

    #[test]
    fn test_decode_firmware_report() {
        let mut frame = vec![START_SYSEX, SYSEX_QUERY_FIRMWARE, 2, 5];
        frame.extend(encode_two_byte_string("StandardFirmata"));
        frame.push(END_SYSEX);

        let mut dec = Decoder::new();
        let events = dec.feed(&frame);
        assert_eq!(
            events,
            vec![FirmataEvent::Firmware {
                major: 2,
                minor: 5,
                name: "StandardFirmata".to_string(),
            }]
        );
    }

    #[test]
    fn test_decode_capabilities_and_mapping() {
        // Pin 0: digital in/out; pin 1: digital in/out + analog.
        let frame = vec![
            START_SYSEX,
            SYSEX_CAPABILITY_RESPONSE,
            0x00, 1, 0x01, 1, 0x7F, // pin 0
            0x00, 1, 0x01, 1, 0x02, 10, 0x7F, // pin 1
            END_SYSEX,
        ];
        let mut dec = Decoder::new();
        let events = dec.feed(&frame);
        let mut pins = match &events[0] {
            FirmataEvent::Capabilities(pins) => pins.clone(),
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(pins.len(), 2);
        assert!(pins[1].supports(PinMode::Analog));
        assert!(!pins[0].supports(PinMode::Analog));

        apply_analog_mapping(&mut pins, &[None, Some(0)]);
        assert_eq!(pins[0].analog_channel, None);
        assert_eq!(pins[1].analog_channel, Some(0));
    }

    #[test]
    fn test_decode_analog_message_split_across_feeds() {
        let mut dec = Decoder::new();
        assert!(dec.feed(&[ANALOG_MESSAGE | 3]).is_empty());
        assert!(dec.feed(&[0x7F]).is_empty());
        let events = dec.feed(&[0x07]);
        assert_eq!(
            events,
            vec![FirmataEvent::Analog {
                channel: 3,
                value: 0x7F | (0x07 << 7),
            }]
        );
    }

    #[test]
    fn test_decoder_skips_garbage() {
        let mut dec = Decoder::new();
        let mut bytes = vec![0x00, 0x42, 0x13]; // noise
        bytes.extend([REPORT_VERSION, 2, 3]);
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_digital_write_encoding() {
        // Pin 13 lives in port 1, bit 5.
        let bits = 1 << 5;
        assert_eq!(digital_write(1, bits), [DIGITAL_MESSAGE | 1, bits, 0]);
    }

    #[test]
    fn test_analog_write_extended_for_high_pins() {
        assert_eq!(analog_write(3, 255).len(), 3);
        let ext = analog_write(22, 255);
        assert_eq!(ext[0], START_SYSEX);
        assert_eq!(ext[1], SYSEX_EXTENDED_ANALOG);
        assert_eq!(*ext.last().unwrap(), END_SYSEX);
    }
}
