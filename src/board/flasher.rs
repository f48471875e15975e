//! Firmware flasher
//!
//! Writes a known-good Firmata image to a matched, unresponsive board using
//! the STK500v1 protocol spoken by Arduino-family bootloaders. Callers must
//! hold the port exclusively (any prior probe or runner killed) and must
//! re-probe the port after a successful flash before trusting it.
//!
//! Error discipline: a port that disappears mid-flash propagates as
//! [`PinflowError::PortDisconnected`], never as a flash defect. Protocol
//! failures retry up to the configured bound, and only while the port still
//! enumerates.

use crate::board::link::LinkFactory;
use crate::board::registry::BoardIdentity;
use crate::config::FlashConfig;
use crate::error::{PinflowError, Result};
use std::time::Duration;

// STK500v1 opcodes and responses
const STK_GET_SYNC: u8 = 0x30;
const STK_ENTER_PROGMODE: u8 = 0x50;
const STK_LEAVE_PROGMODE: u8 = 0x51;
const STK_LOAD_ADDRESS: u8 = 0x55;
const STK_PROG_PAGE: u8 = 0x64;
const CRC_EOP: u8 = 0x20;
const RESP_STK_INSYNC: u8 = 0x14;
const RESP_STK_OK: u8 = 0x10;

/// Memory type tag for flash in `PROG_PAGE`
const MEM_FLASH: u8 = b'F';

/// Flash a board's registered firmware image onto `port`.
///
/// Preconditions: no other worker holds the port. The image path is
/// resolved through the registry; a missing file is a hard failure before
/// any serial traffic happens.
pub fn flash(
    factory: &dyn LinkFactory,
    board: &BoardIdentity,
    port: &str,
    config: &FlashConfig,
) -> Result<()> {
    let image_path = board.resolve_firmware(&config.firmware_dir)?;
    let text = std::fs::read_to_string(&image_path)?;
    let image = parse_intel_hex(&text)?;

    tracing::info!(
        "Flashing {} ({} bytes) to {} on {}",
        image_path.display(),
        image.len(),
        board.name,
        port
    );

    let mut last_err = None;
    for attempt in 1..=config.max_retries {
        match flash_once(factory, board, port, config, &image) {
            Ok(()) => {
                tracing::info!("Flash of {} succeeded on attempt {}", board.name, attempt);
                return Ok(());
            }
            Err(e) if e.is_disconnection() => {
                // The device vanished: recovery is rediscovery, not retry.
                return Err(PinflowError::PortDisconnected(port.to_string()));
            }
            Err(e) => {
                tracing::warn!("Flash attempt {} on {} failed: {}", attempt, port, e);
                last_err = Some(e);
                // Retrying is only meaningful while the port still exists.
                let still_present = factory.list_ports().iter().any(|p| p.path == port);
                if !still_present {
                    return Err(PinflowError::PortDisconnected(port.to_string()));
                }
            }
        }
    }

    Err(PinflowError::FlashFailure {
        port: port.to_string(),
        message: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "exhausted retries".to_string()),
    })
}

/// One complete programming attempt: reset, sync, program, verify-free exit.
fn flash_once(
    factory: &dyn LinkFactory,
    board: &BoardIdentity,
    port: &str,
    config: &FlashConfig,
    image: &[u8],
) -> Result<()> {
    let mut link = factory.open(port, board.bootloader.baud)?;

    link.pulse_reset()?;

    // Sync loop: the bootloader only listens briefly after reset.
    let mut synced = false;
    for _ in 0..config.sync_attempts.max(1) {
        link.write(&[STK_GET_SYNC, CRC_EOP])?;
        match read_reply(link.as_mut(), port) {
            Ok(()) => {
                synced = true;
                break;
            }
            Err(e) if e.is_disconnection() => return Err(e),
            Err(_) => continue,
        }
    }
    if !synced {
        return Err(PinflowError::FlashFailure {
            port: port.to_string(),
            message: "bootloader did not sync".to_string(),
        });
    }

    link.write(&[STK_ENTER_PROGMODE, CRC_EOP])?;
    read_reply(link.as_mut(), port)?;

    let page_size = board.bootloader.page_size;
    for (index, page) in image.chunks(page_size).enumerate() {
        // STK500 addresses flash in 16-bit words.
        let word_address = (index * page_size / 2) as u16;
        link.write(&[
            STK_LOAD_ADDRESS,
            (word_address & 0xFF) as u8,
            (word_address >> 8) as u8,
            CRC_EOP,
        ])?;
        read_reply(link.as_mut(), port)?;

        let mut frame = Vec::with_capacity(page.len() + 5);
        frame.extend([
            STK_PROG_PAGE,
            (page.len() >> 8) as u8,
            (page.len() & 0xFF) as u8,
            MEM_FLASH,
        ]);
        frame.extend_from_slice(page);
        frame.push(CRC_EOP);
        link.write(&frame)?;
        read_reply(link.as_mut(), port)?;
    }

    link.write(&[STK_LEAVE_PROGMODE, CRC_EOP])?;
    read_reply(link.as_mut(), port)?;

    Ok(())
}

/// Read the two-byte INSYNC/OK acknowledgement.
fn read_reply(link: &mut dyn crate::board::link::BoardLink, port: &str) -> Result<()> {
    let mut reply = [0u8; 2];
    let mut got = 0;
    while got < 2 {
        let n = link.read(&mut reply[got..], Duration::from_millis(400))?;
        if n == 0 {
            return Err(PinflowError::FlashFailure {
                port: port.to_string(),
                message: "bootloader reply timed out".to_string(),
            });
        }
        got += n;
    }

    if reply != [RESP_STK_INSYNC, RESP_STK_OK] {
        return Err(PinflowError::FlashFailure {
            port: port.to_string(),
            message: format!("bootloader out of sync: {:02x?}", reply),
        });
    }
    Ok(())
}

/// Parse an Intel HEX image into a contiguous byte vector.
///
/// Supports the record types StandardFirmata images use: data (00), EOF
/// (01), extended segment (02) and extended linear address (04). Gaps are
/// filled with 0xFF, the erased-flash value.
pub fn parse_intel_hex(text: &str) -> Result<Vec<u8>> {
    let mut image: Vec<u8> = Vec::new();
    let mut base: u32 = 0;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(record) = line.strip_prefix(':') else {
            return Err(invalid_hex(lineno, "missing ':' prefix"));
        };

        let bytes = decode_hex(record).ok_or_else(|| invalid_hex(lineno, "bad hex digits"))?;
        if bytes.len() < 5 {
            return Err(invalid_hex(lineno, "record too short"));
        }

        let checksum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if checksum != 0 {
            return Err(invalid_hex(lineno, "checksum mismatch"));
        }

        let count = bytes[0] as usize;
        let offset = ((bytes[1] as u32) << 8) | bytes[2] as u32;
        let kind = bytes[3];
        let data = &bytes[4..bytes.len() - 1];
        if data.len() != count {
            return Err(invalid_hex(lineno, "length mismatch"));
        }

        match kind {
            0x00 => {
                let start = (base + offset) as usize;
                let end = start + data.len();
                if image.len() < end {
                    image.resize(end, 0xFF);
                }
                image[start..end].copy_from_slice(data);
            }
            0x01 => return Ok(image),
            0x02 => {
                if data.len() != 2 {
                    return Err(invalid_hex(lineno, "bad segment record"));
                }
                base = (((data[0] as u32) << 8) | data[1] as u32) << 4;
            }
            0x04 => {
                if data.len() != 2 {
                    return Err(invalid_hex(lineno, "bad linear address record"));
                }
                base = (((data[0] as u32) << 8) | data[1] as u32) << 16;
            }
            other => {
                tracing::debug!("Skipping hex record type {:#04x}", other);
            }
        }
    }

    Err(PinflowError::FirmwareInvalid(
        "missing end-of-file record".to_string(),
    ))
}

fn invalid_hex(lineno: usize, reason: &str) -> PinflowError {
    PinflowError::FirmwareInvalid(format!("line {}: {}", lineno + 1, reason))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
