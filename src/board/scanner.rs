//! Serial port enumeration and board matching
//!
//! `list_ports` is a pure enumeration, side-effect-free and safe to call
//! frequently — it backs both one-shot discovery and the health monitor's
//! polling fallback.

use crate::board::registry::{BoardIdentity, BOARDS};
use serde::{Deserialize, Serialize};

/// A discovered serial port. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// System path, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

/// Enumerate serial ports currently present on the system.
///
/// Enumeration failures degrade to an empty list; callers treat that as
/// "no boards found", which is retryable.
pub fn list_ports() -> Vec<Port> {
    let infos = match serialport::available_ports() {
        Ok(infos) => infos,
        Err(e) => {
            tracing::warn!("Serial enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut ports: Vec<Port> = infos
        .into_iter()
        .map(|info| {
            let (vendor_id, product_id) = match &info.port_type {
                serialport::SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid)),
                _ => (None, None),
            };
            Port {
                path: info.port_name,
                vendor_id,
                product_id,
            }
        })
        .collect();

    // Stable enumeration order across polls.
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    ports
}

/// Match ports against the device registry.
///
/// Returns one entry per known board that matched at least one port, in
/// registry declaration order; within an entry, ports keep enumeration
/// order. An empty result means "no boards found" — terminal but
/// retryable, not an error.
pub fn match_boards(ports: &[Port]) -> Vec<(&'static BoardIdentity, Vec<Port>)> {
    let mut matches = Vec::new();

    for board in BOARDS {
        let candidates: Vec<Port> = ports
            .iter()
            .filter(|p| {
                p.product_id
                    .map(|pid| board.matches_product_id(pid))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if !candidates.is_empty() {
            matches.push((board, candidates));
        }
    }

    matches
}
