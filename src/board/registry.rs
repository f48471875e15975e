//! Static device registry
//!
//! Maps known board identities to their USB product-id signatures and
//! firmware artifacts. The table is declared at build time; trial order
//! during discovery is declaration order.

use crate::error::{PinflowError, Result};
use std::path::{Path, PathBuf};

/// Bootloader parameters for the STK500v1 protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bootloader {
    /// Baud rate the bootloader listens at after a reset pulse
    pub baud: u32,
    /// Flash page size in bytes
    pub page_size: usize,
}

/// A known board identity.
///
/// Immutable; the firmware artifact lives at
/// `<firmware_dir>/<name>/<firmware>`.
#[derive(Debug)]
pub struct BoardIdentity {
    pub name: &'static str,
    /// USB product-id signatures, lowercase hex without a 0x prefix
    pub product_ids: &'static [&'static str],
    /// Firmware image file name (Intel HEX)
    pub firmware: &'static str,
    pub bootloader: Bootloader,
    /// Baud rate the flashed firmware communicates at
    pub runtime_baud: u32,
}

/// All known boards, in trial order.
pub static BOARDS: &[BoardIdentity] = &[
    BoardIdentity {
        name: "uno",
        product_ids: &["0043", "7523", "0001", "ea60", "6015"],
        firmware: "StandardFirmata.cpp.hex",
        bootloader: Bootloader {
            baud: 115_200,
            page_size: 128,
        },
        runtime_baud: 57_600,
    },
    BoardIdentity {
        name: "nano",
        product_ids: &["6001", "7523"],
        firmware: "StandardFirmata.cpp.hex",
        bootloader: Bootloader {
            baud: 57_600,
            page_size: 128,
        },
        runtime_baud: 57_600,
    },
    BoardIdentity {
        name: "diecimila",
        product_ids: &["6001"],
        firmware: "StandardFirmata.cpp.hex",
        bootloader: Bootloader {
            baud: 19_200,
            page_size: 128,
        },
        runtime_baud: 57_600,
    },
];

impl BoardIdentity {
    /// Case-insensitive match of a USB product id against this identity's
    /// signature set.
    pub fn matches_product_id(&self, product_id: u16) -> bool {
        let hex = format!("{:04x}", product_id);
        self.product_ids.iter().any(|sig| sig.eq_ignore_ascii_case(&hex))
    }

    /// Path of this board's firmware image under `firmware_dir`.
    pub fn firmware_path(&self, firmware_dir: &Path) -> PathBuf {
        firmware_dir.join(self.name).join(self.firmware)
    }

    /// Resolve the firmware image, failing hard if it is missing on disk.
    pub fn resolve_firmware(&self, firmware_dir: &Path) -> Result<PathBuf> {
        let path = self.firmware_path(firmware_dir);
        if !path.is_file() {
            return Err(PinflowError::FirmwareMissing(path));
        }
        Ok(path)
    }
}

/// Look up a board identity by name.
pub fn find(name: &str) -> Option<&'static BoardIdentity> {
    BOARDS.iter().find(|b| b.name == name)
}
