//! Board layer: everything that touches the physical device
//!
//! - [`registry`] - Static table of known board identities
//! - [`scanner`] - Serial port enumeration and registry matching
//! - [`link`] - Byte transport trait and the real serial implementation
//! - [`firmata`] - Firmata wire protocol encode/decode
//! - [`probe`] - Short-lived worker deciding ready / needs-flash / unreachable
//! - [`flasher`] - STK500v1 firmware writer
//! - [`mock`] - In-memory board for hardware-free tests (test/mock-board only)

pub mod firmata;
pub mod flasher;
pub mod link;
#[cfg(any(test, feature = "mock-board"))]
pub mod mock;
pub mod probe;
pub mod registry;
pub mod scanner;

pub use link::{BoardLink, LinkFactory, SerialLinkFactory};
pub use registry::{BoardIdentity, BOARDS};
pub use scanner::Port;
