//! Board prober
//!
//! A probe is a short-lived worker bound to exactly one port. It walks
//! `connecting → probing → terminal` and reports exactly one
//! [`ProbeOutcome`] before exiting. Probes across candidate ports are
//! strictly sequential; the supervisor hard-kills any previous probe before
//! starting a new one, since only one worker may hold the serial resource.
//!
//! The Firmata handshake itself is shared with the runner, which performs
//! the same exchange to gate program start on board readiness.

use crate::board::firmata::{self, Decoder, FirmataEvent};
use crate::board::link::BoardLink;
use crate::config::ProbeConfig;
use crate::types::{Pin, ProbeOutcome};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Result of one Firmata handshake attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeOutcome {
    /// Full pin table received; the board runs the expected firmware.
    Ready(Vec<Pin>),
    /// No complete handshake within the window.
    TimedOut,
    /// The port vanished mid-handshake.
    Disconnected,
    /// Cancelled from outside, or an unclassified transport failure.
    Aborted,
}

/// Drive the Firmata readiness handshake on an open link.
///
/// Queries the firmware report on `retry` intervals; once the board
/// identifies itself, fetches the capability table and analog mapping.
/// Returns `Ready` only when the full pin set is known.
pub fn firmata_handshake(
    link: &mut dyn BoardLink,
    window: Duration,
    retry: Duration,
    cancel: Option<&AtomicBool>,
) -> HandshakeOutcome {
    let deadline = Instant::now() + window;
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 256];

    let mut saw_firmware = false;
    let mut queried_capabilities = false;
    let mut pins: Option<Vec<Pin>> = None;
    let mut mapping: Option<Vec<Option<u8>>> = None;
    let mut last_query: Option<Instant> = None;

    while Instant::now() < deadline {
        if cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false) {
            return HandshakeOutcome::Aborted;
        }

        let due = last_query.map(|t| t.elapsed() >= retry).unwrap_or(true);
        if !saw_firmware && due {
            if link.write(&firmata::query_firmware()).is_err() {
                return HandshakeOutcome::Disconnected;
            }
            last_query = Some(Instant::now());
        }

        let n = match link.read(&mut buf, Duration::from_millis(25)) {
            Ok(n) => n,
            Err(e) if e.is_disconnection() => return HandshakeOutcome::Disconnected,
            Err(e) => {
                tracing::warn!("Handshake read error on {}: {}", link.port_name(), e);
                return HandshakeOutcome::Aborted;
            }
        };

        for event in decoder.feed(&buf[..n]) {
            match event {
                FirmataEvent::Firmware { name, major, minor } => {
                    tracing::debug!(
                        "{} reports firmware {} v{}.{}",
                        link.port_name(),
                        name,
                        major,
                        minor
                    );
                    saw_firmware = true;
                    if !queried_capabilities {
                        queried_capabilities = true;
                        let mut query = firmata::query_capabilities().to_vec();
                        query.extend(firmata::query_analog_mapping());
                        if link.write(&query).is_err() {
                            return HandshakeOutcome::Disconnected;
                        }
                    }
                }
                FirmataEvent::Capabilities(p) => pins = Some(p),
                FirmataEvent::AnalogMapping(m) => mapping = Some(m),
                // Version reports and stray data are fine during boot.
                _ => {}
            }
        }

        if pins.is_some() && mapping.is_some() {
            let mut pin_set = pins.take().unwrap();
            firmata::apply_analog_mapping(&mut pin_set, &mapping.take().unwrap());
            return HandshakeOutcome::Ready(pin_set);
        }
    }

    HandshakeOutcome::TimedOut
}

/// Handle to an in-flight probe worker.
pub struct ProbeHandle {
    outcome_rx: Receiver<ProbeOutcome>,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    port: String,
}

impl ProbeHandle {
    /// Wait up to `timeout` for the terminal outcome.
    ///
    /// Returns `None` if the worker produced nothing in time; callers must
    /// then [`ProbeHandle::kill`] it and treat the port as unreachable.
    pub fn wait(&self, timeout: Duration) -> Option<ProbeOutcome> {
        self.outcome_rx.recv_timeout(timeout).ok()
    }

    /// Poll for the terminal outcome without blocking.
    pub fn try_wait(&self) -> Option<ProbeOutcome> {
        self.outcome_rx.try_recv().ok()
    }

    /// Hard-kill the worker and wait for it to release the port.
    ///
    /// Synchronous: after return, no probe thread holds the serial handle.
    pub fn kill(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("Probe worker for {} panicked", self.port);
            }
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn a probe worker on an already-opened link.
///
/// The link moves into the worker thread; the caller keeps only the handle.
pub fn spawn(link: Box<dyn BoardLink>, config: ProbeConfig) -> ProbeHandle {
    let (outcome_tx, outcome_rx) = bounded(1);
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = cancel.clone();
    let port = link.port_name().to_string();
    let thread_port = port.clone();

    let join = std::thread::Builder::new()
        .name(format!("probe-{}", port))
        .spawn(move || {
            let outcome = run_probe(link, &config, &cancel_flag);
            tracing::debug!("Probe of {} finished: {:?}", thread_port, outcome);
            let _ = outcome_tx.send(outcome);
        })
        .expect("spawn probe thread");

    ProbeHandle {
        outcome_rx,
        cancel,
        join: Some(join),
        port,
    }
}

fn run_probe(
    mut link: Box<dyn BoardLink>,
    config: &ProbeConfig,
    cancel: &AtomicBool,
) -> ProbeOutcome {
    match firmata_handshake(
        link.as_mut(),
        config.window(),
        config.handshake_retry(),
        Some(cancel),
    ) {
        HandshakeOutcome::Ready(pins) => ProbeOutcome::Ready(pins),
        // The window elapsed without a complete handshake. A board that
        // said nothing intelligible is assumed mis-flashed; flashing is the
        // recovery path for both silence and garbage.
        HandshakeOutcome::TimedOut => ProbeOutcome::NeedsFlash,
        HandshakeOutcome::Disconnected => ProbeOutcome::Disconnected,
        HandshakeOutcome::Aborted => ProbeOutcome::Unreachable,
    }
}
