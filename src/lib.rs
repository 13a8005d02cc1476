//! Data-over-light transmitter.
//!
//! A hex payload is encoded into five-zone frames (one strobe zone plus four
//! data zones per nibble) and played back at a fixed frequency, so an optical
//! receiver sampling the zones can rebuild the bytes.
//!
//! This module holds the pieces shared by the terminal transmitter and the
//! HTTP server:
//! - Transmission configuration
//! - Signal handling for clean shutdown
//!
//! The protocol itself lives in [`encoder`] and [`emitter`].

pub mod emitter;
pub mod encoder;
pub mod payload;
pub mod render;
pub mod server;

pub use emitter::{Emitter, EmitterError, FlickerEvent, FlickerSink, SinkClosed, StopHandle};
pub use encoder::{Frame, FrameSequence, InvalidPayload, ZONE_COUNT, encode};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Payload used when none is given on the command line.
pub const DEMO_PAYLOAD: &str =
    "00FF28C780093731343434343454415435373334303030303030303030303030313847303031322C343032";

pub const DEFAULT_FREQUENCY_HZ: u32 = 40;

/// A session is stopped automatically after this long unless configured otherwise.
pub const DEFAULT_AUTO_STOP_SECS: u64 = 60;

// ── Transmit configuration ─────────────────────────────────────────

/// Settings shared by transmitter and receiver out of band.
///
/// `Clone, Copy` because it is two integers; passing it by value keeps the
/// host code free of globals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitConfig {
    /// On/off phases per second.
    pub frequency_hz: u32,
    /// Seconds before a running session is stopped. 0 means never.
    pub auto_stop_secs: u64,
}

impl TransmitConfig {
    pub fn new(frequency_hz: u32, auto_stop_secs: u64) -> Self {
        Self {
            frequency_hz,
            auto_stop_secs,
        }
    }

    /// How long one phase (strobe on or strobe off) is held.
    pub fn half_period(&self) -> Duration {
        emitter::half_period(self.frequency_hz)
    }

    /// How long one frame (both phases) is on screen.
    pub fn frame_duration(&self) -> Duration {
        self.half_period() * 2
    }

    pub fn auto_stop(&self) -> Option<Duration> {
        (self.auto_stop_secs > 0).then(|| Duration::from_secs(self.auto_stop_secs))
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY_HZ, DEFAULT_AUTO_STOP_SECS)
    }
}

// ── Signal handling ────────────────────────────────────────────────

/// Set up a Ctrl+C handler that sets `running` to false.
///
/// # Rust concept: Arc and AtomicBool
/// The flag is shared between the main loop and the signal handler.
/// `AtomicBool` is a thread-safe boolean, no mutex needed for a single bool.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────
