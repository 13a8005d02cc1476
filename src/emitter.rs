//! Emitter: plays a frame sequence on a dedicated thread until stopped.
//!
//! Each frame is shown twice, once with the strobe lit and once dark, and
//! each phase is held for half a period (`1000 / frequency_hz` ms). The
//! sequence repeats until a stop is requested. The stop flag is checked only
//! at frame boundaries, so a session ends at most one full frame (two
//! half-periods) after `stop()`.
//!
//! ## Rust concepts
//! - `std::thread::Builder` for a named background thread
//! - `Arc<AtomicBool>` as a cross-thread cancellation flag
//! - Traits as the seam between the scheduler and whoever draws the frames

use crate::encoder::{Frame, FrameSequence};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

// ── Events and sinks ─────────────────────────────────────────────────

/// What a session reports to its renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "zones", rename_all = "snake_case")]
pub enum FlickerEvent {
    /// Show this state until the next event.
    Display(Frame),
    /// The session observed a stop request and ended. Sent once per session.
    Stopped,
}

/// The receiving end of a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("flicker sink disconnected")]
pub struct SinkClosed;

/// Receives the frames of a session, typically a renderer.
///
/// Both methods run on the session thread. Returning `Err(SinkClosed)` from
/// `display` ends the session early without a `stopped` notification.
pub trait FlickerSink: Send + 'static {
    fn display(&mut self, frame: Frame) -> Result<(), SinkClosed>;

    fn stopped(&mut self);
}

/// A channel sink: each phase becomes a [`FlickerEvent`] on the receiver.
impl FlickerSink for Sender<FlickerEvent> {
    fn display(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        self.send(FlickerEvent::Display(frame)).map_err(|_| SinkClosed)
    }

    fn stopped(&mut self) {
        // Nobody left to tell; the session is over either way.
        let _ = self.send(FlickerEvent::Stopped);
    }
}

/// A bounded channel sink. `send` blocks while the channel is full, so a
/// slow renderer holds the session back instead of queueing stale frames.
impl FlickerSink for SyncSender<FlickerEvent> {
    fn display(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        self.send(FlickerEvent::Display(frame)).map_err(|_| SinkClosed)
    }

    fn stopped(&mut self) {
        let _ = self.send(FlickerEvent::Stopped);
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// Why a session could not be started.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("invalid frequency: must be at least 1 pulse per second")]
    InvalidFrequency,
    #[error("nothing to transmit: the frame sequence is empty")]
    EmptySequence,
    #[error("a session is still running; stop it and wait for it to end first")]
    AlreadyRunning,
    #[error("failed to spawn emitter thread: {0}")]
    Spawn(#[from] io::Error),
}

// ── Timing ───────────────────────────────────────────────────────────

/// How long each on/off phase is held: `1000 / frequency_hz` whole
/// milliseconds. Frequencies above 1000 Hz round down to zero.
pub fn half_period(frequency_hz: u32) -> Duration {
    Duration::from_millis(u64::from(1000 / frequency_hz.max(1)))
}

// ── Session flags ────────────────────────────────────────────────────

/// State shared between the caller and one session thread.
#[derive(Debug, Default)]
struct SessionFlags {
    stop_requested: AtomicBool,
    finished: AtomicBool,
}

impl SessionFlags {
    /// Set the stop flag. Returns true only for the call that set it.
    fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::SeqCst)
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Stops one particular session, even after the emitter has moved on to a
/// newer one. Cheap to clone and safe to use from any thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    flags: Arc<SessionFlags>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.flags.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stop_requested()
    }

    /// Whether the session thread has left its loop.
    pub fn is_finished(&self) -> bool {
        self.flags.is_finished()
    }
}

// ── Emitter ──────────────────────────────────────────────────────────

struct Session {
    flags: Arc<SessionFlags>,
    handle: Option<JoinHandle<()>>,
}

/// Owns at most one playback session at a time.
///
/// All methods take `&self`, so an `Emitter` can sit in an `Arc` and be
/// stopped from any thread. Dropping the emitter requests a stop but does not
/// wait for the session thread.
#[derive(Default)]
pub struct Emitter {
    session: Mutex<Option<Session>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playing `sequence` at `frequency_hz` on a new thread.
    ///
    /// Returns as soon as the thread is spawned. Fails with `AlreadyRunning`
    /// if the previous session has not ended yet; wait for its `Stopped`
    /// event (or call [`Emitter::join`]) before starting again.
    pub fn start<S: FlickerSink>(
        &self,
        sequence: FrameSequence,
        frequency_hz: u32,
        sink: S,
    ) -> Result<StopHandle, EmitterError> {
        if frequency_hz == 0 {
            return Err(EmitterError::InvalidFrequency);
        }
        if sequence.is_empty() {
            return Err(EmitterError::EmptySequence);
        }

        let mut slot = self.lock_session();
        if slot.as_ref().is_some_and(|s| !s.flags.is_finished()) {
            return Err(EmitterError::AlreadyRunning);
        }

        let half = half_period(frequency_hz);
        if half.is_zero() {
            tracing::warn!(
                "{} Hz is above 1000 Hz; phases will not be held (zero delay)",
                frequency_hz
            );
        }

        let flags = Arc::new(SessionFlags::default());
        let session_flags = flags.clone();
        let frame_count = sequence.len();
        let handle = thread::Builder::new()
            .name("flicker-emitter".to_string())
            .spawn(move || run_session(sequence, half, session_flags, sink))?;

        tracing::info!(
            "Flicker session started: {} frames @ {} Hz ({}ms per phase)",
            frame_count,
            frequency_hz,
            half.as_millis()
        );

        *slot = Some(Session {
            flags: flags.clone(),
            handle: Some(handle),
        });

        Ok(StopHandle { flags })
    }

    /// Ask the running session to stop at its next frame boundary.
    ///
    /// Does not wait. A no-op when idle or already stopping.
    pub fn stop(&self) {
        if let Some(session) = self.lock_session().as_ref() {
            if session.flags.request_stop() {
                tracing::info!("Flicker stop requested");
            }
        }
    }

    /// True when no session was ever started, or the current one has been
    /// asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_none_or(|s| s.flags.stop_requested())
    }

    /// True while the current session thread is still inside its loop.
    pub fn is_running(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|s| !s.flags.is_finished())
    }

    /// Block until the current session thread exits. Call [`Emitter::stop`]
    /// first, otherwise this waits forever.
    pub fn join(&self) {
        let handle = self
            .lock_session()
            .as_mut()
            .and_then(|s| s.handle.take());

        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Flicker session thread panicked");
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        // The guarded data is only ever replaced wholesale, so it is
        // consistent even if a holder panicked.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Session loop ─────────────────────────────────────────────────────

/// Body of the session thread. Returns when a stop is observed at a frame
/// boundary, or when the sink goes away.
fn run_session<S: FlickerSink>(
    sequence: FrameSequence,
    half_period: Duration,
    flags: Arc<SessionFlags>,
    mut sink: S,
) {
    let mut cycles: u64 = 0;

    loop {
        for frame in sequence.iter() {
            if flags.stop_requested() {
                flags.finish();
                tracing::info!("Flicker session stopped after {} full cycles", cycles);
                sink.stopped();
                return;
            }

            for lit in [true, false] {
                if sink.display(frame.with_strobe(lit)).is_err() {
                    let _ = flags.request_stop();
                    flags.finish();
                    tracing::warn!("Flicker sink went away; ending session without notification");
                    return;
                }
                thread::sleep(half_period);
            }
        }

        cycles += 1;
        tracing::debug!("Flicker cycle {} complete", cycles);
    }
}
