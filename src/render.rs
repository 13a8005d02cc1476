//! Terminal transmitter: plays a payload and draws each phase as text.
//!
//! The emitter runs on its own thread and sends [`FlickerEvent`]s down a
//! bounded `mpsc` channel. This side owns the output, draws what arrives,
//! and decides when to stop (Ctrl+C or the auto-stop timer).
//!
//! ## Rust concepts
//! - `std::sync::mpsc` channels between threads
//! - `recv_timeout()` so the loop can check for shutdown while waiting
//! - Generic writers (`W: Write`) so tests can render into a `Vec<u8>`

use crate::emitter::{Emitter, FlickerEvent};
use crate::encoder::{Frame, FrameSequence};
use crate::{TransmitConfig, is_running};
use std::io::{self, Write};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// How often the host loop wakes up to check for Ctrl+C and the timer.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events the emitter may run ahead of the renderer. Keeps Ctrl+C and the
/// auto-stop timer responsive when drawing is slower than the pulse rate.
const EVENT_QUEUE: usize = 8;

const LIT: char = '#';
const DARK: char = '.';

// ── Drawing ──────────────────────────────────────────────────────────

/// Draws frames as a row of zones, e.g. `# | # | . | # | .  B`.
pub struct TerminalRenderer<W: Write> {
    out: W,
    phases: u64,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, phases: 0 }
    }

    /// Number of display phases drawn so far.
    pub fn phases(&self) -> u64 {
        self.phases
    }

    pub fn render(&mut self, event: &FlickerEvent) -> io::Result<()> {
        match event {
            FlickerEvent::Display(frame) => {
                self.phases += 1;
                writeln!(self.out, "{}", format_frame(frame))?;
            }
            FlickerEvent::Stopped => writeln!(self.out, "stopped")?,
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One text line for a frame: the five zones, then the nibble in hex.
pub fn format_frame(frame: &Frame) -> String {
    let zones: Vec<String> = frame
        .zones()
        .iter()
        .map(|&lit| (if lit { LIT } else { DARK }).to_string())
        .collect();
    format!("{}  {:X}", zones.join(" | "), frame.nibble())
}

// ── Host loop ────────────────────────────────────────────────────────

/// Play `sequence` until Ctrl+C clears `running` or the auto-stop timer
/// fires, drawing every event to `out`. Returns once the session has ended.
pub fn transmit<W: Write>(
    sequence: FrameSequence,
    config: TransmitConfig,
    running: &AtomicBool,
    out: W,
) -> Result<TerminalRenderer<W>, Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE);
    let emitter = Emitter::new();
    let session = emitter.start(sequence, config.frequency_hz, tx)?;

    let deadline = auto_stop_deadline(config, Instant::now());
    let mut renderer = TerminalRenderer::new(out);

    loop {
        if !session.is_stopped() {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if expired {
                tracing::info!("Auto-stop after {}s", config.auto_stop_secs);
                session.stop();
            } else if !is_running(running) {
                tracing::info!("Interrupted, stopping after the current frame");
                session.stop();
            }
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                renderer.render(&event)?;
                if event == FlickerEvent::Stopped {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Emitter ended without a stop notification");
                break;
            }
        }
    }

    emitter.join();
    tracing::info!("Transmitted {} phases", renderer.phases());
    Ok(renderer)
}

/// When the auto-stop timer fires. A timeout too far out for `Instant` to
/// represent counts as no timeout.
fn auto_stop_deadline(config: TransmitConfig, now: Instant) -> Option<Instant> {
    config.auto_stop().and_then(|d| now.checked_add(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;

    #[rstest]
    #[case(Frame::from_nibble(0x0), ". | . | . | . | .  0")]
    #[case(Frame::from_nibble(0xB), ". | # | # | . | #  B")]
    #[case(Frame::from_nibble(0xF).with_strobe(true), "# | # | # | # | #  F")]
    fn test_format_frame(#[case] frame: Frame, #[case] expected: &str) {
        assert_eq!(format_frame(&frame), expected);
    }

    #[test]
    fn renderer_writes_one_line_per_event() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        let frame = Frame::from_nibble(0x1);
        renderer.render(&FlickerEvent::Display(frame.with_strobe(true))).unwrap();
        renderer.render(&FlickerEvent::Display(frame)).unwrap();
        renderer.render(&FlickerEvent::Stopped).unwrap();

        assert_eq!(renderer.phases(), 2);
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(text, "# | # | . | . | .  1\n. | # | . | . | .  1\nstopped\n");
    }

    #[test]
    fn transmit_stops_on_auto_stop_timer() {
        let running = AtomicBool::new(true);
        let config = TransmitConfig::new(1000, 1);
        let started = Instant::now();

        let renderer = transmit(encode("AB").unwrap(), config, &running, Vec::new()).unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(renderer.phases() > 0);
        assert_eq!(renderer.phases() % 2, 0);
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.ends_with("stopped\n"));
        assert!(text.starts_with("# | # | # | . | #  B\n"));
    }

    #[test]
    fn transmit_stops_when_running_flag_clears() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            flag.store(false, Ordering::SeqCst);
        });

        let config = TransmitConfig::new(100, 0);
        let renderer = transmit(encode("00FF").unwrap(), config, &running, Vec::new()).unwrap();
        interrupter.join().unwrap();

        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(text.lines().filter(|l| *l == "stopped").count(), 1);
    }

    #[rstest]
    #[case(0, None)]
    #[case(1, Some(Duration::from_secs(1)))]
    #[case(60, Some(Duration::from_secs(60)))]
    #[case(u64::MAX, None)]
    fn test_auto_stop_deadline(#[case] secs: u64, #[case] after: Option<Duration>) {
        let now = Instant::now();
        let deadline = auto_stop_deadline(TransmitConfig::new(40, secs), now);
        assert_eq!(deadline, after.map(|d| now + d));
    }

    #[test]
    fn transmit_survives_unrepresentable_auto_stop() {
        let running = AtomicBool::new(false);
        let config = TransmitConfig::new(40, u64::MAX);
        let renderer = transmit(encode("AB").unwrap(), config, &running, Vec::new()).unwrap();

        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.ends_with("stopped\n"));
    }

    /// A writer that takes a while per line, like a slow terminal.
    struct SlowWriter {
        lines: u64,
    }

    impl Write for SlowWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.lines += 1;
            thread::sleep(Duration::from_micros(200));
            Ok(())
        }
    }

    #[test]
    fn slow_output_does_not_delay_interrupt() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
            Instant::now()
        });

        // Zero-delay phases, far faster than the writer can keep up with.
        let config = TransmitConfig::new(5000, 0);
        let renderer = transmit(
            encode("00FF").unwrap(),
            config,
            &running,
            SlowWriter { lines: 0 },
        )
        .unwrap();
        let returned = Instant::now();
        let interrupted = interrupter.join().unwrap();

        let lag = returned.saturating_duration_since(interrupted);
        assert!(lag < Duration::from_millis(500), "exit lagged {lag:?} behind Ctrl+C");
        assert!(renderer.phases() > 0);
        assert!(renderer.into_inner().lines < 10_000);
    }

    #[test]
    fn transmit_rejects_bad_frequency() {
        let running = AtomicBool::new(true);
        let config = TransmitConfig::new(0, 0);
        assert!(transmit(encode("AB").unwrap(), config, &running, Vec::new()).is_err());
    }
}
