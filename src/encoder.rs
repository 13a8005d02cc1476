//! Encoder: turns a hex payload into the frame sequence the emitter plays.
//!
//! Every hex digit becomes one five-zone [`Frame`]. Zone 0 is the strobe
//! (left dark here, the emitter pulses it); zones 1-4 carry the nibble,
//! least-significant bit first. Within each byte the low digit is sent
//! before the high digit, so `"AB"` goes out as `B`, `A`.
//!
//! ## Rust concepts
//! - Newtype wrappers (`Frame`) around a fixed-size array
//! - `Arc<[T]>` for an immutable buffer shared across threads
//! - `thiserror` for typed errors

use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// Number of light zones in a frame: one strobe plus four data bits.
pub const ZONE_COUNT: usize = 5;

// ── Frame ────────────────────────────────────────────────────────────

/// One visual state: which of the five zones are lit.
///
/// `Frame` is `Copy`, so the emitter hands out fresh snapshots for the
/// "on" and "off" phase instead of mutating a shared array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Frame([bool; ZONE_COUNT]);

impl Frame {
    /// Build the frame for a nibble. Only the low four bits of `value` are used.
    pub const fn from_nibble(value: u8) -> Self {
        Self([
            false,
            value & 0b0001 != 0,
            value & 0b0010 != 0,
            value & 0b0100 != 0,
            value & 0b1000 != 0,
        ])
    }

    pub const fn from_zones(zones: [bool; ZONE_COUNT]) -> Self {
        Self(zones)
    }

    pub const fn zones(&self) -> [bool; ZONE_COUNT] {
        self.0
    }

    /// Whether the strobe (zone 0) is lit.
    pub const fn strobe(&self) -> bool {
        self.0[0]
    }

    /// The nibble carried in zones 1-4.
    pub fn nibble(&self) -> u8 {
        self.0[1..]
            .iter()
            .enumerate()
            .filter(|(_, lit)| **lit)
            .fold(0, |acc, (bit, _)| acc | (1 << bit))
    }

    /// Copy of this frame with the strobe set to `lit`.
    pub const fn with_strobe(self, lit: bool) -> Self {
        let mut zones = self.0;
        zones[0] = lit;
        Self(zones)
    }
}

impl From<Frame> for [bool; ZONE_COUNT] {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

// ── Frame sequence ───────────────────────────────────────────────────

/// Ordered, immutable frames for one payload.
///
/// Cloning is cheap (one reference count bump), so the same sequence can be
/// handed to several sessions without copying the frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Arc<[Frame]>,
}

impl FrameSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Deref for FrameSequence {
    type Target = [Frame];

    fn deref(&self) -> &[Frame] {
        &self.frames
    }
}

impl From<Vec<Frame>> for FrameSequence {
    fn from(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// The payload could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPayload {
    /// Digits come in pairs; a dangling digit has no byte to belong to.
    #[error("invalid payload: expected an even number of hex digits, got {0}")]
    OddLength(usize),
    #[error("invalid payload: {found:?} at position {position} is not a hex digit")]
    NotHex { position: usize, found: char },
}

// ── Encoding ─────────────────────────────────────────────────────────

/// Encode a hex payload (case-insensitive) into its frame sequence.
///
/// The result has one frame per digit. For each byte the low digit's frame
/// comes first, then the high digit's frame; receivers rely on this order.
pub fn encode(payload: &str) -> Result<FrameSequence, InvalidPayload> {
    let digits: Vec<char> = payload.chars().collect();
    if digits.len() % 2 != 0 {
        return Err(InvalidPayload::OddLength(digits.len()));
    }

    let mut frames = Vec::with_capacity(digits.len());
    for (pair, chunk) in digits.chunks_exact(2).enumerate() {
        let hi = decode_digit(chunk[0], pair * 2)?;
        let lo = decode_digit(chunk[1], pair * 2 + 1)?;
        frames.push(Frame::from_nibble(lo));
        frames.push(Frame::from_nibble(hi));
    }

    Ok(frames.into())
}

fn decode_digit(found: char, position: usize) -> Result<u8, InvalidPayload> {
    found
        .to_digit(16)
        .map(|value| value as u8)
        .ok_or(InvalidPayload::NotHex { position, found })
}
