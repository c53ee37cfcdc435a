//! # Audio Frames
//!
//! Validation helpers for the raw PCM byte stream flowing through the relay.
//! There is no application framing: a frame is whatever chunk the transport
//! delivered, and chunk boundaries carry no semantic meaning.
//!
//! ## Stream Formats:
//! - **Inbound** (microphone): 16-bit signed little-endian PCM, 16 kHz, mono
//! - **Outbound** (synthesis): 16-bit signed little-endian PCM, 24 kHz, mono
//!
//! The one invariant a frame must satisfy is that its byte length is a
//! non-zero multiple of the 2-byte sample width.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Bytes per sample for 16-bit PCM.
pub const SAMPLE_WIDTH: usize = 2;

/// Stream format description for one direction of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
}

impl AudioFormat {
    /// Microphone capture format expected from clients.
    pub fn input(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Synthesized audio format emitted to clients.
    pub fn output(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Duration of a frame of `len` bytes in this format, in milliseconds.
    pub fn frame_duration_ms(&self, len: usize) -> f64 {
        let samples = len / SAMPLE_WIDTH;
        samples as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Validate an inbound binary frame before it reaches the recognizer.
///
/// ## Checks:
/// 1. The frame is not empty
/// 2. The byte length is a multiple of the sample width
///
/// Anything beyond that is opaque to the relay; the samples themselves are
/// never inspected on the hot path.
pub fn validate_frame(data: &[u8]) -> Result<(), String> {
    if data.is_empty() {
        return Err("Audio frame is empty".to_string());
    }
    if data.len() % SAMPLE_WIDTH != 0 {
        return Err(format!(
            "Audio frame length {} is not a multiple of the {}-byte sample width",
            data.len(),
            SAMPLE_WIDTH
        ));
    }
    Ok(())
}

/// Decode a frame into 16-bit samples.
///
/// Used by diagnostics and tests; the relay itself forwards frames as opaque
/// bytes.
pub fn frame_samples(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / SAMPLE_WIDTH);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}
