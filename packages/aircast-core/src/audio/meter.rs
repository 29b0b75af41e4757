//! Streaming RMS/peak/clip meter over raw S16LE stereo PCM.

use serde::Serialize;

use crate::constants::{BYTES_PER_FRAME, CLIP_THRESHOLD, DB_FLOOR, FULL_SCALE, METER_WINDOW_FRAMES};

/// Converts a linear sample amplitude to dB relative to full scale,
/// clamped at the floor.
#[must_use]
pub fn to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return DB_FLOOR;
    }
    (20.0 * (amplitude / FULL_SCALE).log10()).max(DB_FLOOR)
}

/// Immutable level snapshot for one closed metering window.
///
/// All level fields are dB relative to full scale (32768) and never leave
/// the `[-60, 0]` range for valid PCM input.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Levels {
    pub rms_left: f64,
    pub rms_right: f64,
    pub peak_left: f64,
    pub peak_right: f64,
    /// Samples at or beyond ±32760 in this window, per channel.
    pub clip_left: u32,
    pub clip_right: u32,
}

impl Levels {
    /// The all-quiet snapshot stamped before any audio has arrived.
    #[must_use]
    pub fn floor() -> Self {
        Self {
            rms_left: DB_FLOOR,
            rms_right: DB_FLOOR,
            peak_left: DB_FLOOR,
            peak_right: DB_FLOOR,
            clip_left: 0,
            clip_right: 0,
        }
    }
}

/// Per-channel accumulator driven by the distributor loop.
///
/// Owned and mutated by a single task; produces a [`Levels`] snapshot each
/// time the frame count crosses the window size, then resets itself.
#[derive(Debug, Default)]
pub struct LevelMeter {
    sum_sq_left: f64,
    sum_sq_right: f64,
    peak_left: f64,
    peak_right: f64,
    clip_left: u32,
    clip_right: u32,
    frames: u32,
}

impl LevelMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one PCM block.
    ///
    /// The block is interpreted as interleaved S16LE stereo frames; a
    /// trailing partial frame (1-3 bytes) is discarded. Returns a snapshot
    /// when the window closes.
    pub fn push(&mut self, block: &[u8]) -> Option<Levels> {
        let frames = block.len() / BYTES_PER_FRAME;
        for i in 0..frames {
            let offset = i * BYTES_PER_FRAME;
            let left = i16::from_le_bytes([block[offset], block[offset + 1]]) as i32;
            let right = i16::from_le_bytes([block[offset + 2], block[offset + 3]]) as i32;

            let left_abs = left.abs() as f64;
            let right_abs = right.abs() as f64;
            self.sum_sq_left += left_abs * left_abs;
            self.sum_sq_right += right_abs * right_abs;
            self.peak_left = self.peak_left.max(left_abs);
            self.peak_right = self.peak_right.max(right_abs);
            if left.abs() >= CLIP_THRESHOLD {
                self.clip_left += 1;
            }
            if right.abs() >= CLIP_THRESHOLD {
                self.clip_right += 1;
            }
        }
        self.frames += frames as u32;

        if self.frames >= METER_WINDOW_FRAMES {
            Some(self.close_window())
        } else {
            None
        }
    }

    /// Closes the current window, returning its snapshot and resetting the
    /// accumulator.
    fn close_window(&mut self) -> Levels {
        let levels = if self.frames == 0 {
            Levels::floor()
        } else {
            let n = self.frames as f64;
            Levels {
                rms_left: to_db((self.sum_sq_left / n).sqrt()),
                rms_right: to_db((self.sum_sq_right / n).sqrt()),
                peak_left: to_db(self.peak_left),
                peak_right: to_db(self.peak_right),
                clip_left: self.clip_left,
                clip_right: self.clip_right,
            }
        };
        self.reset();
        levels
    }

    /// Clears all accumulated state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
