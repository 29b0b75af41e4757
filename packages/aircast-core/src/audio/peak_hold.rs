//! Per-channel peak hold with a fixed decay window.

use std::time::Instant;

use crate::constants::{DB_FLOOR, PEAK_HOLD};

#[derive(Debug, Default, Clone, Copy)]
struct Channel {
    held: f64,
    held_since: Option<Instant>,
}

impl Channel {
    fn update(&mut self, peak: f64, now: Instant) -> f64 {
        let expired = self
            .held_since
            .is_some_and(|since| now.duration_since(since) > PEAK_HOLD);
        if peak >= self.held || expired || self.held_since.is_none() {
            self.held = peak;
            self.held_since = Some(now);
        }
        self.held
    }

    fn reset(&mut self) {
        self.held = DB_FLOOR;
        self.held_since = None;
    }
}

/// Holds the highest recent peak per channel for the meter UI.
///
/// A new peak replaces the held value when it is at least as loud, or when
/// the hold window has elapsed since the held value was captured.
#[derive(Debug)]
pub struct PeakHold {
    left: Channel,
    right: Channel,
}

impl PeakHold {
    #[must_use]
    pub fn new() -> Self {
        let mut hold = Self {
            left: Channel::default(),
            right: Channel::default(),
        };
        hold.reset();
        hold
    }

    /// Feeds the instantaneous window peaks (dB) and returns the currently
    /// held values per channel.
    pub fn update(&mut self, peak_left: f64, peak_right: f64, now: Instant) -> (f64, f64) {
        (
            self.left.update(peak_left, now),
            self.right.update(peak_right, now),
        )
    }

    /// Restores the floor value and clears the hold timestamps.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

impl Default for PeakHold {
    fn default() -> Self {
        Self::new()
    }
}
