//! Audio analysis: level metering, peak hold and silence detection.
//!
//! The distributor feeds every PCM block through an [`AnalysisChain`]; each
//! time the meter closes a window, the chain updates the peak holder and the
//! silence detector and yields a [`MeterSnapshot`] for external consumers.

pub mod meter;
pub mod peak_hold;
pub mod silence;

use std::time::Instant;

use serde::Serialize;

pub use meter::{to_db, LevelMeter, Levels};
pub use peak_hold::PeakHold;
pub use silence::{SilenceDetector, SilenceEvent};

use crate::config::SilenceConfig;
use crate::constants::DB_FLOOR;

/// Published metering state, one per closed window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MeterSnapshot {
    #[serde(flatten)]
    pub levels: Levels,
    /// Held peaks (dB) for the meter UI.
    pub held_peak_left: f64,
    pub held_peak_right: f64,
    /// Whether confirmed silence is ongoing.
    pub in_silence: bool,
    /// Seconds of ongoing silence (0 when not silent).
    pub silence_duration_secs: f64,
}

impl MeterSnapshot {
    /// The all-quiet snapshot stamped when a capture session starts.
    #[must_use]
    pub fn floor() -> Self {
        Self {
            levels: Levels::floor(),
            held_peak_left: DB_FLOOR,
            held_peak_right: DB_FLOOR,
            in_silence: false,
            silence_duration_secs: 0.0,
        }
    }
}

/// Meter, peak hold and silence detector wired in processing order.
///
/// Owned by one distributor task; constructed fresh for every capture
/// session so silence thresholds are snapshotted per session.
pub struct AnalysisChain {
    meter: LevelMeter,
    peak_hold: PeakHold,
    silence: SilenceDetector,
}

impl AnalysisChain {
    #[must_use]
    pub fn new(silence_cfg: SilenceConfig) -> Self {
        Self {
            meter: LevelMeter::new(),
            peak_hold: PeakHold::new(),
            silence: SilenceDetector::new(silence_cfg),
        }
    }

    /// Feeds one PCM block. Returns the snapshot and silence observation
    /// when this block closed a metering window.
    pub fn process(&mut self, block: &[u8], now: Instant) -> Option<(MeterSnapshot, SilenceEvent)> {
        let levels = self.meter.push(block)?;
        let (held_left, held_right) = self
            .peak_hold
            .update(levels.peak_left, levels.peak_right, now);
        let event = self.silence.update(levels.rms_left, levels.rms_right, now);
        let snapshot = MeterSnapshot {
            levels,
            held_peak_left: held_left,
            held_peak_right: held_right,
            in_silence: event.in_silence,
            silence_duration_secs: if event.in_silence {
                event.duration_secs
            } else {
                0.0
            },
        };
        Some((snapshot, event))
    }
}
