//! Capture engine: source supervision and PCM distribution.

pub mod distributor;
pub mod supervisor;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

pub use supervisor::{AudioEngine, EngineStatus};

use crate::audio::MeterSnapshot;

/// Encoder lifecycle state.
///
/// `Stopped → Starting` on start; `Starting → Running` once the capture
/// child is up; `Running → Stopping` on stop or unrecoverable capture
/// failure; `Stopping → Stopped` once the capture child is confirmed gone.
/// `Starting → Stopped` directly when the retry budget runs out before the
/// capture ever came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Latest metering snapshot with a non-blocking read path.
///
/// The distributor publishes behind a write lock. Readers opportunistically
/// try-read and fall back to the last cached snapshot under contention, so
/// a high-rate metering UI can poll without ever stalling the data plane;
/// briefly stale values are acceptable there.
pub(crate) struct LevelsCell {
    current: RwLock<MeterSnapshot>,
    cached: Mutex<MeterSnapshot>,
}

impl LevelsCell {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(MeterSnapshot::floor()),
            cached: Mutex::new(MeterSnapshot::floor()),
        }
    }

    /// Publishes one window's snapshot. Called only from the distributor.
    pub fn publish(&self, snapshot: MeterSnapshot) {
        *self.current.write() = snapshot;
    }

    /// Returns the latest snapshot, or the cached one under contention.
    pub fn read(&self) -> MeterSnapshot {
        match self.current.try_read() {
            Some(guard) => {
                let snapshot = *guard;
                drop(guard);
                *self.cached.lock() = snapshot;
                snapshot
            }
            None => *self.cached.lock(),
        }
    }

    /// Restores the all-quiet snapshot (capture session start).
    pub fn reset(&self) {
        self.publish(MeterSnapshot::floor());
        *self.cached.lock() = MeterSnapshot::floor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Levels;
    use crate::constants::DB_FLOOR;

    #[test]
    fn cell_starts_at_the_floor() {
        let cell = LevelsCell::new();
        assert_eq!(cell.read().levels.rms_left, DB_FLOOR);
        assert!(!cell.read().in_silence);
    }

    #[test]
    fn publish_then_read_round_trips() {
        let cell = LevelsCell::new();
        let mut snapshot = MeterSnapshot::floor();
        snapshot.levels = Levels {
            rms_left: -12.5,
            ..Levels::floor()
        };
        cell.publish(snapshot);
        assert_eq!(cell.read().levels.rms_left, -12.5);

        cell.reset();
        assert_eq!(cell.read().levels.rms_left, DB_FLOOR);
    }

    #[test]
    fn state_displays_lowercase() {
        assert_eq!(EncoderState::Running.to_string(), "running");
        assert_eq!(EncoderState::Stopped.to_string(), "stopped");
    }
}
