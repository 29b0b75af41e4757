//! Fixed audio and supervision constants.
//!
//! The audio values are dictated by the capture contract (S16LE / 48 kHz /
//! stereo PCM on the capture child's stdout); the supervision values are
//! operational tunings the rest of the code assumes. Changing them changes
//! wire-level or on-disk behavior.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// Capture sample rate (Hz). The capture child is always invoked for 48 kHz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Capture channel count (stereo).
pub const CHANNELS: u16 = 2;

/// Bytes per interleaved stereo S16LE frame (2 channels × 2 bytes).
pub const BYTES_PER_FRAME: usize = 4;

/// Frames per metering window (12000 frames ≈ 250 ms at 48 kHz).
pub const METER_WINDOW_FRAMES: u32 = 12_000;

/// PCM scratch buffer for the distributor read loop
/// (100 ms at 48 kHz stereo S16LE).
pub const PCM_BUFFER_BYTES: usize = 19_200;

/// Full-scale reference amplitude for dB conversion.
pub const FULL_SCALE: f64 = 32_768.0;

/// Sample magnitude at or beyond which a sample counts as clipped.
pub const CLIP_THRESHOLD: i32 = 32_760;

/// Level floor (dB). Reported whenever a window is empty or quieter.
pub const DB_FLOOR: f64 = -60.0;

/// How long a channel peak is held before it may decay.
pub const PEAK_HOLD: Duration = Duration::from_millis(1_500);

// ─────────────────────────────────────────────────────────────────────────────
// Supervision
// ─────────────────────────────────────────────────────────────────────────────

/// Initial restart backoff delay.
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(3);

/// Maximum restart backoff delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// A child that ran at least this long counts as a successful run and
/// resets its supervisor's retry budget.
pub const SUCCESS_RUN: Duration = Duration::from_secs(30);

/// A running sink is reported stable once its current child has lived
/// this long.
pub const STABLE_AFTER: Duration = Duration::from_secs(10);

/// Bound on each child's captured stderr; older bytes are ring-discarded.
pub const STDERR_CAP: usize = 64 * 1024;

/// Maximum length of an extracted stderr error line (characters).
pub const ERROR_TRUNCATE: usize = 200;

/// Bounded wait for graceful child termination before force kill.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Capture restart budget before the engine gives up entirely.
pub const CAPTURE_MAX_RETRIES: u32 = 10;

/// Retry budget applied when a sink's configured budget is 0 (sentinel
/// meaning "use the default").
pub const DEFAULT_SINK_MAX_RETRIES: u32 = 99;

/// Delay between capture spawn and starting the enabled sinks, giving the
/// capture child time to settle before encoders attach.
pub const SINK_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Pause between stop and start during a full engine restart.
pub const RESTART_PAUSE: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Recordings
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between retention cleaner passes.
pub const CLEANER_INTERVAL: Duration = Duration::from_secs(3_600);

/// Highest numeric suffix tried when a recording path collides before
/// falling back to unix seconds.
pub const ROTATE_SUFFIX_MAX: u32 = 99;

// ─────────────────────────────────────────────────────────────────────────────
// Registry Ceilings
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of configured outputs, enforced at insertion time.
pub const MAX_OUTPUTS: usize = 10;

/// Maximum number of configured recordings, enforced at insertion time.
pub const MAX_RECORDINGS: usize = 5;
