//! Configuration model: capture input, silence detection, notification
//! channels, outputs and recordings.
//!
//! [`ConfigStore`] wraps the shared configuration behind a reader-writer
//! lock and is the single place supervisors consult during retry, so
//! configuration edits are observed without restarting the world.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    CHANNELS, DEFAULT_SINK_MAX_RETRIES, MAX_OUTPUTS, MAX_RECORDINGS, SAMPLE_RATE,
};
use crate::error::{AircastError, AircastResult};

// ─────────────────────────────────────────────────────────────────────────────
// Codec Table
// ─────────────────────────────────────────────────────────────────────────────

/// Supported encoder codecs.
///
/// Each codec maps to a fixed encoder argument vector, a container format
/// and a file extension for recordings. The mapping is part of the external
/// contract with the encoder binary and must not be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp2,
    Mp3,
    Ogg,
    Wav,
}

impl Codec {
    /// Resolves a codec by configured name. Unknown names fall back to the
    /// default (mp3).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "mp2" => Self::Mp2,
            "mp3" => Self::Mp3,
            "ogg" => Self::Ogg,
            "wav" => Self::Wav,
            _ => Self::default(),
        }
    }

    /// Returns the codec as a short string identifier (e.g., "mp3").
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }

    /// Encoder argument vector inserted after `-codec:a`.
    #[must_use]
    pub const fn encoder_args(&self) -> &'static [&'static str] {
        match self {
            Self::Mp2 => &["libtwolame", "-b:a", "384k", "-psymodel", "4"],
            Self::Mp3 => &["libmp3lame", "-b:a", "320k"],
            Self::Ogg => &["libvorbis", "-qscale:a", "10"],
            Self::Wav => &["pcm_s16le"],
        }
    }

    /// Container format passed to `-f`.
    #[must_use]
    pub const fn container(&self) -> &'static str {
        match self {
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Wav => "matroska",
        }
    }

    /// File extension for recorded files.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Wav => "mkv",
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::Mp3
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn new_sink_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

/// A network output: one encoder child streaming to an SRT destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Stable unique identifier.
    #[serde(default = "new_sink_id")]
    pub id: String,

    /// Operator-facing name.
    #[serde(default)]
    pub name: String,

    /// SRT destination host.
    pub host: String,

    /// SRT destination port.
    pub port: u16,

    /// SRT stream ID, sent URL-encoded in the destination query.
    #[serde(default)]
    pub stream_id: String,

    /// SRT passphrase, sent URL-encoded in the destination query.
    #[serde(default)]
    pub passphrase: String,

    /// Codec name; unknown or empty names resolve to mp3.
    #[serde(default)]
    pub codec: String,

    /// Retry budget; 0 means "use the default budget".
    #[serde(default)]
    pub max_retries: u32,

    /// Whether the output starts automatically with the engine.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Creation time (unix seconds); filled on load when absent.
    #[serde(default)]
    pub created_at: i64,
}

impl OutputConfig {
    /// Resolved codec for this output.
    #[must_use]
    pub fn codec(&self) -> Codec {
        Codec::from_name(&self.codec)
    }

    /// Effective retry budget; 0 is a sentinel for the default of 99.
    #[must_use]
    pub fn effective_max_retries(&self) -> u32 {
        if self.max_retries == 0 {
            DEFAULT_SINK_MAX_RETRIES
        } else {
            self.max_retries
        }
    }

    /// Builds the SRT destination URL with percent-encoded query parameters.
    #[must_use]
    pub fn destination_url(&self) -> String {
        format!(
            "srt://{}:{}?pkt_size=1316&oheadbw=100&maxbw=-1&latency=10000000\
             &mode=caller&transtype=live&streamid={}&passphrase={}",
            self.host,
            self.port,
            urlencoding::encode(&self.stream_id),
            urlencoding::encode(&self.passphrase),
        )
    }
}

/// Whether a recording rotates files by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Rotate to a new file at every hour boundary.
    Auto,
    /// Record into one file until stopped by the operator.
    Manual,
}

impl Default for RecordingMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// A local recording: one encoder child writing hourly files under a base
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Stable unique identifier.
    #[serde(default = "new_sink_id")]
    pub id: String,

    /// Operator-facing name.
    #[serde(default)]
    pub name: String,

    /// Directory under which dated subdirectories are created.
    pub base_path: PathBuf,

    /// Codec name; unknown or empty names resolve to mp3.
    #[serde(default)]
    pub codec: String,

    /// Rotation mode.
    #[serde(default)]
    pub mode: RecordingMode,

    /// Files and dated directories older than this many days are deleted;
    /// 0 disables retention cleaning.
    #[serde(default)]
    pub retention_days: u32,

    /// Retry budget; 0 means "use the default budget".
    #[serde(default)]
    pub max_retries: u32,

    /// Creation time (unix seconds); filled on load when absent.
    #[serde(default)]
    pub created_at: i64,
}

impl RecordingConfig {
    /// Resolved codec for this recording.
    #[must_use]
    pub fn codec(&self) -> Codec {
        Codec::from_name(&self.codec)
    }

    /// Effective retry budget; 0 is a sentinel for the default of 99.
    #[must_use]
    pub fn effective_max_retries(&self) -> u32 {
        if self.max_retries == 0 {
            DEFAULT_SINK_MAX_RETRIES
        } else {
            self.max_retries
        }
    }
}

/// Either sink flavor, as fetched by supervisors during retry.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    Output(OutputConfig),
    Recording(RecordingConfig),
}

impl SinkConfig {
    /// The sink's stable ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Output(o) => &o.id,
            Self::Recording(r) => &r.id,
        }
    }

    /// Resolved codec.
    #[must_use]
    pub fn codec(&self) -> Codec {
        match self {
            Self::Output(o) => o.codec(),
            Self::Recording(r) => r.codec(),
        }
    }

    /// Effective retry budget.
    #[must_use]
    pub fn effective_max_retries(&self) -> u32 {
        match self {
            Self::Output(o) => o.effective_max_retries(),
            Self::Recording(r) => r.effective_max_retries(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Detection & Notification Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Silence detection thresholds.
///
/// Snapshotted once per capture session; edits take effect on the next
/// session so the hot path never consults mutable shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceConfig {
    /// Both channels must be below this level (dB) to count as silent.
    pub threshold_db: f64,

    /// Seconds below threshold before silence is confirmed.
    pub duration_secs: f64,

    /// Seconds above threshold before recovery is confirmed.
    pub recovery_secs: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            duration_secs: 15.0,
            recovery_secs: 5.0,
        }
    }
}

/// Notification channel settings.
///
/// A channel is active only when its `*_configured` predicate holds; the
/// notifier never latches an unconfigured channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook endpoint receiving JSON alerts; empty disables the channel.
    pub webhook_url: String,

    /// SMTP server hostname.
    pub email_host: String,

    /// SMTP port. 587 uses STARTTLS, 465 implicit TLS, anything else
    /// opportunistic TLS.
    pub email_port: u16,

    /// SMTP username; empty disables authentication.
    pub email_username: String,

    /// SMTP password.
    pub email_password: String,

    /// From address for alert mails.
    pub email_from: String,

    /// Recipient addresses.
    pub email_recipients: Vec<String>,

    /// Append-only JSONL alert log; empty disables the channel.
    pub log_path: String,
}

impl NotificationConfig {
    /// Webhook channel is configured when a URL is present.
    #[must_use]
    pub fn webhook_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Email channel is configured when both a host and recipients exist.
    #[must_use]
    pub fn email_configured(&self) -> bool {
        !self.email_host.is_empty() && !self.email_recipients.is_empty()
    }

    /// Log channel is configured when a path is present.
    #[must_use]
    pub fn log_configured(&self) -> bool {
        !self.log_path.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_device() -> String {
    "default".to_string()
}

/// Capture input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Hardware input device name (ALSA device on Linux, avfoundation
    /// index on macOS).
    pub device: String,

    /// Path to the encoder/capture binary.
    pub ffmpeg_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl CaptureConfig {
    /// Capture child argv producing S16LE / 48 kHz / stereo PCM on stdout.
    #[must_use]
    pub fn capture_args(&self) -> Vec<String> {
        let input_format = if cfg!(target_os = "macos") {
            "avfoundation"
        } else {
            "alsa"
        };
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-f".into(),
            input_format.into(),
            "-i".into(),
            self.device.clone(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string(),
            "-ac".into(),
            CHANNELS.to_string(),
            "pipe:1".into(),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Root Configuration & Store
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration consumed by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub silence: SilenceConfig,
    pub notifications: NotificationConfig,
    pub outputs: Vec<OutputConfig>,
    pub recordings: Vec<RecordingConfig>,
}

impl Config {
    /// One-time read-path fixups for configurations written by older
    /// versions: missing codecs become the default, missing creation
    /// timestamps become now.
    pub fn migrate(&mut self) {
        let now = chrono::Utc::now().timestamp();
        for output in &mut self.outputs {
            if output.codec.is_empty() {
                output.codec = Codec::default().as_str().to_string();
            }
            if output.created_at == 0 {
                output.created_at = now;
            }
        }
        for recording in &mut self.recordings {
            if recording.codec.is_empty() {
                recording.codec = Codec::default().as_str().to_string();
            }
            if recording.created_at == 0 {
                recording.created_at = now;
            }
        }
    }
}

/// Shared, mutable configuration with per-sink lookups.
///
/// Supervisors hold an `Arc<ConfigStore>` through their hooks and refetch
/// the latest sink configuration before every restart attempt, so removals
/// and edits are honored without direct coupling to the registry.
pub struct ConfigStore {
    inner: RwLock<Config>,
}

impl ConfigStore {
    /// Wraps a configuration, applying migration fixups.
    #[must_use]
    pub fn new(mut config: Config) -> Arc<Self> {
        config.migrate();
        Arc::new(Self {
            inner: RwLock::new(config),
        })
    }

    /// Returns a full snapshot of the configuration.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.inner.read().clone()
    }

    #[must_use]
    pub fn capture(&self) -> CaptureConfig {
        self.inner.read().capture.clone()
    }

    #[must_use]
    pub fn silence(&self) -> SilenceConfig {
        self.inner.read().silence.clone()
    }

    #[must_use]
    pub fn notifications(&self) -> NotificationConfig {
        self.inner.read().notifications.clone()
    }

    /// Replaces the silence thresholds. Takes effect on the next capture
    /// session.
    pub fn set_silence(&self, silence: SilenceConfig) {
        self.inner.write().silence = silence;
    }

    /// Replaces the notification settings.
    pub fn set_notifications(&self, notifications: NotificationConfig) {
        self.inner.write().notifications = notifications;
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<OutputConfig> {
        self.inner.read().outputs.clone()
    }

    #[must_use]
    pub fn recordings(&self) -> Vec<RecordingConfig> {
        self.inner.read().recordings.clone()
    }

    /// Looks up an output by ID.
    #[must_use]
    pub fn get_output(&self, id: &str) -> Option<OutputConfig> {
        self.inner.read().outputs.iter().find(|o| o.id == id).cloned()
    }

    /// Looks up a recording by ID.
    #[must_use]
    pub fn get_recording(&self, id: &str) -> Option<RecordingConfig> {
        self.inner
            .read()
            .recordings
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Looks up either sink flavor by ID.
    #[must_use]
    pub fn get_sink(&self, id: &str) -> Option<SinkConfig> {
        self.get_output(id)
            .map(SinkConfig::Output)
            .or_else(|| self.get_recording(id).map(SinkConfig::Recording))
    }

    /// Adds an output, enforcing the registry ceiling. Returns the sink ID.
    pub fn add_output(&self, mut output: OutputConfig) -> AircastResult<String> {
        let mut config = self.inner.write();
        if config.outputs.len() >= MAX_OUTPUTS {
            return Err(AircastError::LimitReached(format!(
                "at most {MAX_OUTPUTS} outputs are supported"
            )));
        }
        if output.id.is_empty() {
            output.id = new_sink_id();
        }
        if output.codec.is_empty() {
            output.codec = Codec::default().as_str().to_string();
        }
        if output.created_at == 0 {
            output.created_at = chrono::Utc::now().timestamp();
        }
        let id = output.id.clone();
        config.outputs.push(output);
        Ok(id)
    }

    /// Replaces an existing output's configuration.
    pub fn update_output(&self, output: OutputConfig) -> AircastResult<()> {
        let mut config = self.inner.write();
        match config.outputs.iter_mut().find(|o| o.id == output.id) {
            Some(slot) => {
                *slot = output;
                Ok(())
            }
            None => Err(AircastError::SinkNotFound(output.id)),
        }
    }

    /// Removes an output; returns whether it existed.
    pub fn remove_output(&self, id: &str) -> bool {
        let mut config = self.inner.write();
        let before = config.outputs.len();
        config.outputs.retain(|o| o.id != id);
        config.outputs.len() != before
    }

    /// Adds a recording, enforcing the registry ceiling. Returns the sink ID.
    pub fn add_recording(&self, mut recording: RecordingConfig) -> AircastResult<String> {
        let mut config = self.inner.write();
        if config.recordings.len() >= MAX_RECORDINGS {
            return Err(AircastError::LimitReached(format!(
                "at most {MAX_RECORDINGS} recordings are supported"
            )));
        }
        if recording.id.is_empty() {
            recording.id = new_sink_id();
        }
        if recording.codec.is_empty() {
            recording.codec = Codec::default().as_str().to_string();
        }
        if recording.created_at == 0 {
            recording.created_at = chrono::Utc::now().timestamp();
        }
        let id = recording.id.clone();
        config.recordings.push(recording);
        Ok(id)
    }

    /// Replaces an existing recording's configuration.
    pub fn update_recording(&self, recording: RecordingConfig) -> AircastResult<()> {
        let mut config = self.inner.write();
        match config.recordings.iter_mut().find(|r| r.id == recording.id) {
            Some(slot) => {
                *slot = recording;
                Ok(())
            }
            None => Err(AircastError::SinkNotFound(recording.id)),
        }
    }

    /// Removes a recording; returns whether it existed.
    pub fn remove_recording(&self, id: &str) -> bool {
        let mut config = self.inner.write();
        let before = config.recordings.len();
        config.recordings.retain(|r| r.id != id);
        config.recordings.len() != before
    }
}
