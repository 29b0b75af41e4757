//! Aircast Core - audio streaming supervision library.
//!
//! This crate captures a stereo PCM stream from one local hardware input,
//! fans the raw samples out to per-sink encoder child processes (SRT network
//! outputs and local file recorders) and runs a co-resident analysis
//! pipeline: level metering, silence detection with hysteresis, and
//! de-duplicated alerting.
//!
//! # Architecture
//!
//! - [`engine`]: capture child supervision and the PCM distributor
//! - [`sink`]: per-sink encoder supervision and the sink registry
//! - [`audio`]: level meter, peak hold and silence detection
//! - [`notify`]: latched silence alerting (webhook, email, alert log)
//! - `retention`: recording retention cleaning
//! - [`config`]: configuration model and shared store
//! - [`backoff`], [`process`]: restart scheduling and child plumbing
//! - [`error`]: centralized error types
//!
//! The control plane (HTTP/WebSocket, persistence, UI) lives outside this
//! crate and drives it exclusively through [`AudioEngine`].

#![warn(clippy::all)]

pub mod audio;
pub mod backoff;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod notify;
pub mod process;
mod retention;
pub mod sink;

// Re-export commonly used types at the crate root
pub use audio::{AnalysisChain, LevelMeter, Levels, MeterSnapshot, PeakHold, SilenceDetector, SilenceEvent};
pub use backoff::Backoff;
pub use config::{
    CaptureConfig, Codec, Config, ConfigStore, NotificationConfig, OutputConfig, RecordingConfig,
    RecordingMode, SilenceConfig, SinkConfig,
};
pub use engine::{AudioEngine, EncoderState, EngineStatus};
pub use error::{AircastError, AircastResult};
pub use notify::{AlertChannel, Notifier};
pub use sink::{SinkKind, SinkManager, SinkStatus, SinkSupervisor};
