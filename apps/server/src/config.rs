//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use aircast_core::{
    CaptureConfig, Config, NotificationConfig, OutputConfig, RecordingConfig, SilenceConfig,
};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Capture input settings.
    /// Overrides: `AIRCAST_CAPTURE_DEVICE`, `AIRCAST_FFMPEG_PATH`
    pub capture: CaptureConfig,

    /// Silence detection thresholds.
    pub silence: SilenceConfig,

    /// Notification channel settings.
    /// Override: `AIRCAST_WEBHOOK_URL`
    pub notifications: NotificationConfig,

    /// Configured network outputs.
    pub outputs: Vec<OutputConfig>,

    /// Configured recordings.
    pub recordings: Vec<RecordingConfig>,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(device) = std::env::var("AIRCAST_CAPTURE_DEVICE") {
            self.capture.device = device;
        }
        if let Ok(path) = std::env::var("AIRCAST_FFMPEG_PATH") {
            self.capture.ffmpeg_path = path;
        }
        if let Ok(url) = std::env::var("AIRCAST_WEBHOOK_URL") {
            self.notifications.webhook_url = url;
        }
    }

    /// Converts to aircast-core's Config type.
    pub fn to_core_config(self) -> Config {
        Config {
            capture: self.capture,
            silence: self.silence,
            notifications: self.notifications,
            outputs: self.outputs,
            recordings: self.recordings,
        }
    }
}
