//! Append-only JSONL alert log.
//!
//! One JSON object per line:
//! `{"timestamp":<RFC3339 UTC>,"event":"silence_start"|"silence_end","duration_sec":<sec>,"threshold_db":<dB>}`

use chrono::SecondsFormat;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{Alert, NotifyError};

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    event: &'static str,
    duration_sec: f64,
    threshold_db: f64,
}

pub(super) async fn append(path: &str, alert: &Alert) -> Result<(), NotifyError> {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let entry = match alert {
        Alert::SilenceStart {
            duration_secs,
            threshold_db,
        } => LogEntry {
            timestamp,
            event: "silence_start",
            duration_sec: *duration_secs,
            threshold_db: *threshold_db,
        },
        Alert::SilenceEnd {
            duration_secs,
            threshold_db,
        } => LogEntry {
            timestamp,
            event: "silence_end",
            duration_sec: *duration_secs,
            threshold_db: *threshold_db,
        },
        Alert::Test => LogEntry {
            timestamp,
            event: "test",
            duration_sec: 0.0,
            threshold_db: 0.0,
        },
    };

    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}
