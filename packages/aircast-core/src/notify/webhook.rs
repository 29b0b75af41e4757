//! Webhook alert delivery.
//!
//! Wire format (one JSON object per request):
//! - start: `{"event":"silence_detected","silence_duration":<sec>,"threshold":<dB>,"timestamp":<RFC3339 UTC>}`
//! - end:   `{"event":"silence_recovered","silence_duration":<sec>,"timestamp":<RFC3339 UTC>}`

use chrono::SecondsFormat;
use serde_json::json;

use super::{Alert, NotifyError};

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(super) async fn send(
    http: &reqwest::Client,
    url: &str,
    alert: &Alert,
) -> Result<(), NotifyError> {
    let payload = match alert {
        Alert::SilenceStart {
            duration_secs,
            threshold_db,
        } => json!({
            "event": "silence_detected",
            "silence_duration": duration_secs,
            "threshold": threshold_db,
            "timestamp": timestamp(),
        }),
        Alert::SilenceEnd { duration_secs, .. } => json!({
            "event": "silence_recovered",
            "silence_duration": duration_secs,
            "timestamp": timestamp(),
        }),
        Alert::Test => json!({
            "event": "test",
            "timestamp": timestamp(),
        }),
    };

    http.post(url)
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
