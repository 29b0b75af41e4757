//! Email alert delivery over SMTP.
//!
//! TLS mode follows the configured port: 587 uses STARTTLS, 465 implicit
//! TLS, anything else opportunistic TLS.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Alert, NotifyError};
use crate::config::NotificationConfig;

fn compose(alert: &Alert) -> (String, String) {
    match alert {
        Alert::SilenceStart {
            duration_secs,
            threshold_db,
        } => (
            "Aircast: silence detected".to_string(),
            format!(
                "Silence detected on the program feed.\n\n\
                 Below threshold for: {duration_secs:.1} s\n\
                 Threshold: {threshold_db:.1} dB\n"
            ),
        ),
        Alert::SilenceEnd { duration_secs, .. } => (
            "Aircast: audio restored".to_string(),
            format!(
                "Audio has recovered on the program feed.\n\n\
                 Total silence duration: {duration_secs:.1} s\n"
            ),
        ),
        Alert::Test => (
            "Aircast: test notification".to_string(),
            "This is a test notification. Email alerting is configured correctly.\n".to_string(),
        ),
    }
}

fn build_transport(
    cfg: &NotificationConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let tls = TlsParameters::new(cfg.email_host.clone())?;
    let tls_mode = match cfg.email_port {
        465 => Tls::Wrapper(tls),
        587 => Tls::Required(tls),
        _ => Tls::Opportunistic(tls),
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.email_host)
        .port(cfg.email_port)
        .tls(tls_mode);
    if !cfg.email_username.is_empty() {
        builder = builder.credentials(Credentials::new(
            cfg.email_username.clone(),
            cfg.email_password.clone(),
        ));
    }
    Ok(builder.build())
}

pub(super) async fn send(cfg: &NotificationConfig, alert: &Alert) -> Result<(), NotifyError> {
    let (subject, body) = compose(alert);
    let from: Mailbox = cfg.email_from.parse()?;

    let mut message = Message::builder().from(from).subject(subject);
    for recipient in &cfg.email_recipients {
        message = message.to(recipient.parse()?);
    }
    let email = message.body(body)?;

    build_transport(cfg)?.send(email).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_alert_mentions_threshold() {
        let (subject, body) = compose(&Alert::SilenceStart {
            duration_secs: 15.0,
            threshold_db: -40.0,
        });
        assert!(subject.contains("silence"));
        assert!(body.contains("-40.0 dB"));
        assert!(body.contains("15.0 s"));
    }

    #[test]
    fn end_alert_reports_total_duration() {
        let (subject, body) = compose(&Alert::SilenceEnd {
            duration_secs: 123.4,
            threshold_db: -40.0,
        });
        assert!(subject.contains("restored"));
        assert!(body.contains("123.4 s"));
    }
}
