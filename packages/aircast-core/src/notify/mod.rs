//! De-duplicated silence alerting across webhook, email and log channels.
//!
//! Each channel has a latch: set when its start alert is dispatched, cleared
//! on recovery. A recovery alert is sent only on channels whose latch was
//! set, so a recovery can never arrive without its matching start. Dispatch
//! runs on spawned tasks and never blocks the metering path; failures are
//! logged and never retried.

mod email;
mod eventlog;
mod webhook;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::SilenceEvent;
use crate::config::NotificationConfig;

/// A notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertChannel {
    Webhook,
    Email,
    Log,
}

/// One alert to deliver.
#[derive(Debug, Clone, Copy)]
pub enum Alert {
    /// Silence was confirmed.
    SilenceStart {
        duration_secs: f64,
        threshold_db: f64,
    },
    /// Audio returned after confirmed silence.
    SilenceEnd {
        duration_secs: f64,
        threshold_db: f64,
    },
    /// Operator-triggered delivery test.
    Test,
}

/// Errors from a single dispatch attempt. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("mail could not be built: {0}")]
    Mail(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("alert log write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("alert could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transport seam between latch bookkeeping and actual delivery.
///
/// Implementations must not block: [`LiveTransport`] spawns a task per
/// dispatch; tests substitute a counting transport.
pub trait NotificationTransport: Send + Sync {
    fn dispatch(&self, channel: AlertChannel, alert: Alert);
}

/// Production transport delivering over HTTP, SMTP and the alert log.
pub struct LiveTransport {
    cfg: NotificationConfig,
    http: reqwest::Client,
}

impl LiveTransport {
    #[must_use]
    pub fn new(cfg: NotificationConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }
}

impl NotificationTransport for LiveTransport {
    fn dispatch(&self, channel: AlertChannel, alert: Alert) {
        let cfg = self.cfg.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = match channel {
                AlertChannel::Webhook => webhook::send(&http, &cfg.webhook_url, &alert).await,
                AlertChannel::Email => email::send(&cfg, &alert).await,
                AlertChannel::Log => eventlog::append(&cfg.log_path, &alert).await,
            };
            match result {
                Ok(()) => log::debug!("[Notify] {channel:?} alert delivered"),
                Err(e) => log::warn!("[Notify] {channel:?} dispatch failed: {e}"),
            }
        });
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Latches {
    webhook: bool,
    email: bool,
    log: bool,
}

/// Silence alert orchestrator.
pub struct Notifier {
    cfg: Mutex<NotificationConfig>,
    latches: Mutex<Latches>,
    transport: Arc<dyn NotificationTransport>,
}

impl Notifier {
    /// Creates a notifier with the production transport.
    #[must_use]
    pub fn live(cfg: NotificationConfig) -> Self {
        let transport = Arc::new(LiveTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    /// Creates a notifier with a custom transport (tests).
    #[must_use]
    pub fn with_transport(
        cfg: NotificationConfig,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            cfg: Mutex::new(cfg),
            latches: Mutex::new(Latches::default()),
            transport,
        }
    }

    /// Replaces the channel configuration. Latch state is preserved so an
    /// ongoing episode still recovers on the channels that announced it.
    pub fn set_config(&self, cfg: NotificationConfig) {
        *self.cfg.lock() = cfg;
    }

    /// Clears all latches. Called when a capture session starts.
    pub fn reset(&self) {
        *self.latches.lock() = Latches::default();
    }

    /// Consumes one silence observation, dispatching start alerts on
    /// newly-latched channels and recovery alerts on previously-latched ones.
    pub fn handle_event(&self, event: &SilenceEvent, threshold_db: f64) {
        if event.just_entered {
            let alert = Alert::SilenceStart {
                duration_secs: event.duration_secs,
                threshold_db,
            };
            for channel in self.latch_for_start() {
                self.transport.dispatch(channel, alert);
            }
        }

        if event.just_recovered {
            let alert = Alert::SilenceEnd {
                duration_secs: event.total_duration_secs,
                threshold_db,
            };
            for channel in self.take_latched() {
                self.transport.dispatch(channel, alert);
            }
        }
    }

    /// Sends a test alert on one channel, if configured. Returns whether a
    /// dispatch was attempted.
    pub fn send_test(&self, channel: AlertChannel) -> bool {
        let cfg = self.cfg.lock().clone();
        let configured = match channel {
            AlertChannel::Webhook => cfg.webhook_configured(),
            AlertChannel::Email => cfg.email_configured(),
            AlertChannel::Log => cfg.log_configured(),
        };
        if configured {
            self.transport.dispatch(channel, Alert::Test);
        }
        configured
    }

    /// Atomically latches every configured, not-yet-latched channel and
    /// returns the ones to notify. Dispatch happens outside the lock.
    fn latch_for_start(&self) -> Vec<AlertChannel> {
        let cfg = self.cfg.lock().clone();
        let mut latches = self.latches.lock();
        let mut fire = Vec::new();
        if cfg.webhook_configured() && !latches.webhook {
            latches.webhook = true;
            fire.push(AlertChannel::Webhook);
        }
        if cfg.email_configured() && !latches.email {
            latches.email = true;
            fire.push(AlertChannel::Email);
        }
        if cfg.log_configured() && !latches.log {
            latches.log = true;
            fire.push(AlertChannel::Log);
        }
        fire
    }

    /// Atomically snapshots and clears all latches, returning the channels
    /// whose start alert had fired.
    fn take_latched(&self) -> Vec<AlertChannel> {
        let mut latches = self.latches.lock();
        let taken = std::mem::take(&mut *latches);
        let mut fire = Vec::new();
        if taken.webhook {
            fire.push(AlertChannel::Webhook);
        }
        if taken.email {
            fire.push(AlertChannel::Email);
        }
        if taken.log {
            fire.push(AlertChannel::Log);
        }
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test transport that counts dispatches per channel and kind.
    #[derive(Default)]
    struct CountingTransport {
        webhook_starts: AtomicUsize,
        webhook_ends: AtomicUsize,
        email_starts: AtomicUsize,
        log_starts: AtomicUsize,
        log_ends: AtomicUsize,
        tests: AtomicUsize,
    }

    impl NotificationTransport for CountingTransport {
        fn dispatch(&self, channel: AlertChannel, alert: Alert) {
            let counter = match (channel, &alert) {
                (AlertChannel::Webhook, Alert::SilenceStart { .. }) => &self.webhook_starts,
                (AlertChannel::Webhook, Alert::SilenceEnd { .. }) => &self.webhook_ends,
                (AlertChannel::Email, Alert::SilenceStart { .. }) => &self.email_starts,
                (AlertChannel::Log, Alert::SilenceStart { .. }) => &self.log_starts,
                (AlertChannel::Log, Alert::SilenceEnd { .. }) => &self.log_ends,
                (_, Alert::Test) => &self.tests,
                _ => return,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn full_config() -> NotificationConfig {
        NotificationConfig {
            webhook_url: "https://hooks.example.com/silence".into(),
            email_host: "smtp.example.com".into(),
            email_recipients: vec!["ops@example.com".into()],
            log_path: "/var/log/aircast/alerts.log".into(),
            ..NotificationConfig::default()
        }
    }

    fn entered() -> SilenceEvent {
        SilenceEvent {
            in_silence: true,
            duration_secs: 15.0,
            just_entered: true,
            ..SilenceEvent::default()
        }
    }

    fn recovered() -> SilenceEvent {
        SilenceEvent {
            just_recovered: true,
            total_duration_secs: 42.0,
            ..SilenceEvent::default()
        }
    }

    #[test]
    fn start_fires_once_per_episode() {
        let transport = Arc::new(CountingTransport::default());
        let notifier = Notifier::with_transport(full_config(), transport.clone());

        notifier.handle_event(&entered(), -40.0);
        // A duplicate entry (should not happen, but latches must hold).
        notifier.handle_event(&entered(), -40.0);

        assert_eq!(transport.webhook_starts.load(Ordering::SeqCst), 1);
        assert_eq!(transport.email_starts.load(Ordering::SeqCst), 1);
        assert_eq!(transport.log_starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recovery_only_fires_on_latched_channels() {
        let transport = Arc::new(CountingTransport::default());
        let mut cfg = full_config();
        cfg.email_host.clear(); // email unconfigured
        let notifier = Notifier::with_transport(cfg, transport.clone());

        notifier.handle_event(&entered(), -40.0);
        notifier.handle_event(&recovered(), -40.0);

        assert_eq!(transport.webhook_ends.load(Ordering::SeqCst), 1);
        assert_eq!(transport.log_ends.load(Ordering::SeqCst), 1);
        assert_eq!(transport.email_starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recovery_without_entry_is_silent() {
        let transport = Arc::new(CountingTransport::default());
        let notifier = Notifier::with_transport(full_config(), transport.clone());

        notifier.handle_event(&recovered(), -40.0);
        assert_eq!(transport.webhook_ends.load(Ordering::SeqCst), 0);
        assert_eq!(transport.log_ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn latches_rearm_after_recovery() {
        let transport = Arc::new(CountingTransport::default());
        let notifier = Notifier::with_transport(full_config(), transport.clone());

        notifier.handle_event(&entered(), -40.0);
        notifier.handle_event(&recovered(), -40.0);
        notifier.handle_event(&entered(), -40.0);

        assert_eq!(transport.webhook_starts.load(Ordering::SeqCst), 2);
        assert_eq!(transport.webhook_ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_clears_pending_recovery() {
        let transport = Arc::new(CountingTransport::default());
        let notifier = Notifier::with_transport(full_config(), transport.clone());

        notifier.handle_event(&entered(), -40.0);
        notifier.reset();
        notifier.handle_event(&recovered(), -40.0);

        assert_eq!(transport.webhook_ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_trigger_respects_configuration() {
        let transport = Arc::new(CountingTransport::default());
        let mut cfg = full_config();
        cfg.webhook_url.clear();
        let notifier = Notifier::with_transport(cfg, transport.clone());

        assert!(!notifier.send_test(AlertChannel::Webhook));
        assert!(notifier.send_test(AlertChannel::Log));
        assert_eq!(transport.tests.load(Ordering::SeqCst), 1);
    }
}
