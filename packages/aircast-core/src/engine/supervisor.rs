//! The audio engine: capture child supervision and public control surface.
//!
//! One supervisor loop owns the capture child. On every exit it applies the
//! shared success/backoff rules and either respawns or, once the retry
//! budget is spent, stops all sinks and parks the engine with a terminal
//! error. The control plane talks to [`AudioEngine`]; everything else is
//! internal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::MeterSnapshot;
use crate::backoff::Backoff;
use crate::config::{ConfigStore, OutputConfig, RecordingConfig, RecordingMode, SinkConfig};
use crate::constants::{
    BACKOFF_INITIAL, CAPTURE_MAX_RETRIES, RESTART_PAUSE, SHUTDOWN_TIMEOUT, SINK_SETTLE_DELAY,
    SUCCESS_RUN,
};
use crate::engine::{distributor, EncoderState, LevelsCell};
use crate::error::{AircastError, AircastResult};
use crate::notify::{AlertChannel, Notifier};
use crate::process;
use crate::retention::RetentionCleaner;
use crate::sink::{SinkHooks, SinkKind, SinkManager, SinkStatus};

/// Control-plane snapshot of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EncoderState,
    pub last_error: String,
    pub retry_count: u32,
    /// Seconds since the current capture child came up.
    pub uptime_secs: Option<u64>,
}

struct EngineShared {
    state: EncoderState,
    stop: CancellationToken,
    start_time: Option<Instant>,
    last_error: String,
    retry_count: u32,
    backoff: Backoff,
}

pub(crate) struct EngineInner {
    pub(crate) config: Arc<ConfigStore>,
    pub(crate) outputs: SinkManager,
    pub(crate) recordings: SinkManager,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) levels: LevelsCell,
    shared: RwLock<EngineShared>,
    cleaners: tokio::sync::Mutex<HashMap<String, RetentionCleaner>>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EngineInner {
    fn is_capture_running(&self) -> bool {
        self.shared.read().state == EncoderState::Running
    }

    fn output_hooks(self: &Arc<Self>) -> SinkHooks {
        let config = Arc::clone(&self.config);
        let probe = Arc::downgrade(self);
        SinkHooks {
            fetch_config: Arc::new(move |id| config.get_output(id).map(SinkConfig::Output)),
            encoder_running: Arc::new(move || {
                probe
                    .upgrade()
                    .is_some_and(|inner| inner.is_capture_running())
            }),
            ffmpeg_path: self.config.capture().ffmpeg_path,
        }
    }

    fn recording_hooks(self: &Arc<Self>) -> SinkHooks {
        let config = Arc::clone(&self.config);
        let probe = Arc::downgrade(self);
        SinkHooks {
            fetch_config: Arc::new(move |id| config.get_recording(id).map(SinkConfig::Recording)),
            encoder_running: Arc::new(move || {
                probe
                    .upgrade()
                    .is_some_and(|inner| inner.is_capture_running())
            }),
            ffmpeg_path: self.config.capture().ffmpeg_path,
        }
    }

    /// Starts every enabled output and every auto-mode recording.
    async fn start_enabled_sinks(self: &Arc<Self>) {
        for output in self.config.outputs() {
            if !output.enabled {
                continue;
            }
            if let Err(e) = self.outputs.start(&output.id, self.output_hooks()).await {
                log::warn!("[Engine] Output {} failed to start: {e}", output.id);
            }
        }
        for recording in self.config.recordings() {
            if recording.mode != RecordingMode::Auto {
                continue;
            }
            if let Err(e) = self
                .recordings
                .start(&recording.id, self.recording_hooks())
                .await
            {
                log::warn!("[Engine] Recording {} failed to start: {e}", recording.id);
            }
        }
    }

    /// Stops every sink in both registries, aggregating errors.
    async fn stop_all_sinks(&self) -> AircastResult<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.outputs.stop_all().await {
            errors.push(e.to_string());
        }
        if let Err(e) = self.recordings.stop_all().await {
            errors.push(e.to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AircastError::Shutdown(errors))
        }
    }
}

/// The long-running audio streaming supervisor.
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

impl AudioEngine {
    #[must_use]
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let notifier = Arc::new(Notifier::live(config.notifications()));
        Self {
            inner: Arc::new(EngineInner {
                outputs: SinkManager::new(SinkKind::Output, Arc::clone(&config)),
                recordings: SinkManager::new(SinkKind::Recording, Arc::clone(&config)),
                notifier,
                levels: LevelsCell::new(),
                shared: RwLock::new(EngineShared {
                    state: EncoderState::Stopped,
                    stop: CancellationToken::new(),
                    start_time: None,
                    last_error: String::new(),
                    retry_count: 0,
                    backoff: Backoff::default(),
                }),
                cleaners: tokio::sync::Mutex::new(HashMap::new()),
                supervisor: tokio::sync::Mutex::new(None),
                config,
            }),
        }
    }

    /// Shared configuration handle, for the control plane.
    #[must_use]
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.inner.config
    }

    /// Starts the capture supervisor. Idempotent: starting a non-stopped
    /// engine is a no-op.
    pub async fn start(&self) -> AircastResult<()> {
        {
            let mut shared = self.inner.shared.write();
            if shared.state != EncoderState::Stopped {
                return Ok(());
            }
            shared.state = EncoderState::Starting;
            shared.stop = CancellationToken::new();
            shared.start_time = None;
            shared.last_error.clear();
            shared.retry_count = 0;
            shared.backoff.reset(BACKOFF_INITIAL);
        }
        self.inner.levels.reset();
        self.inner.notifier.reset();
        self.inner.notifier.set_config(self.inner.config.notifications());
        log::info!("[Engine] Starting");

        let handle = tokio::spawn(run_capture_loop(Arc::clone(&self.inner)));
        *self.inner.supervisor.lock().await = Some(handle);
        self.sync_cleaners().await;
        Ok(())
    }

    /// Stops everything: sinks first, then the capture child (gracefully,
    /// with a bounded escalation to kill). Idempotent; errors from the
    /// shutdown path are aggregated, never fatal.
    pub async fn stop(&self) -> AircastResult<()> {
        {
            let mut shared = self.inner.shared.write();
            if shared.state != EncoderState::Stopped {
                shared.state = EncoderState::Stopping;
            }
            shared.stop.cancel();
        }
        log::info!("[Engine] Stopping");

        let mut errors = Vec::new();
        if let Err(e) = self.inner.stop_all_sinks().await {
            errors.push(e.to_string());
        }

        if let Some(handle) = self.inner.supervisor.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT + Duration::from_secs(1), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(format!("capture supervisor task failed: {e}")),
                Err(_) => errors.push("capture supervisor did not exit in time".to_string()),
            }
        }
        self.stop_cleaners().await;

        {
            let mut shared = self.inner.shared.write();
            shared.state = EncoderState::Stopped;
            shared.start_time = None;
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AircastError::Shutdown(errors))
        }
    }

    /// Full restart: stop, short pause, start.
    pub async fn restart(&self) -> AircastResult<()> {
        if let Err(e) = self.stop().await {
            log::warn!("[Engine] Stop during restart reported: {e}");
        }
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start().await
    }

    /// Starts one configured sink by ID. A given-up sink gets a fresh
    /// supervisor and therefore a fresh retry budget.
    pub async fn start_sink(&self, id: &str) -> AircastResult<()> {
        match self.inner.config.get_sink(id) {
            Some(SinkConfig::Output(_)) => {
                self.inner.outputs.start(id, self.inner.output_hooks()).await
            }
            Some(SinkConfig::Recording(_)) => {
                self.inner
                    .recordings
                    .start(id, self.inner.recording_hooks())
                    .await
            }
            None => Err(AircastError::SinkNotFound(id.to_string())),
        }
    }

    /// Stops one sink by ID. Unknown IDs are a no-op.
    pub async fn stop_sink(&self, id: &str) -> AircastResult<()> {
        self.inner.outputs.stop(id).await?;
        self.inner.recordings.stop(id).await
    }

    /// Engine state snapshot.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let shared = self.inner.shared.read();
        EngineStatus {
            state: shared.state,
            last_error: shared.last_error.clone(),
            retry_count: shared.retry_count,
            uptime_secs: shared.start_time.map(|t| t.elapsed().as_secs()),
        }
    }

    /// Latest metering snapshot (non-blocking; may be briefly stale).
    #[must_use]
    pub fn levels(&self) -> MeterSnapshot {
        self.inner.levels.read()
    }

    /// Status of every registered sink, outputs and recordings combined.
    #[must_use]
    pub fn sink_statuses(&self) -> HashMap<String, SinkStatus> {
        let mut all = self.inner.outputs.statuses();
        all.extend(self.inner.recordings.statuses());
        all
    }

    /// Sends a test alert on one notification channel, if configured.
    pub fn send_test_notification(&self, channel: AlertChannel) -> bool {
        self.inner.notifier.set_config(self.inner.config.notifications());
        self.inner.notifier.send_test(channel)
    }

    // ── Configuration mutations ─────────────────────────────────────────────

    /// Adds an output and, when the engine is running and the output is
    /// enabled, starts it immediately.
    pub async fn add_output(&self, output: OutputConfig) -> AircastResult<String> {
        let enabled = output.enabled;
        let id = self.inner.config.add_output(output)?;
        if enabled && self.inner.is_capture_running() {
            self.start_sink(&id).await?;
        }
        Ok(id)
    }

    /// Replaces an output's configuration. The sink is restarted so the new
    /// settings take effect.
    pub async fn update_output(&self, output: OutputConfig) -> AircastResult<()> {
        let id = output.id.clone();
        let enabled = output.enabled;
        self.inner.config.update_output(output)?;
        self.inner.outputs.stop(&id).await?;
        if enabled && self.inner.is_capture_running() {
            self.start_sink(&id).await?;
        }
        Ok(())
    }

    /// Stops and removes an output.
    pub async fn remove_output(&self, id: &str) -> AircastResult<()> {
        self.inner.outputs.stop(id).await?;
        self.inner.config.remove_output(id);
        Ok(())
    }

    /// Adds a recording, starts its retention cleaner and, when the engine
    /// is running and the recording is auto-mode, starts it immediately.
    pub async fn add_recording(&self, recording: RecordingConfig) -> AircastResult<String> {
        let auto = recording.mode == RecordingMode::Auto;
        let id = self.inner.config.add_recording(recording)?;
        self.sync_cleaners().await;
        if auto && self.inner.is_capture_running() {
            self.start_sink(&id).await?;
        }
        Ok(id)
    }

    /// Replaces a recording's configuration; restarts the sink and respawns
    /// its retention cleaner.
    pub async fn update_recording(&self, recording: RecordingConfig) -> AircastResult<()> {
        let id = recording.id.clone();
        let auto = recording.mode == RecordingMode::Auto;
        self.inner.config.update_recording(recording)?;
        self.inner.recordings.stop(&id).await?;
        if let Some(cleaner) = self.inner.cleaners.lock().await.remove(&id) {
            cleaner.stop().await;
        }
        self.sync_cleaners().await;
        if auto && self.inner.is_capture_running() {
            self.start_sink(&id).await?;
        }
        Ok(())
    }

    /// Stops and removes a recording, including its retention cleaner.
    pub async fn remove_recording(&self, id: &str) -> AircastResult<()> {
        self.inner.recordings.stop(id).await?;
        self.inner.config.remove_recording(id);
        if let Some(cleaner) = self.inner.cleaners.lock().await.remove(id) {
            cleaner.stop().await;
        }
        Ok(())
    }

    /// Spawns cleaners for recordings that lack one and reaps cleaners for
    /// recordings no longer configured.
    async fn sync_cleaners(&self) {
        let recordings = self.inner.config.recordings();
        let mut cleaners = self.inner.cleaners.lock().await;

        let stale: Vec<String> = cleaners
            .keys()
            .filter(|id| !recordings.iter().any(|r| &r.id == *id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(cleaner) = cleaners.remove(&id) {
                cleaner.stop().await;
            }
        }

        for recording in recordings {
            cleaners
                .entry(recording.id.clone())
                .or_insert_with(|| RetentionCleaner::spawn(recording));
        }
    }

    async fn stop_cleaners(&self) {
        let mut cleaners = self.inner.cleaners.lock().await;
        for (_, cleaner) in cleaners.drain() {
            cleaner.stop().await;
        }
    }
}

/// The capture supervisor loop: spawn, distribute, wait, back off, repeat.
async fn run_capture_loop(inner: Arc<EngineInner>) {
    let stop = inner.shared.read().stop.clone();

    loop {
        if stop.is_cancelled() {
            break;
        }

        let capture_cfg = inner.config.capture();
        // Silence thresholds are snapshotted once per session; edits apply
        // on the next capture session.
        let silence_cfg = inner.config.silence();
        inner.notifier.reset();

        match process::spawn_capture(&capture_cfg.ffmpeg_path, &capture_cfg.capture_args()) {
            Ok(mut capture) => {
                let started = Instant::now();
                {
                    let mut shared = inner.shared.write();
                    shared.state = EncoderState::Running;
                    shared.start_time = Some(started);
                    shared.last_error.clear();
                }
                inner.levels.reset();
                log::info!(
                    "[Engine] Capture started (device {})",
                    capture_cfg.device
                );

                let dist = tokio::spawn(distributor::run(
                    Arc::clone(&inner),
                    capture.stdout,
                    silence_cfg,
                    stop.clone(),
                ));

                // Give the capture a moment to settle before encoders attach.
                let starter = {
                    let inner = Arc::clone(&inner);
                    let stop = stop.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(SINK_SETTLE_DELAY) => {
                                inner.start_enabled_sinks().await;
                            }
                            _ = stop.cancelled() => {}
                        }
                    })
                };

                let exited = tokio::select! {
                    status = capture.child.wait() => Some(status.ok()),
                    _ = stop.cancelled() => None,
                };
                let status = match exited {
                    Some(status) => status,
                    // Stop requested while the capture was still up.
                    None => {
                        process::terminate_gracefully(&mut capture.child, SHUTDOWN_TIMEOUT).await
                    }
                };
                let run_duration = started.elapsed();
                let _ = dist.await;
                starter.abort();
                // Let the stderr drain hit EOF before extracting the error.
                let _ =
                    tokio::time::timeout(Duration::from_millis(250), capture.stderr_task).await;

                if stop.is_cancelled() {
                    break;
                }

                let clean_exit = status.is_some_and(|s| s.success());
                let error_line = if clean_exit {
                    String::new()
                } else {
                    let line = capture.stderr.last_line();
                    if line.is_empty() {
                        "Capture process exited unexpectedly".to_string()
                    } else {
                        line
                    }
                };
                log::warn!(
                    "[Engine] Capture exited after {:.1}s: {}",
                    run_duration.as_secs_f64(),
                    if error_line.is_empty() {
                        "clean exit"
                    } else {
                        error_line.as_str()
                    }
                );

                let exhausted = {
                    let mut shared = inner.shared.write();
                    if !error_line.is_empty() {
                        shared.last_error = error_line.clone();
                    }
                    if run_duration >= SUCCESS_RUN {
                        shared.retry_count = 0;
                        shared.backoff.reset(BACKOFF_INITIAL);
                        false
                    } else {
                        shared.retry_count += 1;
                        shared.retry_count >= CAPTURE_MAX_RETRIES
                    }
                };
                if exhausted {
                    give_up(&inner, &error_line).await;
                    return;
                }
                inner.shared.write().state = EncoderState::Starting;
            }
            Err(e) => {
                // Spawn failure follows the same backoff as a transient exit.
                let message = format!("Failed to start capture: {e}");
                log::warn!("[Engine] {message}");
                let exhausted = {
                    let mut shared = inner.shared.write();
                    shared.last_error = message.clone();
                    shared.state = EncoderState::Starting;
                    shared.retry_count += 1;
                    shared.retry_count >= CAPTURE_MAX_RETRIES
                };
                if exhausted {
                    give_up(&inner, &message).await;
                    return;
                }
            }
        }

        let delay = inner.shared.write().backoff.next();
        log::info!("[Engine] Restarting capture in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.cancelled() => break,
        }
    }
}

/// Terminal failure path: the retry budget is spent. Sinks are stopped and
/// the engine parks in `Stopped` with a terminal error; the process keeps
/// running so the control plane stays reachable.
async fn give_up(inner: &Arc<EngineInner>, error_line: &str) {
    let attempts = {
        let mut shared = inner.shared.write();
        shared.state = EncoderState::Stopping;
        shared.retry_count
    };
    if let Err(e) = inner.stop_all_sinks().await {
        log::warn!("[Engine] Stopping sinks after capture give-up reported: {e}");
    }
    let message = format!("Stopped after {attempts} failed attempts: {error_line}");
    log::error!("[Engine] {message}");
    let mut shared = inner.shared.write();
    shared.state = EncoderState::Stopped;
    shared.start_time = None;
    shared.last_error = message;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, Config};

    fn engine() -> AudioEngine {
        AudioEngine::new(ConfigStore::new(Config::default()))
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_no_op() {
        let engine = engine();
        assert_eq!(engine.status().state, EncoderState::Stopped);
        engine.stop().await.expect("stop is idempotent");
        engine.stop().await.expect("stop is idempotent twice");
        assert_eq!(engine.status().state, EncoderState::Stopped);
        assert!(engine.sink_statuses().is_empty());
    }

    #[tokio::test]
    async fn unknown_sink_id_is_reported() {
        let engine = engine();
        assert!(matches!(
            engine.start_sink("missing").await,
            Err(AircastError::SinkNotFound(_))
        ));
        // Stopping an unknown sink stays a no-op.
        engine.stop_sink("missing").await.expect("no-op stop");
    }

    #[tokio::test]
    async fn initial_levels_are_the_floor() {
        let engine = engine();
        let snapshot = engine.levels();
        assert_eq!(snapshot.levels.rms_left, crate::constants::DB_FLOOR);
        assert!(!snapshot.in_silence);
    }

    #[tokio::test]
    async fn status_starts_without_uptime_or_error() {
        let engine = engine();
        let status = engine.status();
        assert!(status.last_error.is_empty());
        assert_eq!(status.retry_count, 0);
        assert!(status.uptime_secs.is_none());
    }

    #[tokio::test]
    async fn recording_lifecycle_manages_cleaners() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let id = engine
            .add_recording(RecordingConfig {
                id: String::new(),
                name: "archive".into(),
                base_path: dir.path().to_path_buf(),
                codec: "mp3".into(),
                mode: RecordingMode::Manual,
                retention_days: 7,
                max_retries: 1,
                created_at: 0,
            })
            .await
            .expect("add recording");

        assert_eq!(engine.inner.cleaners.lock().await.len(), 1);
        engine.remove_recording(&id).await.expect("remove");
        assert!(engine.inner.cleaners.lock().await.is_empty());
        assert!(engine.config().get_recording(&id).is_none());
    }

    /// Ten consecutive capture spawn failures must park the engine with the
    /// terminal error and no surviving sinks. Spawn failures return without
    /// touching the clock, so the paused runtime fast-forwards through every
    /// backoff wait.
    #[tokio::test(start_paused = true)]
    async fn capture_give_up_parks_the_engine_with_a_terminal_error() {
        let store = ConfigStore::new(Config {
            capture: CaptureConfig {
                device: "default".into(),
                ffmpeg_path: "/nonexistent/capture-binary".into(),
            },
            ..Config::default()
        });
        let engine = AudioEngine::new(store);
        engine.start().await.expect("start");

        let mut polls = 0;
        loop {
            if engine.status().state == EncoderState::Stopped {
                break;
            }
            polls += 1;
            assert!(
                polls < 10_000,
                "engine never gave up: {:?}",
                engine.status()
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let status = engine.status();
        assert!(
            status
                .last_error
                .starts_with("Stopped after 10 failed attempts:"),
            "unexpected terminal error: {}",
            status.last_error
        );
        assert!(status.last_error.contains("Failed to start capture"));
        assert_eq!(status.retry_count, 10);
        assert!(status.uptime_secs.is_none());
        assert!(engine.sink_statuses().is_empty());

        // The engine parks rather than exits; stop stays a no-op.
        engine.stop().await.expect("stop after give-up");
        assert_eq!(engine.status().state, EncoderState::Stopped);
    }
}
