//! Per-sink encoder supervision.
//!
//! The monitor task owns the encoder child outright: it awaits the exit,
//! applies the retry budget with exponential backoff and is the only place
//! that respawns. The write path never restarts anything; it only feeds the
//! pipe and records failures. A CAS-set `restarting` flag makes overlapping
//! restart attempts coalesce.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::{RecordingMode, SinkConfig};
use crate::constants::{
    BACKOFF_INITIAL, CHANNELS, SAMPLE_RATE, SHUTDOWN_TIMEOUT, STABLE_AFTER, SUCCESS_RUN,
};
use crate::error::{AircastError, AircastResult};
use crate::process::{self, StderrRing};
use crate::sink::recorder::{self, RotationStamp};
use crate::sink::{SinkKind, SinkStatus};

/// Callbacks injected by the engine so a supervisor can make restart
/// decisions without reaching back into the registry.
#[derive(Clone)]
pub struct SinkHooks {
    /// Fetches the latest configuration for a sink ID; `None` once removed.
    pub fetch_config: Arc<dyn Fn(&str) -> Option<SinkConfig> + Send + Sync>,
    /// Whether the capture side is still running; restarts stop when it
    /// is not.
    pub encoder_running: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Encoder binary invoked for every child.
    pub ffmpeg_path: String,
}

struct SinkState {
    running: bool,
    started_at: Instant,
    last_error: String,
    retry_count: u32,
    max_retries: u32,
    backoff: Backoff,
    rotation: Option<RotationStamp>,
    auto_rotate: bool,
}

struct SinkShared {
    id: String,
    label: String,
    hooks: SinkHooks,
    stderr: StderrRing,
    stop: CancellationToken,
    restarting: AtomicBool,
    rotating: AtomicBool,
    state: Mutex<SinkState>,
    /// Single writer (the distributor); kept outside the state lock so a
    /// blocked pipe never stalls status reads.
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    monitor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Supervisor for one output or recording.
pub struct SinkSupervisor {
    shared: Arc<SinkShared>,
}

impl SinkSupervisor {
    #[must_use]
    pub fn new(id: String, kind: SinkKind, hooks: SinkHooks) -> Self {
        let label = format!("{} {}", kind.label(), id);
        Self {
            shared: Arc::new(SinkShared {
                id,
                label,
                hooks,
                stderr: StderrRing::new(),
                stop: CancellationToken::new(),
                restarting: AtomicBool::new(false),
                rotating: AtomicBool::new(false),
                state: Mutex::new(SinkState {
                    running: false,
                    started_at: Instant::now(),
                    last_error: String::new(),
                    retry_count: 0,
                    max_retries: 0,
                    backoff: Backoff::default(),
                    rotation: None,
                    auto_rotate: false,
                }),
                stdin: tokio::sync::Mutex::new(None),
                monitor: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// The sink's stable ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Spawns the encoder child and its monitor. Idempotent: a running
    /// supervisor is left alone. The monitor slot doubles as the start
    /// serialization lock so concurrent starts cannot race.
    pub async fn start(&self) -> AircastResult<()> {
        let mut monitor = self.shared.monitor.lock().await;
        if self.shared.state.lock().running {
            return Ok(());
        }
        let cfg = (self.shared.hooks.fetch_config)(&self.shared.id)
            .ok_or_else(|| AircastError::SinkNotFound(self.shared.id.clone()))?;
        let session = spawn_session(&self.shared, &cfg).await?;
        log::info!("[{}] Encoder started", self.shared.label);

        let shared = Arc::clone(&self.shared);
        *monitor = Some(tokio::spawn(run_monitor(shared, session)));
        Ok(())
    }

    /// Stops the sink: closes the PCM pipe, signals the child and waits for
    /// the monitor to finish. Idempotent.
    pub async fn stop(&self) -> AircastResult<()> {
        self.shared.stop.cancel();
        self.shared.state.lock().running = false;
        // Lock order matches start(): monitor slot before the stdin pipe.
        let handle = self.shared.monitor.lock().await.take();
        *self.shared.stdin.lock().await = None;
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                AircastError::Shutdown(vec![format!(
                    "{} monitor did not shut down cleanly: {e}",
                    self.shared.label
                )])
            })?;
            log::info!("[{}] Stopped", self.shared.label);
        }
        Ok(())
    }

    /// Feeds one PCM block to the encoder. Blocks for a sink that is not
    /// running (or mid-rotation) are dropped silently; a write failure marks
    /// the sink not-running and is reported so the fan-out can account for
    /// it. Restarting is the monitor's job, never the writer's.
    pub async fn write(&self, block: &[u8]) -> AircastResult<()> {
        if !self.shared.state.lock().running {
            return Ok(());
        }
        if self.hour_rolled_over() {
            self.begin_rotation().await;
            return Ok(());
        }

        let mut stdin = self.shared.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Ok(());
        };
        if let Err(e) = pipe.write_all(block).await {
            drop(stdin);
            {
                let mut st = self.shared.state.lock();
                st.last_error = format!("PCM write failed: {e}");
                st.running = false;
            }
            log::warn!("[{}] PCM write failed: {e}", self.shared.label);
            return Err(AircastError::Io(e));
        }
        Ok(())
    }

    /// Operator-facing status snapshot.
    #[must_use]
    pub fn status(&self) -> SinkStatus {
        let st = self.shared.state.lock();
        SinkStatus {
            running: st.running,
            stable: st.running && st.started_at.elapsed() >= STABLE_AFTER,
            last_error: st.last_error.clone(),
            retry_count: st.retry_count,
            max_retries: st.max_retries,
            given_up: st.retry_count > st.max_retries,
        }
    }

    /// Whether an encoder child is currently attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn hour_rolled_over(&self) -> bool {
        let st = self.shared.state.lock();
        st.auto_rotate
            && st
                .rotation
                .is_some_and(|stamp| stamp != RotationStamp::now())
    }

    /// Rewrites the current child's rotation stamp so tests can fabricate
    /// an hour boundary without waiting for one.
    #[cfg(test)]
    fn backdate_rotation(&self, stamp: RotationStamp) {
        self.shared.state.lock().rotation = Some(stamp);
    }

    /// Closes the pipe so the encoder finalizes its file; the monitor sees
    /// the exit with the rotating flag set and respawns on the next hour's
    /// file without touching the retry budget.
    async fn begin_rotation(&self) {
        if self.shared.rotating.swap(true, Ordering::SeqCst) {
            return; // rotation already in flight
        }
        log::info!("[{}] Hour boundary crossed, rotating file", self.shared.label);
        *self.shared.stdin.lock().await = None;
    }
}

/// Builds the encoder argv for one sink configuration. Recordings also get
/// their file path planned (and the dated directory created).
async fn build_args(
    cfg: &SinkConfig,
) -> AircastResult<(Vec<String>, Option<RotationStamp>, bool)> {
    let codec = cfg.codec();
    let mut args: Vec<String> = vec![
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        SAMPLE_RATE.to_string(),
        "-ac".into(),
        CHANNELS.to_string(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-i".into(),
        "pipe:0".into(),
        "-codec:a".into(),
    ];
    args.extend(codec.encoder_args().iter().map(|s| s.to_string()));
    args.push("-f".into());
    args.push(codec.container().into());

    match cfg {
        SinkConfig::Output(output) => {
            args.push(output.destination_url());
            Ok((args, None, false))
        }
        SinkConfig::Recording(recording) => {
            let (path, stamp) =
                recorder::plan_recording_path(&recording.base_path, codec.extension()).await?;
            args.push("-y".into());
            args.push(path.to_string_lossy().into_owned());
            Ok((args, Some(stamp), recording.mode == RecordingMode::Auto))
        }
    }
}

/// One spawned encoder child plus its stderr drain handle.
struct Session {
    child: Child,
    stderr_task: tokio::task::JoinHandle<()>,
}

/// Spawns one encoder child for `cfg` and installs it into the shared state.
async fn spawn_session(shared: &Arc<SinkShared>, cfg: &SinkConfig) -> AircastResult<Session> {
    let (args, rotation, auto_rotate) = build_args(cfg).await?;
    let encoder = process::spawn_encoder(&shared.hooks.ffmpeg_path, &args, &shared.stderr)
        .map_err(|e| AircastError::Spawn {
            what: "encoder",
            source: e,
        })?;

    *shared.stdin.lock().await = Some(encoder.stdin);
    {
        let mut st = shared.state.lock();
        st.running = true;
        st.started_at = Instant::now();
        st.max_retries = cfg.effective_max_retries();
        st.rotation = rotation;
        st.auto_rotate = auto_rotate;
    }
    Ok(Session {
        child: encoder.child,
        stderr_task: encoder.stderr_task,
    })
}

/// Monitor loop: waits for the current child, records the outcome and
/// decides whether to rotate, restart or exit.
async fn run_monitor(shared: Arc<SinkShared>, first: Session) {
    let mut next = Some(first);
    while let Some(session) = next.take() {
        let Session {
            mut child,
            stderr_task,
        } = session;
        let started = shared.state.lock().started_at;
        let exited = tokio::select! {
            status = child.wait() => Some(status.ok()),
            _ = shared.stop.cancelled() => None,
        };
        let status = match exited {
            Some(status) => status,
            // Stop requested while the child was still up.
            None => process::terminate_gracefully(&mut child, SHUTDOWN_TIMEOUT).await,
        };
        let run_duration = started.elapsed();
        // Let the drain task hit EOF so the ring holds the final output.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(250), stderr_task).await;
        *shared.stdin.lock().await = None;

        if shared.stop.is_cancelled() {
            break;
        }

        let rotating = shared.rotating.swap(false, Ordering::SeqCst);
        let clean_exit = status.is_some_and(|s| s.success());
        {
            let mut st = shared.state.lock();
            st.running = false;
            if !clean_exit && !rotating {
                let line = shared.stderr.last_line();
                st.last_error = if line.is_empty() {
                    "Encoder exited unexpectedly".to_string()
                } else {
                    line
                };
                log::warn!(
                    "[{}] Encoder exited after {:.1}s: {}",
                    shared.label,
                    run_duration.as_secs_f64(),
                    st.last_error
                );
            }
            if run_duration >= SUCCESS_RUN {
                st.retry_count = 0;
                st.backoff.reset(BACKOFF_INITIAL);
            }
        }

        if !(shared.hooks.encoder_running)() {
            log::debug!("[{}] Capture stopped, monitor exiting", shared.label);
            break;
        }

        if rotating {
            match refetch_and_spawn(&shared).await {
                Some(session) => {
                    next = Some(session);
                    continue;
                }
                None => {
                    // Rotation respawn failed or config vanished; fall back
                    // to the budgeted restart path.
                    log::warn!("[{}] Rotation respawn failed", shared.label);
                }
            }
        }

        next = restart_with_backoff(&shared).await;
    }
    shared.state.lock().running = false;
}

/// Immediate respawn used for file rotation; does not consume the budget.
async fn refetch_and_spawn(shared: &Arc<SinkShared>) -> Option<Session> {
    let cfg = (shared.hooks.fetch_config)(&shared.id)?;
    match spawn_session(shared, &cfg).await {
        Ok(session) => Some(session),
        Err(e) => {
            shared.state.lock().last_error = format!("Failed to start encoder: {e}");
            None
        }
    }
}

/// Restart phase. Guarded by the restarting flag so overlapping attempts
/// coalesce; only the monitor enters here.
async fn restart_with_backoff(shared: &Arc<SinkShared>) -> Option<Session> {
    if shared.restarting.swap(true, Ordering::SeqCst) {
        return None;
    }
    let session = restart_attempts(shared).await;
    shared.restarting.store(false, Ordering::SeqCst);
    session
}

async fn restart_attempts(shared: &Arc<SinkShared>) -> Option<Session> {
    loop {
        let (delay, attempt, budget) = {
            let mut st = shared.state.lock();
            st.retry_count += 1;
            let delay = st.backoff.next();
            (delay, st.retry_count, st.max_retries)
        };
        if attempt > budget {
            log::warn!(
                "[{}] Giving up after {attempt} attempts; operator restart required",
                shared.label
            );
            return None;
        }
        log::info!(
            "[{}] Restarting encoder in {delay:?} (attempt {attempt}/{budget})",
            shared.label
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.stop.cancelled() => return None,
        }

        // The sink may have been removed or edited while we waited.
        let Some(cfg) = (shared.hooks.fetch_config)(&shared.id) else {
            log::debug!("[{}] Configuration removed, monitor exiting", shared.label);
            return None;
        };
        if !(shared.hooks.encoder_running)() {
            return None;
        }

        match spawn_session(shared, &cfg).await {
            Ok(session) => {
                shared.state.lock().last_error.clear();
                log::info!("[{}] Encoder restarted", shared.label);
                return Some(session);
            }
            Err(e) => {
                shared.state.lock().last_error = format!("Failed to start encoder: {e}");
                log::warn!("[{}] Respawn failed: {e}", shared.label);
                // Keep trying; the next iteration backs off further.
            }
        }
    }
}
