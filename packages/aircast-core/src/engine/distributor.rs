//! The PCM distributor: one read loop from capture stdout into everything.
//!
//! Every block is metered first (possibly firing silence notifications) and
//! only then fanned out to the sinks, so metric windows close in order and
//! an alert can never trail the audio it describes. The loop owns a single
//! reused scratch buffer; nothing on this path allocates per iteration.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio_util::sync::CancellationToken;

use crate::audio::AnalysisChain;
use crate::config::SilenceConfig;
use crate::constants::PCM_BUFFER_BYTES;
use crate::engine::supervisor::EngineInner;

/// Runs until the capture stream ends or the session is cancelled. The
/// capture supervisor decides what happens next; the distributor never
/// restarts anything itself.
pub(crate) async fn run(
    inner: Arc<EngineInner>,
    mut stdout: ChildStdout,
    silence_cfg: SilenceConfig,
    stop: CancellationToken,
) {
    let mut buf = vec![0u8; PCM_BUFFER_BYTES];
    let mut chain = AnalysisChain::new(silence_cfg.clone());
    let mut blocks: u64 = 0;

    loop {
        let n = tokio::select! {
            _ = stop.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                // EOF: the capture child exited (or its stdout was closed).
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::debug!("[Distributor] Capture read ended: {e}");
                    break;
                }
            },
        };
        blocks += 1;

        let block = &buf[..n];
        if let Some((snapshot, event)) = chain.process(block, Instant::now()) {
            inner
                .notifier
                .handle_event(&event, silence_cfg.threshold_db);
            inner.levels.publish(snapshot);
        }

        inner.outputs.write_all(block).await;
        inner.recordings.write_all(block).await;
    }

    log::debug!("[Distributor] Exiting after {blocks} blocks");
}
