//! Child process plumbing shared by the capture and sink supervisors.
//!
//! Encoder children receive PCM on stdin and have their stdout discarded;
//! the capture child produces PCM on stdout. In both cases stderr is drained
//! into a bounded ring so the last meaningful line can be surfaced as a
//! human-readable error after an unexpected exit.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::constants::{ERROR_TRUNCATE, STDERR_CAP};

// ─────────────────────────────────────────────────────────────────────────────
// Stderr Capture
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded capture of a child's stderr.
///
/// Oldest bytes are discarded once the cap is reached, so a chatty child
/// cannot grow the buffer while the most recent (and most relevant) output
/// is always retained.
#[derive(Clone, Default)]
pub struct StderrRing {
    buf: Arc<Mutex<VecDeque<u8>>>,
}

impl StderrRing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes, ring-discarding from the front past the cap.
    pub fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock();
        for &b in bytes {
            if buf.len() >= STDERR_CAP {
                buf.pop_front();
            }
            buf.push_back(b);
        }
    }

    /// Clears the buffer. Called whenever a fresh child is spawned so old
    /// errors are not attributed to the new process.
    pub fn clear(&self) {
        self.buf.lock().clear();
    }

    /// Returns the captured text, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        let buf = self.buf.lock();
        let (head, tail) = buf.as_slices();
        let mut bytes = Vec::with_capacity(buf.len());
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(tail);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Extracts the last meaningful stderr line, truncated for display.
    #[must_use]
    pub fn last_line(&self) -> String {
        last_meaningful_line(&self.contents())
    }

    /// Spawns a task draining `stderr` into this ring until EOF. The
    /// returned handle completes once the pipe is fully drained; supervisors
    /// await it (bounded) before extracting the last error line.
    fn drain(&self, mut stderr: tokio::process::ChildStderr) -> tokio::task::JoinHandle<()> {
        let ring = self.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => ring.push(&chunk[..n]),
                }
            }
        })
    }
}

/// Scans text from the last line upwards and returns the first non-empty
/// line, trimmed and truncated to [`ERROR_TRUNCATE`] characters.
#[must_use]
pub fn last_meaningful_line(text: &str) -> String {
    let line = text
        .trim_end()
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    truncate_error(line)
}

/// Truncates an error message to [`ERROR_TRUNCATE`] characters, appending
/// an ellipsis when anything was cut.
#[must_use]
pub fn truncate_error(msg: &str) -> String {
    if msg.chars().count() <= ERROR_TRUNCATE {
        msg.to_string()
    } else {
        let cut: String = msg.chars().take(ERROR_TRUNCATE).collect();
        format!("{cut}…")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spawning
// ─────────────────────────────────────────────────────────────────────────────

/// An encoder child: PCM goes in on stdin, stderr is ring-captured.
pub struct EncoderChild {
    pub child: Child,
    pub stdin: ChildStdin,
    /// Completes once stderr is fully drained into the ring.
    pub stderr_task: tokio::task::JoinHandle<()>,
}

/// A capture child: PCM comes out on stdout, stderr is ring-captured.
pub struct CaptureChild {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: StderrRing,
    /// Completes once stderr is fully drained into the ring.
    pub stderr_task: tokio::task::JoinHandle<()>,
}

/// Spawns an encoder child with stdin piped, stdout discarded and stderr
/// drained into `ring` (cleared first).
pub fn spawn_encoder(
    program: &str,
    args: &[String],
    ring: &StderrRing,
) -> std::io::Result<EncoderChild> {
    ring.clear();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take().expect("stdin was requested piped");
    let stderr_task = match child.stderr.take() {
        Some(stderr) => ring.drain(stderr),
        None => tokio::spawn(async {}),
    };
    Ok(EncoderChild {
        child,
        stdin,
        stderr_task,
    })
}

/// Spawns the capture child with stdout piped and stderr ring-captured.
pub fn spawn_capture(program: &str, args: &[String]) -> std::io::Result<CaptureChild> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout was requested piped");
    let ring = StderrRing::new();
    let stderr_task = match child.stderr.take() {
        Some(stderr) => ring.drain(stderr),
        None => tokio::spawn(async {}),
    };
    Ok(CaptureChild {
        child,
        stdout,
        stderr: ring,
        stderr_task,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination
// ─────────────────────────────────────────────────────────────────────────────

/// Sends the graceful-exit request to a child without waiting.
///
/// On unix this is SIGTERM, letting encoders flush their containers. On
/// other platforms no interrupt-class signal exists, so this is a no-op and
/// callers rely on the forced-kill escalation in [`terminate_gracefully`].
pub fn request_exit(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Safety: plain kill(2) on a pid we own; the worst failure mode is
        // ESRCH when the child already exited.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Asks a child to exit gracefully and escalates to a forced kill when it
/// does not comply within `timeout`. Returns the exit status when the child
/// could be reaped.
pub async fn terminate_gracefully(
    child: &mut Child,
    timeout: Duration,
) -> Option<std::process::ExitStatus> {
    request_exit(child);
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            log::warn!("[Process] Wait after graceful termination failed: {e}");
            None
        }
        Err(_) => {
            log::warn!("[Process] Child ignored graceful termination, killing");
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_discards_oldest_bytes() {
        let ring = StderrRing::new();
        ring.push(&vec![b'a'; STDERR_CAP]);
        ring.push(b"tail");
        let contents = ring.contents();
        assert_eq!(contents.len(), STDERR_CAP);
        assert!(contents.ends_with("tail"));
        assert!(contents.starts_with('a'));
    }

    #[test]
    fn last_line_skips_trailing_blanks() {
        let ring = StderrRing::new();
        ring.push(b"first error\nreal error\n\n   \n");
        assert_eq!(ring.last_line(), "real error");
    }

    #[test]
    fn last_line_of_empty_ring_is_empty() {
        assert_eq!(StderrRing::new().last_line(), "");
    }

    #[test]
    fn truncation_appends_ellipsis() {
        let long = "x".repeat(ERROR_TRUNCATE + 50);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), ERROR_TRUNCATE + 1);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(truncate_error("broken pipe"), "broken pipe");
    }

    #[test]
    fn clear_resets_contents() {
        let ring = StderrRing::new();
        ring.push(b"stale");
        ring.clear();
        assert_eq!(ring.contents(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn graceful_termination_reaps_a_sleeper() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("sh should spawn");

        let started = std::time::Instant::now();
        let status = terminate_gracefully(&mut child, Duration::from_secs(2)).await;
        assert!(status.is_some(), "child should be reaped");
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "termination should not wait for the sleep"
        );
    }
}
