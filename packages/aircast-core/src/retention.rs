//! Periodic deletion of recording files past their retention window.
//!
//! One cleaner per recording. Each pass removes whole `YYYY-MM-DD`
//! directories older than the cutoff, then scans surviving dated
//! directories for individual files with stale modification times, pruning
//! directories that end up empty.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDate};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RecordingConfig;
use crate::constants::CLEANER_INTERVAL;

/// What one cleaning pass removed.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CleanStats {
    pub files: u64,
    pub dirs: u64,
}

impl CleanStats {
    fn changed(&self) -> bool {
        self.files > 0 || self.dirs > 0
    }
}

/// Background cleaner for one recording: an immediate pass, then hourly.
pub(crate) struct RetentionCleaner {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl RetentionCleaner {
    pub fn spawn(recording: RecordingConfig) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANER_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match run_pass(&recording.base_path, recording.retention_days).await {
                    Ok(stats) if stats.changed() => log::info!(
                        "[Retention {}] Removed {} files and {} directories older than {} days",
                        recording.id,
                        stats.files,
                        stats.dirs,
                        recording.retention_days
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("[Retention {}] Cleaning pass failed: {e}", recording.id);
                    }
                }
            }
        });
        Self { stop, handle }
    }

    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// One cleaning pass. Skips entirely when retention is disabled or the base
/// directory does not exist yet.
pub(crate) async fn run_pass(base: &Path, retention_days: u32) -> std::io::Result<CleanStats> {
    let mut stats = CleanStats::default();
    if retention_days == 0 || !tokio::fs::try_exists(base).await.unwrap_or(false) {
        return Ok(stats);
    }

    let cutoff_date = (Local::now() - chrono::Duration::days(i64::from(retention_days))).date_naive();
    let cutoff_mtime = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 86_400);

    let mut entries = tokio::fs::read_dir(base).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        // Only dated directories belong to the recorder layout.
        let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
            continue;
        };
        let path = entry.path();

        if date < cutoff_date {
            stats.files += count_files(&path).await;
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => stats.dirs += 1,
                Err(e) => log::warn!("[Retention] Could not remove {}: {e}", path.display()),
            }
        } else {
            let scanned = remove_stale_files(&path, cutoff_mtime).await?;
            stats.files += scanned.files;
            stats.dirs += scanned.dirs;
        }
    }
    Ok(stats)
}

/// Deletes files in a dated directory whose mtime predates the cutoff and
/// removes the directory when it ends up empty.
async fn remove_stale_files(dir: &Path, cutoff: SystemTime) -> std::io::Result<CleanStats> {
    let mut stats = CleanStats::default();
    let mut remaining = 0u64;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            remaining += 1;
            continue;
        };
        if !metadata.is_file() {
            remaining += 1;
            continue;
        }
        let stale = metadata.modified().map(|m| m < cutoff).unwrap_or(false);
        if stale && tokio::fs::remove_file(entry.path()).await.is_ok() {
            stats.files += 1;
        } else {
            remaining += 1;
        }
    }

    if remaining == 0 && stats.files > 0 && tokio::fs::remove_dir(dir).await.is_ok() {
        stats.dirs += 1;
    }
    Ok(stats)
}

async fn count_files(dir: &Path) -> u64 {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            count += 1;
        }
    }
    count
}
