//! Typed registry of sink supervisors.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::ConfigStore;
use crate::error::{AircastError, AircastResult};
use crate::sink::{SinkHooks, SinkKind, SinkStatus, SinkSupervisor};

/// Thread-safe registry keyed by sink ID, one per sink flavor.
///
/// The registry lock (DashMap shards) is held only during registry
/// mutations; supervisors synchronize their own state, and the fan-out
/// writes through a snapshot of the map so supervisors never lock each
/// other.
pub struct SinkManager {
    kind: SinkKind,
    config: Arc<ConfigStore>,
    sinks: DashMap<String, Arc<SinkSupervisor>>,
}

impl SinkManager {
    #[must_use]
    pub fn new(kind: SinkKind, config: Arc<ConfigStore>) -> Self {
        Self {
            kind,
            config,
            sinks: DashMap::new(),
        }
    }

    /// Creates and starts a supervisor for `id`, or returns without
    /// disturbing an already-running one. A stopped or given-up supervisor
    /// is replaced by a fresh one, which resets its retry budget.
    pub async fn start(&self, id: &str, hooks: SinkHooks) -> AircastResult<()> {
        if let Some(existing) = self.sinks.get(id).map(|entry| Arc::clone(entry.value())) {
            if existing.is_running() {
                return Ok(());
            }
            let _ = existing.stop().await;
            self.sinks.remove(id);
        }

        let supervisor = Arc::new(SinkSupervisor::new(id.to_string(), self.kind, hooks));
        supervisor.start().await?;
        self.sinks.insert(id.to_string(), supervisor);
        Ok(())
    }

    /// Stops and removes one sink. Stopping an unknown ID is a no-op.
    pub async fn stop(&self, id: &str) -> AircastResult<()> {
        match self.sinks.remove(id) {
            Some((_, supervisor)) => supervisor.stop().await,
            None => Ok(()),
        }
    }

    /// Stops every supervisor and clears the registry. Individual failures
    /// are aggregated; shutdown never aborts early.
    pub async fn stop_all(&self) -> AircastResult<()> {
        let sinks: Vec<Arc<SinkSupervisor>> = self
            .sinks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.sinks.clear();

        let results = futures::future::join_all(sinks.iter().map(|s| s.stop())).await;
        let errors: Vec<String> = results
            .into_iter()
            .filter_map(Result::err)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AircastError::Shutdown(errors))
        }
    }

    /// Fans one PCM block out to every sink, in registry snapshot order.
    /// Blocks for non-running sinks are dropped by the sinks themselves; a
    /// write failure is already recorded by the sink, so the fan-out just
    /// moves on to the next one.
    pub async fn write_all(&self, block: &[u8]) {
        let sinks: Vec<Arc<SinkSupervisor>> = self
            .sinks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for sink in sinks {
            let _ = sink.write(block).await;
        }
    }

    /// Status of every registered sink. `max_retries` is looked up from the
    /// live configuration so edits show without a restart.
    #[must_use]
    pub fn statuses(&self) -> HashMap<String, SinkStatus> {
        self.sinks
            .iter()
            .map(|entry| {
                let mut status = entry.value().status();
                if let Some(cfg) = self.config.get_sink(entry.key()) {
                    status.max_retries = cfg.effective_max_retries();
                    status.given_up = status.retry_count > status.max_retries;
                }
                (entry.key().clone(), status)
            })
            .collect()
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OutputConfig, SinkConfig};

    fn store_with_output(id: &str) -> Arc<ConfigStore> {
        let store = ConfigStore::new(Config::default());
        store
            .add_output(OutputConfig {
                id: id.into(),
                name: "test".into(),
                host: "127.0.0.1".into(),
                port: 9000,
                stream_id: String::new(),
                passphrase: String::new(),
                codec: "mp3".into(),
                max_retries: 2,
                enabled: true,
                created_at: 1,
            })
            .unwrap();
        store
    }

    fn hooks(store: &Arc<ConfigStore>, ffmpeg_path: &str) -> SinkHooks {
        let config = Arc::clone(store);
        SinkHooks {
            fetch_config: Arc::new(move |id| config.get_output(id).map(SinkConfig::Output)),
            encoder_running: Arc::new(|| true),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    #[cfg(unix)]
    fn consume_stdin_script(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("encoder.sh");
        std::fs::write(&path, "#!/bin/sh\nexec cat > /dev/null\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn stopping_unknown_sink_is_a_no_op() {
        let store = ConfigStore::new(Config::default());
        let manager = SinkManager::new(SinkKind::Output, store);
        assert!(manager.stop("missing").await.is_ok());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn failed_start_leaves_no_entry() {
        let store = store_with_output("out-1");
        let manager = SinkManager::new(SinkKind::Output, Arc::clone(&store));
        let result = manager
            .start("out-1", hooks(&store, "/nonexistent/encoder"))
            .await;
        assert!(result.is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn write_all_with_no_sinks_is_a_no_op() {
        let store = ConfigStore::new(Config::default());
        let manager = SinkManager::new(SinkKind::Output, store);
        manager.write_all(&[0u8; 128]).await;
        assert!(manager.statuses().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lifecycle_create_or_return_and_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = consume_stdin_script(dir.path());
        let store = store_with_output("out-1");
        let manager = SinkManager::new(SinkKind::Output, Arc::clone(&store));

        manager.start("out-1", hooks(&store, &encoder)).await.unwrap();
        assert_eq!(manager.len(), 1);
        let statuses = manager.statuses();
        assert!(statuses["out-1"].running);
        assert_eq!(statuses["out-1"].max_retries, 2);

        // Starting again leaves the running supervisor alone.
        manager.start("out-1", hooks(&store, &encoder)).await.unwrap();
        assert_eq!(manager.len(), 1);

        manager.write_all(&[0u8; 1024]).await;

        manager.stop_all().await.unwrap();
        assert!(manager.is_empty());
        assert!(manager.statuses().is_empty());
        // After stop_all, write_all is a no-op.
        manager.write_all(&[0u8; 1024]).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_edits_show_in_statuses_without_restart() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = consume_stdin_script(dir.path());
        let store = store_with_output("out-1");
        let manager = SinkManager::new(SinkKind::Output, Arc::clone(&store));
        manager.start("out-1", hooks(&store, &encoder)).await.unwrap();

        let mut edited = store.get_output("out-1").unwrap();
        edited.max_retries = 7;
        store.update_output(edited).unwrap();

        assert_eq!(manager.statuses()["out-1"].max_retries, 7);
        manager.stop_all().await.unwrap();
    }
}
