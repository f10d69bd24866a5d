//! Configuration file watcher for hot reload.
//!
//! Every modify/create event on the file re-runs the full load (parse, env
//! overrides, validation). Only configurations that pass are forwarded; a
//! broken edit is logged and the running configuration stays in place.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    reload(&path, &tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and forward it if valid. Returns whether an update was sent.
fn reload(path: &Path, tx: &mpsc::UnboundedSender<GuardConfig>) -> bool {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = ?path, "Config file changed, reloading");
            tx.send(config).is_ok()
        }
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Config reload rejected, keeping current configuration");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("campus-guard-watch-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_invalid_edit_is_not_forwarded() {
        let path = temp_config("[timeouts]\nrequest_secs = 0\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(!reload(&path, &tx));
        assert!(rx.try_recv().is_err());

        fs::write(&path, "[timeouts]\nrequest_secs = 12\n").unwrap();
        assert!(reload(&path, &tx));
        assert_eq!(rx.try_recv().unwrap().timeouts.request_secs, 12);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_file_change_delivers_update() {
        let path = temp_config("[rate_limit]\nsweep_interval_secs = 60\n");
        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _handle = watcher.run().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, "[rate_limit]\nsweep_interval_secs = 42\n").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(config) = updates.recv().await {
                if config.rate_limit.sweep_interval_secs == 42 {
                    return config;
                }
            }
            panic!("watcher channel closed");
        })
        .await
        .expect("no config update within 10s");
        assert_eq!(received.rate_limit.sweep_interval_secs, 42);

        fs::remove_file(&path).unwrap();
    }
}
