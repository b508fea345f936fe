//! Config file watcher using notify

use funnel_core::{reload_config, Config, Error, Result, DEFAULT_DEBOUNCE_MS};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;

/// Watches one config file and sends every valid new version as a reload.
///
/// Invalid edits are logged and skipped; the running config stays in effect.
/// Watching stops when this value is dropped.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn spawn(path: &Path, reload: tokio_mpsc::Sender<Config>) -> Result<Self> {
        Self::spawn_with_debounce(path, reload, Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    pub fn spawn_with_debounce(
        path: &Path,
        reload: tokio_mpsc::Sender<Config>,
        debounce: Duration,
    ) -> Result<Self> {
        let path = path.canonicalize()?;
        // Editors often replace the file instead of writing it in place, so
        // watch the directory and filter on the file name
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::config(format!("{} has no parent directory", path.display())))?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Fails only once the worker has stopped
            let _ = tx.send(res);
        })
        .map_err(|e| Error::config(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(format!("Failed to watch {}: {}", dir.display(), e)))?;

        let worker_path = path.clone();
        thread::Builder::new()
            .name("funnel-config-watch".to_string())
            .spawn(move || run(worker_path, rx, reload, Debouncer::new(debounce)))?;

        info!("Watching config file: {}", path.display());
        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Worker loop; ends when the notify watcher (and with it the sender) is dropped
fn run(
    path: PathBuf,
    rx: Receiver<notify::Result<Event>>,
    reload: tokio_mpsc::Sender<Config>,
    mut debouncer: Debouncer,
) {
    loop {
        match rx.recv_timeout(debouncer.threshold()) {
            Ok(Ok(event)) => {
                if is_change(&event.kind) && event.paths.iter().any(|p| p == &path) {
                    debug!("Config event: {:?}", event.kind);
                    debouncer.record(&path);
                }
            }
            Ok(Err(e)) => warn!("Watch error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for changed in debouncer.ready() {
            match reload_config(&changed) {
                Ok(config) => {
                    info!("Config file changed: {}", changed.display());
                    if reload.blocking_send(config).is_err() {
                        debug!("Reload receiver gone, stopping config watcher");
                        return;
                    }
                }
                Err(e) => warn!("Ignoring invalid config {}: {}", changed.display(), e),
            }
        }
    }
    debug!("Config watcher stopped");
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
