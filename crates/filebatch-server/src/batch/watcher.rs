//! Input directory watcher
//!
//! Polls a directory at a fixed rate and emits one [`FileArrived`] per new regular file.
//! A file that is rewritten (new modification time) is emitted again; deduplication of
//! actual job runs is the coordinator's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::WatchError;
use super::types::FileArrived;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Fixed-rate poller of one directory
#[derive(Debug)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    interval: Duration,
    /// Files already emitted, with the modification time they had at the time
    seen: HashMap<PathBuf, Option<SystemTime>>,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        let dir = dir.into();
        Self {
            dir: std::path::absolute(&dir).unwrap_or(dir),
            interval,
            seen: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the watched directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<(), WatchError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| WatchError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// List the directory once and return the files not emitted before, in name order
    pub async fn poll(&mut self) -> Result<Vec<FileArrived>, WatchError> {
        let list_error = |source| WatchError::List {
            path: self.dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(list_error)?;
        let mut present = HashMap::new();

        while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            // Entries can vanish between listing and stat.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_file() {
                present.insert(entry.path(), metadata.modified().ok());
            }
        }

        let mut arrived: Vec<PathBuf> = present
            .iter()
            .filter(|(path, modified)| self.seen.get(*path) != Some(*modified))
            .map(|(path, _)| path.clone())
            .collect();
        arrived.sort();

        self.seen = present;
        Ok(arrived.into_iter().map(|path| FileArrived { path }).collect())
    }

    /// Poll until `shutdown` fires or the receiving side goes away
    ///
    /// Listing errors are logged and retried on the next tick.
    pub async fn run(
        mut self,
        arrivals: mpsc::Sender<FileArrived>,
        shutdown: CancellationToken,
    ) -> Result<(), WatchError> {
        self.ensure_dir().await?;
        info!(
            dir = %self.dir.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Watching input directory"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let batch = match self.poll().await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Directory poll failed");
                    continue;
                },
            };

            for arrival in batch {
                debug!(file = %arrival.path.display(), "File arrived");
                if arrivals.send(arrival).await.is_err() {
                    info!("Arrival receiver closed, watcher stopping");
                    return Ok(());
                }
            }
        }

        info!("Watcher stopped");
        Ok(())
    }
}
