//! Directory scanner driving the relay pipeline.
//!
//! Polls the watch directory on an interval, walking into subdirectories,
//! and emits a descriptor for every regular file that is new or whose
//! `(size, mtime)` changed since the last pass. Stat failures are logged
//! and the file skipped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Identity of a file as observed on disk.
///
/// Change detection keys on the full triple: a rewrite that keeps the size
/// but bumps the mtime is a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime: SystemTime,
}

/// Poll-based directory watcher.
#[derive(Debug)]
pub struct Scanner {
    watch_dir: PathBuf,
    interval: Duration,
    seen: HashMap<PathBuf, (u64, SystemTime)>,
}

impl Scanner {
    pub fn new(watch_dir: PathBuf, interval: Duration) -> Self {
        Self {
            watch_dir,
            interval,
            seen: HashMap::new(),
        }
    }

    /// Run the scan loop until cancelled or the consumer goes away.
    pub async fn run(mut self, tx: mpsc::Sender<FileDescriptor>, cancel: CancellationToken) {
        loop {
            for descriptor in self.scan_once().await {
                if tx.send(descriptor).await.is_err() {
                    debug!("descriptor consumer gone, scanner exiting");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("scanner cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One recursive pass over the watch directory; returns changed files
    /// in path order.
    pub async fn scan_once(&mut self) -> Vec<FileDescriptor> {
        let mut changed = Vec::new();
        let mut pending = vec![self.watch_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to read directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "failed to read directory entry");
                        break;
                    }
                };

                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to stat file");
                        continue;
                    }
                };
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !metadata.is_file() {
                    continue;
                }

                let size = metadata.len();
                let mtime = match metadata.modified() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "no modification time");
                        continue;
                    }
                };

                let current = (size, mtime);
                if self.seen.get(&path) == Some(&current) {
                    continue;
                }
                self.seen.insert(path.clone(), current);
                changed.push(FileDescriptor {
                    path,
                    size_bytes: size,
                    mtime,
                });
            }
        }

        changed.sort_by(|a, b| a.path.cmp(&b.path));
        changed
    }
}
