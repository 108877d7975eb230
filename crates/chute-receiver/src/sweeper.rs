//! Periodic cleanup sweeper.
//!
//! Evicts expired partial payloads from the chunk store and removes aged
//! completed files from the output directory. Filesystem hiccups are
//! logged and retried on the next pass, never fatal.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chute_core::MetricsWindow;

use crate::store::ChunkStore;

/// Run the sweep loop until cancelled.
pub async fn run_sweeper(
    store: Arc<ChunkStore>,
    files_dir: PathBuf,
    interval: Duration,
    metrics: Arc<Mutex<MetricsWindow>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a sweep never races
    // the very first chunks of a fresh run.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("sweeper cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let store = Arc::clone(&store);
        let files_dir = files_dir.clone();
        let swept = tokio::task::spawn_blocking(move || {
            let expired = store.cleanup_expired(SystemTime::now());
            let aged = sweep_aged_files(&files_dir, store.default_ttl());
            (expired, aged)
        })
        .await;

        match swept {
            Ok((expired, aged)) => {
                if expired > 0 || aged > 0 {
                    info!(expired_payloads = expired, aged_files = aged, "sweep pass");
                }
                let mut window = metrics.lock().expect("metrics lock poisoned");
                window.add("expired_payloads", expired as u64);
                window.add("aged_files", aged as u64);
            }
            Err(e) => warn!(error = %e, "sweep task failed"),
        }
    }
}

/// Remove published files older than `ttl`. In-progress `.part` outputs
/// are left alone. Returns the number of files removed.
pub fn sweep_aged_files(files_dir: &Path, ttl: Duration) -> usize {
    let entries = match std::fs::read_dir(files_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %files_dir.display(), error = %e, "failed to read files directory");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "part") {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat file");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > ttl {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), age_secs = age.as_secs(), "removed aged file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove aged file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aged_files_are_removed_but_part_files_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("done.bin"), b"done").unwrap();
        std::fs::write(dir.path().join("busy.bin.part"), b"busy").unwrap();

        // With a zero TTL everything qualifies as aged immediately.
        std::thread::sleep(Duration::from_millis(20));
        let removed = sweep_aged_files(dir.path(), Duration::ZERO);

        assert_eq!(removed, 1);
        assert!(!dir.path().join("done.bin").exists());
        assert!(dir.path().join("busy.bin.part").exists());
    }

    #[test]
    fn fresh_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.bin"), b"fresh").unwrap();

        let removed = sweep_aged_files(dir.path(), Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.bin").exists());
    }

    #[test]
    fn missing_directory_is_not_fatal() {
        assert_eq!(
            sweep_aged_files(Path::new("/nonexistent/nowhere"), Duration::ZERO),
            0
        );
    }
}
