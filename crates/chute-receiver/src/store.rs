//! Chunk store: CRC-validated persistence with manifest journaling.
//!
//! Every accepted chunk lands as `patches/<file_id>/patch_<index>.bin`,
//! written atomically (temp, fsync, rename). A per-file manifest line in
//! `ids.list` is rewritten the same way on each store. Once the receive
//! set covers every index the caller gets a `PayloadRecord` snapshot to
//! hand to the assembler.
//!
//! One mutex guards the payload map; the small manifest and patch writes
//! happen under it. Callers on the async side go through `spawn_blocking`.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use chute_core::checksum::crc32;
use chute_core::protocol::ChunkData;
use chute_core::{Error, Result};

/// Snapshot handed to the assembler once a payload is complete.
///
/// Every entry of `chunk_files` points at a file whose bytes are exactly
/// the payload of that chunk index.
#[derive(Debug, Clone)]
pub struct PayloadRecord {
    pub file_id: String,
    pub original_name: String,
    pub total_chunks: u32,
    pub patches_dir: PathBuf,
    pub files_dir: PathBuf,
    pub chunk_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadState {
    Partial,
    Complete,
}

impl PayloadState {
    fn as_str(self) -> &'static str {
        match self {
            PayloadState::Partial => "partial",
            PayloadState::Complete => "complete",
        }
    }
}

#[derive(Debug)]
struct PayloadEntry {
    record: PayloadRecord,
    received: BTreeSet<u32>,
    last_update: SystemTime,
    ttl: Duration,
    state: PayloadState,
}

/// The receiver-side chunk store.
#[derive(Debug)]
pub struct ChunkStore {
    patches_dir: PathBuf,
    files_dir: PathBuf,
    default_ttl_secs: Arc<AtomicU64>,
    payloads: Mutex<HashMap<String, PayloadEntry>>,
}

impl ChunkStore {
    /// Create the store under `root`, creating `patches/` and `files/`.
    ///
    /// The TTL cell is shared with the control plane.
    pub fn new(root: &Path, default_ttl_secs: Arc<AtomicU64>) -> Result<Self> {
        let patches_dir = root.join("patches");
        let files_dir = root.join("files");
        fs::create_dir_all(&patches_dir)?;
        fs::create_dir_all(&files_dir)?;
        Ok(Self {
            patches_dir,
            files_dir,
            default_ttl_secs,
            payloads: Mutex::new(HashMap::new()),
        })
    }

    pub fn patches_dir(&self) -> &Path {
        &self.patches_dir
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// The TTL applied to chunks that do not carry their own.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs.load(Ordering::Relaxed))
    }

    /// Validate and persist one chunk.
    ///
    /// Returns `Ok(Some(record))` when this chunk completes the payload,
    /// `Ok(None)` for a partial store, and an error for a CRC mismatch
    /// (no side effect on disk) or a filesystem failure. Re-storing the
    /// same `(file_id, index)` overwrites the same patch path and
    /// re-persists the manifest.
    pub fn store_chunk(&self, chunk: &ChunkData) -> Result<Option<PayloadRecord>> {
        self.verify_crc(chunk)?;
        if chunk.total_chunks == 0 || chunk.index >= chunk.total_chunks {
            return Err(Error::Protocol {
                message: format!(
                    "chunk index {} outside total {} for {}",
                    chunk.index, chunk.total_chunks, chunk.file_id
                ),
            });
        }

        let manifest_dir = self.patches_dir.join(&chunk.file_id);
        fs::create_dir_all(&manifest_dir)?;

        let patch_path = manifest_dir.join(patch_file_name(chunk.index));
        write_atomic(&patch_path, &chunk.payload)?;

        let now = SystemTime::now();
        let default_ttl = self.default_ttl();

        let mut payloads = self.payloads.lock().expect("store lock poisoned");
        let entry = payloads
            .entry(chunk.file_id.clone())
            .or_insert_with(|| PayloadEntry {
                record: PayloadRecord {
                    file_id: chunk.file_id.clone(),
                    original_name: chunk.original_name.clone(),
                    total_chunks: chunk.total_chunks,
                    patches_dir: manifest_dir.clone(),
                    files_dir: self.files_dir.clone(),
                    chunk_files: Vec::new(),
                },
                received: BTreeSet::new(),
                last_update: now,
                ttl: default_ttl,
                state: PayloadState::Partial,
            });

        let was_complete = entry.state == PayloadState::Complete;
        let wanted = entry.record.chunk_files.len().max(chunk.total_chunks as usize);
        entry.record.chunk_files.resize(wanted, PathBuf::new());
        entry.record.chunk_files[chunk.index as usize] = patch_path;
        entry.received.insert(chunk.index);
        entry.last_update = now;
        entry.ttl = if chunk.ttl_seconds > 0 {
            Duration::from_secs(chunk.ttl_seconds)
        } else {
            default_ttl
        };
        entry.state = if entry.received.len() == entry.record.total_chunks as usize {
            PayloadState::Complete
        } else {
            PayloadState::Partial
        };

        let received = entry.received.len();
        let total = entry.record.total_chunks as usize;
        let completeness = if total > 0 {
            received as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        info!(
            file_id = %chunk.file_id,
            index = chunk.index,
            total = entry.record.total_chunks,
            size = chunk.payload.len(),
            completeness = format!("{}/{} ({:.1}%)", received, total, completeness),
            "chunk stored"
        );

        persist_manifest(&entry.record, entry.last_update, entry.ttl, entry.state)?;

        // Emit the record only on the partial-to-complete transition, so
        // one payload triggers at most one assembly per cycle.
        if entry.state == PayloadState::Complete && !was_complete {
            Ok(Some(entry.record.clone()))
        } else {
            Ok(None)
        }
    }

    /// Forget a payload after the assembler has published it.
    pub fn mark_published(&self, file_id: &str) {
        self.payloads
            .lock()
            .expect("store lock poisoned")
            .remove(file_id);
    }

    /// Replace the default TTL and re-persist every manifest with it.
    pub fn update_ttl(&self, new_ttl: Duration) {
        self.default_ttl_secs
            .store(new_ttl.as_secs(), Ordering::Relaxed);
        let mut payloads = self.payloads.lock().expect("store lock poisoned");
        for entry in payloads.values_mut() {
            entry.ttl = new_ttl;
            if let Err(e) = persist_manifest(&entry.record, entry.last_update, entry.ttl, entry.state)
            {
                warn!(file_id = %entry.record.file_id, error = %e, "failed to re-persist manifest");
            }
        }
    }

    /// Drop every payload whose last update is older than its TTL.
    ///
    /// Returns the number of payloads removed.
    pub fn cleanup_expired(&self, now: SystemTime) -> usize {
        let mut payloads = self.payloads.lock().expect("store lock poisoned");
        let mut removed = 0;
        payloads.retain(|file_id, entry| {
            let age = now
                .duration_since(entry.last_update)
                .unwrap_or(Duration::ZERO);
            if age > entry.ttl {
                info!(file_id = %file_id, age_secs = age.as_secs(), "removing expired payload");
                if let Err(e) = fs::remove_dir_all(&entry.record.patches_dir) {
                    warn!(
                        dir = %entry.record.patches_dir.display(),
                        error = %e,
                        "failed to remove expired patches"
                    );
                }
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of payloads currently tracked in memory.
    pub fn pending_payloads(&self) -> usize {
        self.payloads.lock().expect("store lock poisoned").len()
    }

    fn verify_crc(&self, chunk: &ChunkData) -> Result<()> {
        let header_crc = crc32(&chunk.header_bytes);
        if header_crc != chunk.header_crc32 {
            return Err(Error::Protocol {
                message: format!(
                    "header CRC mismatch for {}#{}: expected {} actual {}",
                    chunk.file_id, chunk.index, chunk.header_crc32, header_crc
                ),
            });
        }
        let payload_crc = crc32(&chunk.payload);
        if payload_crc != chunk.payload_crc32 {
            return Err(Error::Protocol {
                message: format!(
                    "payload CRC mismatch for {}#{}: expected {} actual {}",
                    chunk.file_id, chunk.index, chunk.payload_crc32, payload_crc
                ),
            });
        }
        Ok(())
    }
}

fn patch_file_name(index: u32) -> String {
    format!("patch_{}.bin", index)
}

/// Write `data` to `path` via a temp file, fsync and rename.
///
/// The temp file is unlinked if any step fails.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Storage {
            message: format!("atomic write of {} failed: {}", path.display(), e),
        });
    }
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// One CSV line: `file_id,original_name,unix_ts,ttl_seconds,state`.
fn persist_manifest(
    record: &PayloadRecord,
    last_update: SystemTime,
    ttl: Duration,
    state: PayloadState,
) -> Result<()> {
    let ts = last_update
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let line = format!(
        "{},{},{},{},{}\n",
        record.file_id,
        record.original_name,
        ts,
        ttl.as_secs(),
        state.as_str()
    );
    write_atomic(&record.patches_dir.join("ids.list"), line.as_bytes())
}
