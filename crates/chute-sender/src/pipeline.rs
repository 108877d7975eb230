//! File preparation pipeline: hash, compress, chunk, enqueue.
//!
//! Each changed file is read once, streaming the original bytes through a
//! SHA-256 hasher and the zstd encoder at the same time. The compressed
//! stream is then cut into fixed-size chunks which land on the bounded
//! handoff queue for the sender engine.

use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chute_core::checksum::{sha256_hex, StreamingHasher};
use chute_core::compress::StreamingCompressor;
use chute_core::protocol::ChunkEnvelope;
use chute_core::{BoundedQueue, Error, Result};

use crate::scanner::FileDescriptor;
use crate::sideband::SidebandClient;

const READ_BUFFER: usize = 64 * 1024;

/// A file after the hash+compress pass.
#[derive(Debug, Clone)]
pub struct CompressedFile {
    pub descriptor: FileDescriptor,
    /// SHA-256 of the original (uncompressed) content.
    pub sha256: [u8; 32],
    pub sha256_hex: String,
    pub compressed: Bytes,
}

/// Hash and compress one file in a single streaming pass.
///
/// The SHA-256 covers the original bytes; the zstd stream is what travels.
pub fn compress_file(descriptor: &FileDescriptor, level: i32) -> Result<CompressedFile> {
    let mut file = std::fs::File::open(&descriptor.path)?;
    let mut hasher = StreamingHasher::new();
    let mut compressor = StreamingCompressor::new(Vec::new(), level)?;

    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        compressor.write(&buf[..n])?;
    }

    let sha256 = hasher.finish();
    let compressed = compressor.finish()?;
    Ok(CompressedFile {
        descriptor: descriptor.clone(),
        sha256_hex: sha256_hex(&sha256),
        sha256,
        compressed: Bytes::from(compressed),
    })
}

/// One indexed piece of a compressed file, the unit of transport and retry.
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub descriptor: FileDescriptor,
    pub sha256_hex: String,
    /// Transfer identifier derived from the content hash.
    pub file_id: u64,
    pub index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

impl FileChunk {
    /// Transfer identifier as it appears on the data wire.
    pub fn file_id_hex(&self) -> String {
        format!("{:016x}", self.file_id)
    }

    /// Base name the receiver publishes under.
    pub fn original_name(&self) -> String {
        self.descriptor
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_id_hex())
    }

    /// Build the wire envelope for this chunk.
    ///
    /// The TTL is left at zero so the receiver applies its own default.
    pub fn to_envelope(&self) -> ChunkEnvelope {
        ChunkEnvelope {
            file_id: self.file_id_hex(),
            original_name: self.original_name(),
            index: self.index,
            total_chunks: self.total_chunks,
            ttl_seconds: 0,
            payload: self.payload.clone(),
        }
    }
}

/// Derive the transfer id from the content hash.
fn file_id_from_sha(sha256: &[u8; 32]) -> u64 {
    u64::from_le_bytes(sha256[..8].try_into().expect("slice of 8"))
}

/// Deterministic splitter of compressed streams into indexed chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    payload_size: usize,
}

impl Chunker {
    /// Create a chunker; the payload size must be non-zero.
    pub fn new(payload_size: usize) -> Result<Self> {
        if payload_size == 0 {
            return Err(Error::Protocol {
                message: "chunk payload size must be greater than zero".into(),
            });
        }
        Ok(Self { payload_size })
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Slice a compressed file into chunks. Empty compressed data produces
    /// no chunks; there is nothing to transmit.
    pub fn split(&self, file: &CompressedFile) -> Vec<FileChunk> {
        if file.compressed.is_empty() {
            return Vec::new();
        }

        let total = file.compressed.len().div_ceil(self.payload_size);
        let file_id = file_id_from_sha(&file.sha256);
        let mut chunks = Vec::with_capacity(total);
        for index in 0..total {
            let offset = index * self.payload_size;
            let end = (offset + self.payload_size).min(file.compressed.len());
            chunks.push(FileChunk {
                descriptor: file.descriptor.clone(),
                sha256_hex: file.sha256_hex.clone(),
                file_id,
                index: index as u32,
                total_chunks: total as u32,
                payload: file.compressed.slice(offset..end),
            });
        }
        chunks
    }
}

/// Consume descriptors from the scanner, prepare each file and enqueue its
/// chunks. Per-file failures are logged and skipped; the loop ends when the
/// scanner side closes, the queue closes, or on cancellation.
pub async fn run_producer(
    mut rx: mpsc::Receiver<FileDescriptor>,
    queue: Arc<BoundedQueue<FileChunk>>,
    chunker: Chunker,
    compression_level: i32,
    sideband: Arc<SidebandClient>,
    cancel: CancellationToken,
) {
    let mut announced: HashSet<(PathBuf, String)> = HashSet::new();

    loop {
        let descriptor = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(d) => d,
                None => break,
            },
        };

        let level = compression_level;
        let desc = descriptor.clone();
        let compressed =
            match tokio::task::spawn_blocking(move || compress_file(&desc, level)).await {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => {
                    warn!(path = %descriptor.path.display(), error = %e, "skipping file");
                    continue;
                }
                Err(e) => {
                    warn!(path = %descriptor.path.display(), error = %e, "compression task failed");
                    continue;
                }
            };

        let chunks = chunker.split(&compressed);
        if chunks.is_empty() {
            debug!(path = %compressed.descriptor.path.display(), "empty file, nothing to transmit");
            continue;
        }

        let meta_key = (
            compressed.descriptor.path.clone(),
            compressed.sha256_hex.clone(),
        );
        if announced.insert(meta_key) {
            sideband
                .file_meta(
                    chunks[0].file_id,
                    &chunks[0].original_name(),
                    compressed.descriptor.size_bytes,
                    chunks.len() as u32,
                    compressed.sha256,
                )
                .await;
        }

        info!(
            path = %compressed.descriptor.path.display(),
            original_size = compressed.descriptor.size_bytes,
            compressed_size = compressed.compressed.len(),
            chunks = chunks.len(),
            sha256 = %compressed.sha256_hex,
            "file queued"
        );

        for chunk in chunks {
            sideband.patch_map(chunk.file_id, chunk.index).await;
            if !queue.push(chunk).await {
                debug!("handoff queue closed, producer exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use chute_core::compress::decompress_to;

    use super::*;

    fn descriptor_for(path: &std::path::Path) -> FileDescriptor {
        let meta = std::fs::metadata(path).unwrap();
        FileDescriptor {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    #[test]
    fn compress_file_hashes_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        let compressed = compress_file(&descriptor_for(&path), 3).unwrap();
        assert_eq!(
            compressed.sha256_hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let mut out = Vec::new();
        decompress_to(compressed.compressed.as_ref(), &mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn compress_file_missing_path_fails() {
        let descriptor = FileDescriptor {
            path: PathBuf::from("/nonexistent/file.bin"),
            size_bytes: 0,
            mtime: SystemTime::UNIX_EPOCH,
        };
        assert!(compress_file(&descriptor, 3).is_err());
    }

    fn fake_compressed(data: &[u8]) -> CompressedFile {
        let mut sha = [0u8; 32];
        sha[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        CompressedFile {
            descriptor: FileDescriptor {
                path: PathBuf::from("input.bin"),
                size_bytes: data.len() as u64,
                mtime: SystemTime::UNIX_EPOCH,
            },
            sha256: sha,
            sha256_hex: sha256_fake_hex(),
            compressed: Bytes::copy_from_slice(data),
        }
    }

    fn sha256_fake_hex() -> String {
        "0102030405060708".repeat(4)
    }

    #[test]
    fn chunker_rejects_zero_size() {
        assert!(Chunker::new(0).is_err());
    }

    #[test]
    fn chunker_splits_exactly() {
        let chunker = Chunker::new(4).unwrap();
        let file = fake_compressed(b"abcdefgh");
        let chunks = chunker.split(&file);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].payload.as_ref(), b"abcd");
        assert_eq!(chunks[1].payload.as_ref(), b"efgh");
        assert!(chunks.iter().all(|c| c.total_chunks == 2));
    }

    #[test]
    fn chunker_last_chunk_short() {
        let chunker = Chunker::new(1024).unwrap();
        let data: Vec<u8> = (0..3584).map(|i| (i % 256) as u8).collect();
        let chunks = chunker.split(&fake_compressed(&data));

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].payload.len(), 1024);
        assert_eq!(chunks[1].payload.len(), 1024);
        assert_eq!(chunks[2].payload.len(), 1024);
        assert_eq!(chunks[3].payload.len(), 512);
        assert!(chunks.iter().all(|c| c.total_chunks == 4));
    }

    #[test]
    fn chunker_concatenation_restores_stream() {
        let chunker = Chunker::new(7).unwrap();
        let data: Vec<u8> = (0..1000).map(|i| (i * 13 % 256) as u8).collect();
        let chunks = chunker.split(&fake_compressed(&data));

        let mut rebuilt = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index as usize, i);
            rebuilt.extend_from_slice(&chunk.payload);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn chunker_empty_stream_yields_nothing() {
        let chunker = Chunker::new(16).unwrap();
        assert!(chunker.split(&fake_compressed(b"")).is_empty());
    }

    #[test]
    fn file_id_is_sha_prefix() {
        let chunker = Chunker::new(16).unwrap();
        let chunks = chunker.split(&fake_compressed(b"data"));
        assert_eq!(chunks[0].file_id, u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(chunks[0].file_id_hex(), format!("{:016x}", chunks[0].file_id));
    }

    #[test]
    fn envelope_carries_default_ttl() {
        let chunker = Chunker::new(16).unwrap();
        let chunks = chunker.split(&fake_compressed(b"data"));
        let envelope = chunks[0].to_envelope();
        assert_eq!(envelope.ttl_seconds, 0);
        assert_eq!(envelope.original_name, "input.bin");
        assert_eq!(envelope.index, 0);
        assert_eq!(envelope.total_chunks, 1);
    }
}
