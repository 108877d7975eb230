//! Streaming decompressing assembler.
//!
//! Concatenates the stored patch files of a complete payload, streams them
//! through the zstd decoder into `<name>.part`, fsyncs, and atomically
//! renames to the final name. Any failure removes the partial output so a
//! consumer never observes a half-written file.

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use chute_core::compress::decompress_to;
use chute_core::{Error, Result};

use crate::store::PayloadRecord;

/// Reassembles complete payloads into published files.
#[derive(Debug)]
pub struct Assembler {
    files_dir: PathBuf,
}

impl Assembler {
    pub fn new(files_dir: &Path) -> Result<Self> {
        fs::create_dir_all(files_dir)?;
        Ok(Self {
            files_dir: files_dir.to_path_buf(),
        })
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Assemble one complete payload and return the published path.
    ///
    /// On any failure the `.part` output is deleted and an error returned;
    /// the stored patches are left alone so a retry remains possible.
    pub fn assemble(&self, record: &PayloadRecord) -> Result<PathBuf> {
        if record.chunk_files.len() != record.total_chunks as usize {
            return Err(Error::Assembly {
                message: format!(
                    "incomplete record for {}: {} of {} chunk paths",
                    record.file_id,
                    record.chunk_files.len(),
                    record.total_chunks
                ),
            });
        }

        let part_path = self.files_dir.join(format!("{}.part", record.original_name));
        let result = self.decompress_into(record, &part_path);
        if let Err(e) = result {
            let _ = fs::remove_file(&part_path);
            return Err(e);
        }

        let final_path = self.files_dir.join(&record.original_name);
        if let Err(e) = fs::rename(&part_path, &final_path) {
            let _ = fs::remove_file(&part_path);
            return Err(Error::Assembly {
                message: format!("rename to {} failed: {}", final_path.display(), e),
            });
        }

        if let Err(e) = fs::remove_dir_all(&record.patches_dir) {
            warn!(
                dir = %record.patches_dir.display(),
                error = %e,
                "failed to remove patches after assembly"
            );
        }

        info!(
            file_id = %record.file_id,
            path = %final_path.display(),
            chunks = record.total_chunks,
            "file published"
        );
        Ok(final_path)
    }

    fn decompress_into(&self, record: &PayloadRecord, part_path: &Path) -> Result<()> {
        // Missing chunk paths surface before any byte is written.
        let mut readers: Vec<BufReader<fs::File>> = Vec::with_capacity(record.chunk_files.len());
        for (index, chunk_path) in record.chunk_files.iter().enumerate() {
            if chunk_path.as_os_str().is_empty() {
                return Err(Error::Assembly {
                    message: format!("missing chunk {} for {}", index, record.file_id),
                });
            }
            let file = fs::File::open(chunk_path).map_err(|e| Error::Assembly {
                message: format!("failed to open chunk {}: {}", chunk_path.display(), e),
            })?;
            readers.push(BufReader::new(file));
        }

        let mut out = fs::File::create(part_path)?;
        let chained: Box<dyn Read> = readers
            .into_iter()
            .fold(Box::new(std::io::empty()) as Box<dyn Read>, |acc, next| {
                Box::new(acc.chain(next))
            });
        // A truncated zstd frame errors out of the copy here.
        decompress_to(chained, &mut out)?;
        out.sync_all()?;
        Ok(())
    }
}
