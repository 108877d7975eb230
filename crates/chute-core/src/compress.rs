//! Compression utilities for the relay pipeline.
//!
//! Uses zstd in streaming mode: the sender compresses whole files into an
//! in-memory stream before chunking, the receiver decompresses the
//! re-concatenated chunk files directly to disk. The only contract between
//! the two sides is `decompress(compress(x)) == x`.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Streaming zstd compressor over an arbitrary writer.
pub struct StreamingCompressor<W: Write> {
    encoder: zstd::Encoder<'static, W>,
}

impl<W: Write> StreamingCompressor<W> {
    /// Create a new streaming compressor at the given level.
    pub fn new(writer: W, level: i32) -> Result<Self> {
        let encoder = zstd::Encoder::new(writer, level).map_err(|e| Error::Compression {
            message: format!("failed to create encoder: {}", e),
        })?;
        Ok(Self { encoder })
    }

    /// Write uncompressed data into the stream.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.encoder.write_all(data).map_err(|e| Error::Compression {
            message: format!("compression write failed: {}", e),
        })
    }

    /// Finish the frame and return the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.encoder.finish().map_err(|e| Error::Compression {
            message: format!("compression finish failed: {}", e),
        })
    }
}

/// Stream a compressed input through the zstd decoder into `output`.
///
/// Returns the number of decompressed bytes written. A truncated frame
/// (the decoder still expecting input at end of stream) is an error.
pub fn decompress_to<R: Read, W: Write>(input: R, output: &mut W) -> Result<u64> {
    let mut decoder = zstd::stream::read::Decoder::new(input).map_err(|e| Error::Compression {
        message: format!("failed to create decoder: {}", e),
    })?;
    std::io::copy(&mut decoder, output).map_err(|e| Error::Compression {
        message: format!("decompression failed: {}", e),
    })
}

/// Compress a buffer in one call. Test and sideband helper.
pub fn compress_all(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut compressor = StreamingCompressor::new(Vec::new(), level)?;
    compressor.write(data)?;
    compressor.finish()
}
