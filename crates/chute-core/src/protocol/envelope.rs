//! Chunk envelope wire format for data channels.
//!
//! Each chunk travels as one contiguous frame: a line-delimited text header
//! followed by the raw payload bytes.
//!
//! ```text
//! <file_id>\n
//! <original_name>\n
//! <index>\n
//! <total_chunks>\n
//! <ttl_seconds>\n
//! <payload_size>\n
//! <header_crc32>\n
//! <payload_crc32>\n
//! <payload bytes…>        // exactly payload_size bytes
//! ```
//!
//! Integers are decimal ASCII. The header CRC covers the first six lines
//! including each terminating newline. The receiver answers `STORED\n`
//! after persisting a chunk and closes with no response on malformed input.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::checksum::crc32;
use crate::constants::{MAX_CHUNK_PAYLOAD, MAX_HEADER_LINE};
use crate::error::{Error, Result};

/// A chunk ready for transmission, sender side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEnvelope {
    /// Identifier the sender assigned to this file transfer.
    pub file_id: String,
    /// Base name the receiver will publish the assembled file under.
    pub original_name: String,
    /// Zero-based chunk index.
    pub index: u32,
    /// Total chunks of the transfer.
    pub total_chunks: u32,
    /// Retention hint in seconds; zero lets the receiver use its default.
    pub ttl_seconds: u64,
    /// Compressed payload slice.
    pub payload: Bytes,
}

impl ChunkEnvelope {
    /// The six header lines covered by the header CRC.
    fn header_lines(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            self.file_id,
            self.original_name,
            self.index,
            self.total_chunks,
            self.ttl_seconds,
            self.payload.len()
        )
    }

    /// Encode the full frame, computing both CRCs.
    pub fn encode(&self) -> Bytes {
        let header = self.header_lines();
        let header_crc = crc32(header.as_bytes());
        let payload_crc = crc32(&self.payload);

        let tail = format!("{}\n{}\n", header_crc, payload_crc);
        let mut buf = BytesMut::with_capacity(header.len() + tail.len() + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(tail.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// A chunk as parsed on the receiver, CRC fields still unverified.
#[derive(Debug, Clone)]
pub struct ChunkData {
    pub file_id: String,
    pub original_name: String,
    pub index: u32,
    pub total_chunks: u32,
    pub ttl_seconds: u64,
    /// Raw header bytes exactly as received, for CRC verification.
    pub header_bytes: Vec<u8>,
    pub payload: Vec<u8>,
    pub header_crc32: u32,
    pub payload_crc32: u32,
}

fn protocol_err(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

/// Reject identifiers that could escape the storage root.
fn validate_path_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(protocol_err(format!("{} is empty", field)));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(protocol_err(format!("{} is not a plain name: {:?}", field, value)));
    }
    Ok(())
}

/// Read one header line (including its newline) with a length bound.
async fn read_header_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let n = reader
        .take(MAX_HEADER_LINE as u64 + 1)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(protocol_err("header line unterminated or too long"));
    }
    Ok(Some(line))
}

fn parse_field<T: std::str::FromStr>(line: &str, field: &str) -> Result<T> {
    line.trim_end_matches('\n')
        .parse()
        .map_err(|_| protocol_err(format!("invalid {}: {:?}", field, line.trim_end())))
}

/// Read one chunk envelope from a data channel.
///
/// Returns `Ok(None)` on clean end of stream before the first header byte.
/// Anything malformed (unterminated lines, non-numeric fields, an index
/// outside the chunk count, an oversized payload) is a protocol error;
/// the caller closes the session without a response.
pub async fn read_envelope<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<ChunkData>> {
    let first = match read_header_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    let mut header_lines = Vec::with_capacity(6);
    header_lines.push(first);
    for _ in 1..6 {
        match read_header_line(reader).await? {
            Some(line) => header_lines.push(line),
            None => return Err(protocol_err("truncated envelope header")),
        }
    }

    let file_id: String = header_lines[0].trim_end_matches('\n').to_string();
    let original_name: String = header_lines[1].trim_end_matches('\n').to_string();
    let index: u32 = parse_field(&header_lines[2], "chunk index")?;
    let total_chunks: u32 = parse_field(&header_lines[3], "total chunks")?;
    let ttl_seconds: u64 = parse_field(&header_lines[4], "ttl")?;
    let payload_size: usize = parse_field(&header_lines[5], "payload size")?;

    validate_path_component("file id", &file_id)?;
    validate_path_component("original name", &original_name)?;
    if total_chunks == 0 {
        return Err(protocol_err("total chunks is zero"));
    }
    if index >= total_chunks {
        return Err(protocol_err(format!(
            "chunk index {} outside total {}",
            index, total_chunks
        )));
    }
    if payload_size > MAX_CHUNK_PAYLOAD {
        return Err(protocol_err(format!(
            "payload size {} exceeds maximum {}",
            payload_size, MAX_CHUNK_PAYLOAD
        )));
    }

    let header_crc32: u32 = match read_header_line(reader).await? {
        Some(line) => parse_field(&line, "header crc")?,
        None => return Err(protocol_err("missing header crc")),
    };
    let payload_crc32: u32 = match read_header_line(reader).await? {
        Some(line) => parse_field(&line, "payload crc")?,
        None => return Err(protocol_err("missing payload crc")),
    };

    let mut payload = vec![0u8; payload_size];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            protocol_err("truncated payload")
        } else {
            Error::Io(e)
        }
    })?;

    let header_bytes = header_lines.concat().into_bytes();

    Ok(Some(ChunkData {
        file_id,
        original_name,
        index,
        total_chunks,
        ttl_seconds,
        header_bytes,
        payload,
        header_crc32,
        payload_crc32,
    }))
}

impl ChunkData {
    /// Verify both CRCs against the received bytes.
    pub fn crc_ok(&self) -> bool {
        crc32(&self.header_bytes) == self.header_crc32 && crc32(&self.payload) == self.payload_crc32
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    fn envelope(index: u32, total: u32, payload: &[u8]) -> ChunkEnvelope {
        ChunkEnvelope {
            file_id: "a1b2c3d4e5f60718".into(),
            original_name: "report.bin".into(),
            index,
            total_chunks: total,
            ttl_seconds: 120,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    async fn parse(bytes: &[u8]) -> Result<Option<ChunkData>> {
        let mut reader = tokio::io::BufReader::new(Cursor::new(bytes.to_vec()));
        read_envelope(&mut reader).await
    }

    #[tokio::test]
    async fn encode_parse_roundtrip() {
        let env = envelope(2, 5, b"payload bytes here");
        let frame = env.encode();

        let chunk = parse(&frame).await.unwrap().unwrap();
        assert_eq!(chunk.file_id, env.file_id);
        assert_eq!(chunk.original_name, env.original_name);
        assert_eq!(chunk.index, 2);
        assert_eq!(chunk.total_chunks, 5);
        assert_eq!(chunk.ttl_seconds, 120);
        assert_eq!(chunk.payload, env.payload.as_ref());
        assert!(chunk.crc_ok());
    }

    #[tokio::test]
    async fn empty_stream_yields_none() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_frames_back_to_back() {
        let mut bytes = envelope(0, 2, b"first").encode().to_vec();
        bytes.extend_from_slice(&envelope(1, 2, b"second").encode());

        let mut reader = tokio::io::BufReader::new(Cursor::new(bytes));
        let first = read_envelope(&mut reader).await.unwrap().unwrap();
        let second = read_envelope(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
        assert!(read_envelope(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_header_is_error() {
        let frame = envelope(0, 1, b"x").encode();
        assert!(parse(&frame[..10]).await.is_err());
    }

    #[tokio::test]
    async fn truncated_payload_is_error() {
        let frame = envelope(0, 1, b"a longer payload").encode();
        assert!(parse(&frame[..frame.len() - 4]).await.is_err());
    }

    #[tokio::test]
    async fn non_numeric_index_is_error() {
        let bytes = b"id\nname\nnot-a-number\n3\n0\n1\n0\n0\nX";
        assert!(parse(bytes).await.is_err());
    }

    #[tokio::test]
    async fn index_outside_total_is_error() {
        let env = envelope(3, 3, b"x");
        assert!(parse(&env.encode()).await.is_err());
    }

    #[tokio::test]
    async fn zero_total_is_error() {
        let bytes = b"id\nname\n0\n0\n0\n1\n0\n0\nX";
        assert!(parse(bytes).await.is_err());
    }

    #[tokio::test]
    async fn path_traversal_names_rejected() {
        for bad in ["../escape", "a/b", "..", "."] {
            let mut env = envelope(0, 1, b"x");
            env.original_name = bad.into();
            assert!(parse(&env.encode()).await.is_err(), "accepted {:?}", bad);
        }
    }

    #[tokio::test]
    async fn tampered_payload_fails_crc() {
        let frame = envelope(0, 1, b"pristine payload").encode();
        let mut bytes = frame.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let chunk = parse(&bytes).await.unwrap().unwrap();
        assert!(!chunk.crc_ok());
    }

    #[tokio::test]
    async fn header_crc_covers_first_six_lines() {
        let env = envelope(1, 4, b"p");
        let frame = env.encode();
        let chunk = parse(&frame).await.unwrap().unwrap();

        let expected = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            env.file_id, env.original_name, env.index, env.total_chunks, env.ttl_seconds, 1
        );
        assert_eq!(chunk.header_bytes, expected.as_bytes());
        assert_eq!(chunk.header_crc32, crc32(expected.as_bytes()));
    }

    proptest! {
        #[test]
        fn roundtrip_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
            index in 0u32..16,
            extra in 1u32..16,
            ttl in 0u64..100_000,
        ) {
            let env = ChunkEnvelope {
                file_id: "deadbeef00112233".into(),
                original_name: "data.bin".into(),
                index,
                total_chunks: index + extra,
                ttl_seconds: ttl,
                payload: Bytes::from(payload.clone()),
            };
            let frame = env.encode();

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let chunk = rt.block_on(async {
                let mut reader = tokio::io::BufReader::new(Cursor::new(frame.to_vec()));
                read_envelope(&mut reader).await
            }).unwrap().unwrap();

            prop_assert!(chunk.crc_ok());
            prop_assert_eq!(chunk.payload, payload);
            prop_assert_eq!(chunk.index, index);
            prop_assert_eq!(chunk.ttl_seconds, ttl);
        }
    }
}
