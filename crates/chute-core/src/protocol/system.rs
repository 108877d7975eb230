//! Sideband system-channel records.
//!
//! The sender emits small best-effort telemetry records alongside the data
//! channels: queue depth, per-file metadata, the chunk map, and a status
//! record after each successful send. One record per datagram, all integers
//! little-endian, led by a `u16` type tag.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::MAX_META_NAME;
use crate::error::{Error, Result};

const TAG_QUEUE_SIZE_UPDATE: u16 = 1;
const TAG_FILE_META: u16 = 2;
const TAG_FILE_PATCH_MAP: u16 = 3;
const TAG_CONTROL: u16 = 4;

/// Status command byte carried in `Control` records.
pub const CONTROL_STATUS: u8 = b'S';

/// One sideband record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemRecord {
    /// Current depth of the sender's handoff queue.
    QueueSizeUpdate { queue_size: u32 },
    /// Metadata for a file entering the pipeline, sent once per
    /// `(path, sha256)` pair.
    FileMeta {
        file_id: u64,
        name: String,
        original_size: u64,
        total_patches: u32,
        sha256: [u8; 32],
    },
    /// One entry of the chunk map, sent as each chunk is enqueued.
    FilePatchMap { file_id: u64, patch_index: u32 },
    /// Control/status byte plus a 32-bit value.
    Control { command: u8, value: u32 },
}

impl SystemRecord {
    /// Status record after a successful send: connection counts packed into
    /// the value, total in the high half, active in the low half.
    pub fn status(total_connections: u16, active_connections: u16) -> Self {
        SystemRecord::Control {
            command: CONTROL_STATUS,
            value: (u32::from(total_connections) << 16) | u32::from(active_connections),
        }
    }

    /// The type tag of this record.
    pub fn tag(&self) -> u16 {
        match self {
            SystemRecord::QueueSizeUpdate { .. } => TAG_QUEUE_SIZE_UPDATE,
            SystemRecord::FileMeta { .. } => TAG_FILE_META,
            SystemRecord::FilePatchMap { .. } => TAG_FILE_PATCH_MAP,
            SystemRecord::Control { .. } => TAG_CONTROL,
        }
    }

    /// Encode to the wire layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16_le(self.tag());
        match self {
            SystemRecord::QueueSizeUpdate { queue_size } => {
                buf.put_u32_le(*queue_size);
            }
            SystemRecord::FileMeta {
                file_id,
                name,
                original_size,
                total_patches,
                sha256,
            } => {
                buf.put_u64_le(*file_id);
                buf.put_u32_le(name.len() as u32);
                buf.put_slice(name.as_bytes());
                buf.put_u64_le(*original_size);
                buf.put_u32_le(*total_patches);
                buf.put_slice(sha256);
            }
            SystemRecord::FilePatchMap {
                file_id,
                patch_index,
            } => {
                buf.put_u64_le(*file_id);
                buf.put_u32_le(*patch_index);
            }
            SystemRecord::Control { command, value } => {
                buf.put_u8(*command);
                buf.put_u32_le(*value);
            }
        }
        buf.freeze()
    }

    /// Decode one record from a datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let tag = take_u16(&mut buf)?;
        match tag {
            TAG_QUEUE_SIZE_UPDATE => Ok(SystemRecord::QueueSizeUpdate {
                queue_size: take_u32(&mut buf)?,
            }),
            TAG_FILE_META => {
                let file_id = take_u64(&mut buf)?;
                let name_len = take_u32(&mut buf)? as usize;
                if name_len > MAX_META_NAME {
                    return Err(Error::Protocol {
                        message: format!("file name length {} too large", name_len),
                    });
                }
                if buf.remaining() < name_len {
                    return Err(short_record());
                }
                let name = String::from_utf8(buf[..name_len].to_vec()).map_err(|_| {
                    Error::Protocol {
                        message: "file name is not valid UTF-8".into(),
                    }
                })?;
                buf.advance(name_len);
                let original_size = take_u64(&mut buf)?;
                let total_patches = take_u32(&mut buf)?;
                if buf.remaining() < 32 {
                    return Err(short_record());
                }
                let mut sha256 = [0u8; 32];
                sha256.copy_from_slice(&buf[..32]);
                Ok(SystemRecord::FileMeta {
                    file_id,
                    name,
                    original_size,
                    total_patches,
                    sha256,
                })
            }
            TAG_FILE_PATCH_MAP => Ok(SystemRecord::FilePatchMap {
                file_id: take_u64(&mut buf)?,
                patch_index: take_u32(&mut buf)?,
            }),
            TAG_CONTROL => {
                if buf.remaining() < 1 {
                    return Err(short_record());
                }
                let command = buf.get_u8();
                Ok(SystemRecord::Control {
                    command,
                    value: take_u32(&mut buf)?,
                })
            }
            other => Err(Error::Protocol {
                message: format!("unknown system record tag {}", other),
            }),
        }
    }
}

fn short_record() -> Error {
    Error::Protocol {
        message: "system record too short".into(),
    }
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(short_record());
    }
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(short_record());
    }
    Ok(buf.get_u32_le())
}

fn take_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(short_record());
    }
    Ok(buf.get_u64_le())
}
