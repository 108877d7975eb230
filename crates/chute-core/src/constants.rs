//! Protocol and configuration constants for chute.

use std::time::Duration;

// =============================================================================
// Wire Format Constants
// =============================================================================

/// Maximum chunk payload size accepted on a data channel (64 MiB).
pub const MAX_CHUNK_PAYLOAD: usize = 64 * 1024 * 1024;

/// Maximum length of a single envelope header line (file id, name, numbers).
pub const MAX_HEADER_LINE: usize = 1024;

/// Maximum file name length carried in a sideband FileMeta record.
pub const MAX_META_NAME: usize = 4096;

/// Acknowledgement written after a chunk has been persisted.
pub const STORED_ACK: &[u8] = b"STORED\n";

// =============================================================================
// System Channel Ports
// =============================================================================

/// Port offset of the health endpoint from the system base port.
pub const SYS_OFFSET_HEALTH: u16 = 0;

/// Port offset of the telemetry endpoint.
pub const SYS_OFFSET_TELEMETRY: u16 = 1;

/// Port offset of the control endpoint.
pub const SYS_OFFSET_CONTROL: u16 = 2;

/// Port offset of the ack endpoint.
pub const SYS_OFFSET_ACK: u16 = 3;

/// Number of fixed system acceptors.
pub const SYS_PORT_COUNT: u16 = 4;

// =============================================================================
// Timing Constants
// =============================================================================

/// Interval between metrics window flushes.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between cleanup sweeps on the receiver.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Backoff applied after a transient accept error.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Default timeout for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default base delay between reconnect attempts (scaled linearly).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(250);

// =============================================================================
// Default Values
// =============================================================================

/// Default payload size of a single chunk (1 MiB of compressed data).
pub const DEFAULT_CHUNK_PAYLOAD: usize = 1024 * 1024;

/// Default capacity of the producer/sender handoff queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default number of parallel data connections.
pub const DEFAULT_CONNECTIONS: usize = 4;

/// Default number of send attempts before a chunk is dropped.
pub const DEFAULT_MAX_SEND_RETRIES: u32 = 3;

/// Default number of connect attempts per send.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Default directory scan interval in milliseconds.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 500;

/// Default interval between sideband queue-size updates in milliseconds.
pub const DEFAULT_QUEUE_UPDATE_MS: u64 = 1000;

/// Default retention for partial payloads, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
