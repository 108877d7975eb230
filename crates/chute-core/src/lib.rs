//! chute-core: shared library for the chute file-relay pipeline.
//!
//! This crate provides:
//! - The chunk envelope wire format and its codec
//! - Sideband system-channel records
//! - Control-plane command parsing
//! - The bounded handoff queue between producer and sender
//! - Streaming hashing, CRC-32 and zstd compression helpers
//! - Rolling metrics windows
//! - Logging setup

pub mod checksum;
pub mod compress;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod queue;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
pub use metrics::MetricsWindow;
pub use queue::BoundedQueue;
