//! chute-sender: the producing side of the chute file relay.
//!
//! Watches a directory, compresses and hashes each new or changed file,
//! splits the compressed stream into fixed-size chunks and dispatches them
//! over a pool of parallel TCP connections, with a best-effort sideband
//! for telemetry records.

pub mod cli;
pub mod engine;
pub mod pipeline;
pub mod scanner;
pub mod sideband;

pub use cli::Cli;
pub use engine::{SenderConfig, SenderEngine};
pub use pipeline::{run_producer, Chunker, CompressedFile, FileChunk};
pub use scanner::{FileDescriptor, Scanner};
pub use sideband::SidebandClient;
