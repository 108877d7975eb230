//! chute-receiver: the consuming side of the chute file relay.
//!
//! A fleet of TCP acceptors (four fixed system ports plus an elastic pool
//! of data ports) feeds validated chunks into a CRC-checked store; complete
//! payloads stream through the decompressing assembler into the output
//! directory. A line-oriented control port resizes the data pool and the
//! retention TTL at runtime.

pub mod assembler;
pub mod cli;
pub mod control;
pub mod fleet;
pub mod ingest;
pub mod store;
pub mod sweeper;
pub mod sysports;

pub use assembler::Assembler;
pub use cli::Cli;
pub use control::ControlState;
pub use fleet::{Channel, Dispatcher, ListenerFleet};
pub use store::{ChunkStore, PayloadRecord};
