//! Structured logging setup shared by the sender and receiver binaries.
//!
//! Verbosity is a simple repeat count (`-v`, `-vv`, ...) mapped onto a
//! default `EnvFilter`; `RUST_LOG` overrides it entirely. Output goes to
//! stderr or an append-mode file, as text or JSON.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Map a `-v` repeat count to a filter directive level.
fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// The filter applied when `RUST_LOG` is unset: one directive per
/// workspace crate at the requested level.
fn default_filter(verbosity: u8) -> EnvFilter {
    let level = level_for(verbosity);
    EnvFilter::new(format!(
        "chute_core={level},chute_sender={level},chute_receiver={level}",
    ))
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `verbosity` - Verbosity level (0=error, 1=warn, 2=info, 3=debug, 4+=trace)
/// * `log_file` - Optional path to append logs to instead of stderr
/// * `format` - Output format (text or JSON)
///
/// Source locations are included from `-vvv` upward. Fails if a log file
/// cannot be opened or a global subscriber is already installed.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbosity));
    let with_locations = verbosity >= 3;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(with_locations)
        .with_line_number(with_locations);

    let installed = match (format, log_file) {
        (LogFormat::Text, None) => builder.try_init(),
        (LogFormat::Json, None) => builder.json().try_init(),
        (LogFormat::Text, Some(path)) => builder
            .with_ansi(false)
            .with_writer(open_log_file(path)?)
            .try_init(),
        (LogFormat::Json, Some(path)) => builder
            .json()
            .with_writer(open_log_file(path)?)
            .try_init(),
    };

    installed.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Best-effort setup for tests: info-level text on stderr, and repeated
/// calls are harmless.
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}
