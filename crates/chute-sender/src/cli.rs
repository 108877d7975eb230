//! Sender CLI implementation.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use chute_core::constants::{
    DEFAULT_CHUNK_PAYLOAD, DEFAULT_COMPRESSION_LEVEL, DEFAULT_CONNECTIONS,
    DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_MAX_SEND_RETRIES, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_QUEUE_UPDATE_MS, DEFAULT_SCAN_INTERVAL_MS, MAX_CHUNK_PAYLOAD, METRICS_INTERVAL,
};
use chute_core::LogFormat;

use crate::engine::SenderConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// chute sender - watches a directory and relays files as compressed chunks.
#[derive(Debug, Parser)]
#[command(
    name = "chute-sender",
    version,
    about = "chute sender - watches a directory and relays files as compressed chunks"
)]
pub struct Cli {
    /// Directory to watch for new or changed files
    #[arg(long = "watch-dir", value_name = "PATH")]
    pub watch_dir: PathBuf,

    /// Directory poll interval in milliseconds
    #[arg(long = "scan-interval-ms", default_value_t = DEFAULT_SCAN_INTERVAL_MS)]
    pub scan_interval_ms: u64,

    /// Capacity of the producer/sender handoff queue
    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Payload size of a single chunk, in bytes of compressed data
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_PAYLOAD)]
    pub chunk_size: usize,

    /// zstd compression level
    #[arg(long = "compression-level", default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    pub compression_level: i32,

    /// Number of parallel data connections
    #[arg(long = "connections", default_value_t = DEFAULT_CONNECTIONS)]
    pub connections: usize,

    /// Host the data connections dial
    #[arg(long = "host-prefix", default_value = "127.0.0.1", value_name = "NAME")]
    pub host_prefix: String,

    /// First data port; connection i dials base-port + i
    #[arg(long = "base-port", default_value_t = 4710)]
    pub base_port: u16,

    /// Send attempts per chunk before it is dropped
    #[arg(long = "max-send-retries", default_value_t = DEFAULT_MAX_SEND_RETRIES)]
    pub max_send_retries: u32,

    /// Timeout for a single connect attempt, in milliseconds
    #[arg(long = "connect-timeout-ms", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Connect attempts per send before giving up
    #[arg(long = "max-connect-attempts", default_value_t = DEFAULT_MAX_CONNECT_ATTEMPTS)]
    pub max_connect_attempts: u32,

    /// Base delay between connect attempts (scaled linearly), in milliseconds
    #[arg(long = "connect-retry-delay-ms", default_value_t = 250)]
    pub connect_retry_delay_ms: u64,

    /// Sideband collector host
    #[arg(long = "control-host", default_value = "127.0.0.1", value_name = "HOST")]
    pub control_host: String,

    /// Sideband collector port
    #[arg(long = "control-port", default_value_t = 4700)]
    pub control_port: u16,

    /// Interval between sideband queue-size updates, in milliseconds
    #[arg(long = "queue-update-ms", default_value_t = DEFAULT_QUEUE_UPDATE_MS)]
    pub queue_update_ms: u64,

    /// Disable TCP_NODELAY on data connections
    #[arg(long = "no-tcp-no-delay")]
    pub no_tcp_no_delay: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Validate flag combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("--queue-capacity must be greater than zero".into());
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_PAYLOAD {
            return Err(format!(
                "--chunk-size must be between 1 and {}",
                MAX_CHUNK_PAYLOAD
            ));
        }
        if self.connections == 0 {
            return Err("--connections must be greater than zero".into());
        }
        if self.max_send_retries == 0 {
            return Err("--max-send-retries must be greater than zero".into());
        }
        if self.max_connect_attempts == 0 {
            return Err("--max-connect-attempts must be greater than zero".into());
        }
        if u16::try_from(self.connections - 1)
            .ok()
            .and_then(|span| self.base_port.checked_add(span))
            .is_none()
        {
            return Err("--base-port leaves no room for all connections".into());
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn queue_update_interval(&self) -> Duration {
        Duration::from_millis(self.queue_update_ms)
    }

    /// Assemble the engine configuration.
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            connections: self.connections,
            host_prefix: self.host_prefix.clone(),
            base_port: self.base_port,
            max_send_retries: self.max_send_retries,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_connect_attempts: self.max_connect_attempts,
            reconnect_delay: Duration::from_millis(self.connect_retry_delay_ms),
            tcp_nodelay: !self.no_tcp_no_delay,
            metrics_interval: METRICS_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["chute-sender", "--watch-dir", "/tmp/watch"]
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_are_valid() {
        let cli = Cli::parse_from(base_args());
        assert!(cli.validate().is_ok());
        assert_eq!(cli.chunk_size, DEFAULT_CHUNK_PAYLOAD);
        assert_eq!(cli.connections, DEFAULT_CONNECTIONS);
        assert!(!cli.no_tcp_no_delay);

        let config = cli.sender_config();
        assert!(config.tcp_nodelay);
        assert_eq!(config.base_port, 4710);
    }

    #[test]
    fn watch_dir_is_required() {
        assert!(Cli::try_parse_from(["chute-sender"]).is_err());
    }

    #[test]
    fn flags_parse() {
        let mut args = base_args();
        args.extend([
            "--chunk-size",
            "1024",
            "--connections",
            "8",
            "--base-port",
            "6000",
            "--max-send-retries",
            "5",
            "--no-tcp-no-delay",
        ]);
        let cli = Cli::parse_from(args);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.chunk_size, 1024);

        let config = cli.sender_config();
        assert_eq!(config.connections, 8);
        assert_eq!(config.base_port, 6000);
        assert_eq!(config.max_send_retries, 5);
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn zero_values_rejected() {
        for (flag, value) in [
            ("--queue-capacity", "0"),
            ("--chunk-size", "0"),
            ("--connections", "0"),
            ("--max-send-retries", "0"),
            ("--max-connect-attempts", "0"),
        ] {
            let mut args = base_args();
            args.extend([flag, value]);
            let cli = Cli::parse_from(args);
            assert!(cli.validate().is_err(), "{} 0 was accepted", flag);
        }
    }

    #[test]
    fn base_port_overflow_rejected() {
        let mut args = base_args();
        args.extend(["--base-port", "65535", "--connections", "2"]);
        let cli = Cli::parse_from(args);
        assert!(cli.validate().is_err());
    }
}
