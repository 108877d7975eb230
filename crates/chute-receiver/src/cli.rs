//! Receiver CLI implementation.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use chute_core::constants::DEFAULT_TTL_SECS;
use chute_core::LogFormat;

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

/// chute receiver - accepts, stores and reassembles relayed file chunks.
#[derive(Debug, Parser)]
#[command(
    name = "chute-receiver",
    version,
    about = "chute receiver - accepts, stores and reassembles relayed file chunks"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long = "address", default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// First of the four consecutive system ports (health, telemetry,
    /// control, ack)
    #[arg(long = "sys-base", default_value_t = 4700)]
    pub sys_base: u16,

    /// First data ingest port; data listener i binds data-base + i
    #[arg(long = "data-base", default_value_t = 4710)]
    pub data_base: u16,

    /// Initial number of data listeners
    #[arg(short = 'x', long = "x", default_value_t = 4, value_name = "N")]
    pub data_listeners: usize,

    /// Retention for partial payloads, in seconds
    #[arg(long = "ttl", default_value_t = DEFAULT_TTL_SECS, value_name = "SECONDS")]
    pub ttl: u64,

    /// Storage root (patches/ and files/ live underneath)
    #[arg(long = "root", default_value = "./chute-data", value_name = "PATH")]
    pub root: PathBuf,

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
        if self.ttl == 0 {
            return Err("--ttl must be greater than zero".into());
        }
        if self.sys_base.checked_add(3).is_none() {
            return Err("--sys-base leaves no room for the four system ports".into());
        }
        let sys_range = self.sys_base..=self.sys_base + 3;
        if sys_range.contains(&self.data_base) {
            return Err("--data-base overlaps the system port range".into());
        }
        Ok(())
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}
