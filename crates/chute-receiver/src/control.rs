//! Control-plane session handler.
//!
//! Long-lived line protocol over the control system port: one command per
//! line, one response per line. Commands mutate exactly two pieces of
//! shared state, the data-listener count and the retention TTL; invalid
//! input answers `ERR …` and mutates nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use chute_core::protocol::{parse_command, ControlCommand};
use chute_core::MetricsWindow;

use crate::fleet::ListenerFleet;
use crate::store::ChunkStore;

/// Shared state the control plane operates on.
pub struct ControlState {
    pub fleet: Arc<ListenerFleet>,
    pub store: Arc<ChunkStore>,
    pub metrics: Arc<Mutex<MetricsWindow>>,
}

/// Serve one control session until QUIT, EOF or a write failure.
pub async fn handle_control_session(stream: TcpStream, state: Arc<ControlState>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(peer = %peer, "control session opened");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer, error = %e, "control read failed");
                break;
            }
        }

        let (response, quit) = execute(line.trim_end_matches(['\r', '\n']), &state).await;
        if write_half.write_all(response.as_bytes()).await.is_err() {
            break;
        }
        if quit {
            break;
        }
    }
    debug!(peer = %peer, "control session closed");
}

/// Run one command; returns the response line and whether to close.
async fn execute(line: &str, state: &ControlState) -> (String, bool) {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(message) => return (format!("ERR {}\n", message), false),
    };

    match command {
        ControlCommand::ScaleData(n) => match state.fleet.resize(n as usize).await {
            Ok(count) => {
                info!(data_listeners = count, "control: data pool rescaled");
                (format!("OK data listeners={}\n", count), false)
            }
            Err(e) => {
                warn!(requested = n, error = %e, "control: resize failed");
                (format!("ERR {}\n", e), false)
            }
        },
        ControlCommand::SetTtl(secs) => {
            let store = Arc::clone(&state.store);
            let updated = tokio::task::spawn_blocking(move || {
                store.update_ttl(Duration::from_secs(secs));
            })
            .await;
            match updated {
                Ok(()) => {
                    info!(ttl_secs = secs, "control: ttl updated");
                    (format!("OK ttl={}\n", secs), false)
                }
                Err(e) => (format!("ERR {}\n", e), false),
            }
        }
        ControlCommand::Ping => {
            state
                .metrics
                .lock()
                .expect("metrics lock poisoned")
                .force_report(&[("data_listeners", state.fleet.data_count() as u64)]);
            ("PONG\n".to_string(), false)
        }
        ControlCommand::Status => (
            format!(
                "OK listeners={} ttl={}\n",
                state.fleet.data_count(),
                state.store.default_ttl().as_secs()
            ),
            false,
        ),
        ControlCommand::Quit => ("OK\n".to_string(), true),
    }
}
