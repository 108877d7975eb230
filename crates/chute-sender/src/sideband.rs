//! Best-effort sideband client.
//!
//! Emits system-channel records as UDP datagrams to a fixed collector
//! endpoint. Every send failure is logged and ignored; nothing in the data
//! path depends on the sideband being reachable.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chute_core::protocol::SystemRecord;
use chute_core::Result;

/// UDP sideband client for system-channel records.
#[derive(Debug)]
pub struct SidebandClient {
    socket: UdpSocket,
}

impl SidebandClient {
    /// Bind an ephemeral local socket and aim it at the collector.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        Ok(Self { socket })
    }

    async fn send(&self, record: SystemRecord) {
        let tag = record.tag();
        if let Err(e) = self.socket.send(&record.encode()).await {
            warn!(tag, error = %e, "sideband send failed");
        }
    }

    /// Report the current handoff queue depth.
    pub async fn queue_size(&self, queue_size: u32) {
        self.send(SystemRecord::QueueSizeUpdate { queue_size }).await;
    }

    /// Announce a file entering the pipeline.
    pub async fn file_meta(
        &self,
        file_id: u64,
        name: &str,
        original_size: u64,
        total_patches: u32,
        sha256: [u8; 32],
    ) {
        self.send(SystemRecord::FileMeta {
            file_id,
            name: name.to_string(),
            original_size,
            total_patches,
            sha256,
        })
        .await;
    }

    /// Record one chunk of the transfer map.
    pub async fn patch_map(&self, file_id: u64, patch_index: u32) {
        self.send(SystemRecord::FilePatchMap {
            file_id,
            patch_index,
        })
        .await;
    }

    /// Connection status after a successful send.
    pub async fn status(&self, total_connections: u16, active_connections: u16) {
        self.send(SystemRecord::status(total_connections, active_connections))
            .await;
    }

    /// Periodically report a queue depth read from `probe` until cancelled.
    pub async fn run_queue_probe(
        self: Arc<Self>,
        interval: Duration,
        probe: impl Fn() -> u32,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("queue probe cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.queue_size(probe()).await;
                }
            }
        }
    }
}
