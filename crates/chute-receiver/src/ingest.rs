//! Data-channel session handler.
//!
//! Reads chunk envelopes off an accepted socket one frame at a time. Each
//! stored chunk is acknowledged with `STORED\n`; a payload completed by the
//! frame is assembled and published before the ack goes out. Malformed or
//! CRC-rejected frames close the session with no response; a clean EOF ends
//! it normally.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use chute_core::constants::STORED_ACK;
use chute_core::protocol::read_envelope;
use chute_core::{Error, MetricsWindow};

use crate::assembler::Assembler;
use crate::store::ChunkStore;

/// Handle one accepted data socket until EOF or the first bad frame.
pub async fn handle_data_session(
    stream: TcpStream,
    store: Arc<ChunkStore>,
    assembler: Arc<Assembler>,
    metrics: Arc<Mutex<MetricsWindow>>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let chunk = match read_envelope(&mut reader).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!(peer = %peer, "data session ended");
                return;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "malformed frame, closing session");
                record(&metrics, &[("rejected", 1)]);
                return;
            }
        };

        let payload_len = chunk.payload.len() as u64;
        let file_id = chunk.file_id.clone();

        let store_for_chunk = Arc::clone(&store);
        let stored = tokio::task::spawn_blocking(move || store_for_chunk.store_chunk(&chunk)).await;

        let completed = match stored {
            Ok(Ok(completed)) => {
                record(&metrics, &[("chunks_stored", 1), ("bytes", payload_len)]);
                completed
            }
            Ok(Err(e)) => {
                match e {
                    Error::Protocol { .. } => {
                        warn!(peer = %peer, file_id = %file_id, error = %e, "chunk rejected")
                    }
                    _ => warn!(peer = %peer, file_id = %file_id, error = %e, "chunk store failed"),
                }
                record(&metrics, &[("rejected", 1)]);
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "store task failed");
                return;
            }
        };

        if let Some(payload) = completed {
            let assembler = Arc::clone(&assembler);
            let store_for_publish = Arc::clone(&store);
            let outcome = tokio::task::spawn_blocking(move || {
                let published = assembler.assemble(&payload)?;
                store_for_publish.mark_published(&payload.file_id);
                Ok::<_, Error>(published)
            })
            .await;

            match outcome {
                Ok(Ok(_path)) => record(&metrics, &[("assembled", 1)]),
                Ok(Err(e)) => {
                    // Patches remain on disk; a re-sent chunk can retry.
                    warn!(file_id = %file_id, error = %e, "assembly failed");
                    record(&metrics, &[("assembly_failures", 1)]);
                }
                Err(e) => warn!(file_id = %file_id, error = %e, "assembly task failed"),
            }
        }

        if write_half.write_all(STORED_ACK).await.is_err() {
            debug!(peer = %peer, "peer went away before ack");
            return;
        }
    }
}

fn record(metrics: &Mutex<MetricsWindow>, counts: &[(&'static str, u64)]) {
    let mut window = metrics.lock().expect("metrics lock poisoned");
    for (name, n) in counts {
        window.add(name, *n);
    }
}
