//! Sender engine: round-robin dispatch over parallel data connections.
//!
//! One sender-loop task owns the retry queue, the in-flight count, the
//! round-robin cursor and the metrics window. Each connection is owned by
//! its own driver task; the loop hands it jobs over a capacity-1 channel
//! and the driver posts the outcome back, so writes on one connection are
//! naturally serialized and global parallelism never exceeds the number of
//! connections.
//!
//! No failure propagates out of the engine: every chunk either reaches the
//! socket or is dropped, after exhausting its retries, with a log line.

mod connection;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chute_core::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_MAX_SEND_RETRIES,
    DEFAULT_RECONNECT_DELAY, METRICS_INTERVAL,
};
use chute_core::{BoundedQueue, Error, MetricsWindow, Result};

use crate::pipeline::FileChunk;
use crate::sideband::SidebandClient;

use connection::ConnectionDriver;

/// Sender engine configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Number of parallel data connections.
    pub connections: usize,
    /// Host the data connections dial.
    pub host_prefix: String,
    /// Connection `i` dials `base_port + i`.
    pub base_port: u16,
    /// Send attempts per chunk before it is dropped.
    pub max_send_retries: u32,
    pub connect_timeout: Duration,
    pub max_connect_attempts: u32,
    pub reconnect_delay: Duration,
    pub tcp_nodelay: bool,
    pub metrics_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connections: chute_core::constants::DEFAULT_CONNECTIONS,
            host_prefix: "127.0.0.1".to_string(),
            base_port: 4710,
            max_send_retries: DEFAULT_MAX_SEND_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            tcp_nodelay: true,
            metrics_interval: METRICS_INTERVAL,
        }
    }
}

/// A chunk on its way to a connection, with its attempt count.
#[derive(Debug)]
struct SendJob {
    chunk: FileChunk,
    attempt: u32,
}

/// What a connection driver reports back to the sender loop.
#[derive(Debug)]
struct SendOutcome {
    index: usize,
    connected: bool,
    chunk: FileChunk,
    attempt: u32,
    result: Result<usize>,
}

/// The sender engine. `start` launches the worker, `stop` closes the queue
/// and waits for the drain to finish.
pub struct SenderEngine {
    queue: Arc<BoundedQueue<FileChunk>>,
    config: SenderConfig,
    sideband: Arc<SidebandClient>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SenderEngine {
    pub fn new(
        queue: Arc<BoundedQueue<FileChunk>>,
        config: SenderConfig,
        sideband: Arc<SidebandClient>,
    ) -> Result<Self> {
        if config.connections == 0 {
            return Err(Error::Transport {
                message: "at least one connection is required".into(),
            });
        }
        Ok(Self {
            queue,
            config,
            sideband,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    /// Launch the sender worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().expect("engine lock poisoned");
        if worker.is_some() {
            return;
        }
        let queue = Arc::clone(&self.queue);
        let config = self.config.clone();
        let sideband = Arc::clone(&self.sideband);
        let cancel = self.cancel.clone();
        *worker = Some(tokio::spawn(run_loop(queue, config, sideband, cancel)));
    }

    /// Close the queue and wait for the worker to drain.
    ///
    /// Retries still pending are sent (or exhausted) before the worker
    /// exits; in-flight chunks are waited for.
    pub async fn stop(&self) {
        self.queue.close();
        let handle = self.worker.lock().expect("engine lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "sender worker panicked");
            }
        }
    }

    /// Abandon the drain: the worker exits at its next suspension point.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    queue: Arc<BoundedQueue<FileChunk>>,
    config: SenderConfig,
    sideband: Arc<SidebandClient>,
    cancel: CancellationToken,
) {
    let n = config.connections;

    // Outcome capacity n: each driver has at most one job outstanding.
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<SendOutcome>(n);
    let mut drivers: Vec<mpsc::Sender<SendJob>> = Vec::with_capacity(n);
    let mut driver_handles = Vec::with_capacity(n);
    for index in 0..n {
        let (job_tx, job_rx) = mpsc::channel::<SendJob>(1);
        let conn = ConnectionDriver::new(index, &config);
        driver_handles.push(tokio::spawn(run_driver(conn, job_rx, outcome_tx.clone())));
        drivers.push(job_tx);
    }
    drop(outcome_tx);

    let mut retries: VecDeque<SendJob> = VecDeque::new();
    let mut in_flight: usize = 0;
    let mut cursor: usize = 0;
    let mut finishing = false;
    let mut active: HashSet<usize> = HashSet::new();
    let mut metrics = MetricsWindow::with_interval("sender", config.metrics_interval);
    let mut ticker = tokio::time::interval(config.metrics_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if finishing && in_flight == 0 && retries.is_empty() {
            break;
        }

        // Retries take priority over fresh work.
        if in_flight < n {
            if let Some(job) = retries.pop_front() {
                dispatch(&drivers, &mut cursor, &mut in_flight, job).await;
                continue;
            }
        }

        let can_pop = in_flight < n && !finishing;
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(in_flight, pending_retries = retries.len(), "sender loop aborted");
                break;
            }

            Some(outcome) = outcome_rx.recv() => {
                in_flight -= 1;
                if outcome.connected {
                    active.insert(outcome.index);
                } else {
                    active.remove(&outcome.index);
                }
                match outcome.result {
                    Ok(bytes) => {
                        info!(
                            file_id = %outcome.chunk.file_id_hex(),
                            index = outcome.chunk.index,
                            total = outcome.chunk.total_chunks,
                            attempt = outcome.attempt,
                            bytes,
                            connection = outcome.index,
                            "chunk sent"
                        );
                        metrics.add("chunks", 1);
                        metrics.add("bytes", outcome.chunk.payload.len() as u64);
                        metrics.add("retries", u64::from(outcome.attempt - 1));
                        sideband.status(n as u16, active.len() as u16).await;
                    }
                    Err(e) => {
                        if outcome.attempt < config.max_send_retries {
                            debug!(
                                file_id = %outcome.chunk.file_id_hex(),
                                index = outcome.chunk.index,
                                attempt = outcome.attempt,
                                error = %e,
                                "send failed, queued for retry"
                            );
                            retries.push_back(SendJob {
                                chunk: outcome.chunk,
                                attempt: outcome.attempt + 1,
                            });
                        } else {
                            warn!(
                                file_id = %outcome.chunk.file_id_hex(),
                                index = outcome.chunk.index,
                                attempts = outcome.attempt,
                                error = %e,
                                "chunk dropped"
                            );
                            metrics.add("dropped", 1);
                            metrics.add("retries", u64::from(outcome.attempt - 1));
                        }
                    }
                }
                metrics.maybe_report(&[
                    ("queue_size", queue.len() as u64),
                    ("queue_capacity", queue.capacity() as u64),
                ]);
            }

            _ = ticker.tick() => {
                metrics.maybe_report(&[
                    ("queue_size", queue.len() as u64),
                    ("queue_capacity", queue.capacity() as u64),
                ]);
            }

            chunk = queue.pop(), if can_pop => {
                match chunk {
                    Some(chunk) => {
                        dispatch(&drivers, &mut cursor, &mut in_flight, SendJob { chunk, attempt: 1 }).await;
                    }
                    None => {
                        debug!("handoff queue drained, finishing");
                        finishing = true;
                    }
                }
            }
        }
    }

    // Close driver job channels and wait for each driver to wind down.
    drop(drivers);
    while outcome_rx.recv().await.is_some() {
        // Outcomes arriving after abort are dropped on the floor.
    }
    for handle in driver_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "connection driver panicked");
        }
    }

    metrics.force_report(&[
        ("queue_size", queue.len() as u64),
        ("queue_capacity", queue.capacity() as u64),
    ]);
    info!("sender engine stopped");
}

/// Round-robin handoff of one job to a connection driver.
async fn dispatch(
    drivers: &[mpsc::Sender<SendJob>],
    cursor: &mut usize,
    in_flight: &mut usize,
    job: SendJob,
) {
    let index = *cursor % drivers.len();
    *cursor = (*cursor + 1) % drivers.len();
    *in_flight += 1;
    if drivers[index].send(job).await.is_err() {
        // Only possible during teardown.
        *in_flight -= 1;
    }
}

async fn run_driver(
    mut conn: ConnectionDriver,
    mut jobs: mpsc::Receiver<SendJob>,
    outcomes: mpsc::Sender<SendOutcome>,
) {
    while let Some(job) = jobs.recv().await {
        let frame = job.chunk.to_envelope().encode();
        let result = conn.send_frame(&frame).await.map(|_| frame.len());
        let outcome = SendOutcome {
            index: conn.index(),
            connected: conn.is_connected(),
            chunk: job.chunk,
            attempt: job.attempt,
            result,
        };
        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }
    conn.shutdown().await;
}
