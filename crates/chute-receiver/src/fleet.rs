//! Listener fleet: fixed system acceptors plus an elastic data pool.
//!
//! Four system channels live on consecutive ports above the system base;
//! data acceptors occupy `data_base + i` for the first `N` indices, where
//! `N` is resizable at runtime. Each acceptor runs its own accept loop and
//! hands accepted sockets to the configured dispatcher; dispatch itself is
//! a `match` on the channel tag at the call site.
//!
//! Resize and stop are serialized by the fleet mutex. Every successful
//! bind is paired with a close on teardown: shrinking cancels the surplus
//! acceptors in LIFO order and joins their workers before returning.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chute_core::constants::{
    ACCEPT_ERROR_BACKOFF, SYS_OFFSET_ACK, SYS_OFFSET_CONTROL, SYS_OFFSET_HEALTH,
    SYS_OFFSET_TELEMETRY,
};
use chute_core::{Error, Result};

/// Which endpoint an acceptor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Health,
    Telemetry,
    Control,
    Ack,
    Data(usize),
}

impl Channel {
    fn name(&self) -> &'static str {
        match self {
            Channel::Health => "health",
            Channel::Telemetry => "telemetry",
            Channel::Control => "control",
            Channel::Ack => "ack",
            Channel::Data(_) => "data",
        }
    }
}

/// Receives every accepted socket together with its channel tag.
///
/// The dispatcher must not block; handlers are expected to spawn.
pub type Dispatcher = Arc<dyn Fn(Channel, TcpStream) + Send + Sync>;

struct Acceptor {
    channel: Channel,
    port: u16,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl Acceptor {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            warn!(port = self.port, error = %e, "acceptor worker panicked");
        }
        debug!(channel = self.channel.name(), port = self.port, "acceptor closed");
    }
}

#[derive(Default)]
struct FleetState {
    system: Vec<Acceptor>,
    data: Vec<Acceptor>,
}

/// The acceptor fleet.
pub struct ListenerFleet {
    address: IpAddr,
    sys_base: u16,
    data_base: u16,
    dispatcher: Dispatcher,
    state: tokio::sync::Mutex<FleetState>,
    data_count: AtomicUsize,
}

impl ListenerFleet {
    pub fn new(address: IpAddr, sys_base: u16, data_base: u16, dispatcher: Dispatcher) -> Self {
        Self {
            address,
            sys_base,
            data_base,
            dispatcher,
            state: tokio::sync::Mutex::new(FleetState::default()),
            data_count: AtomicUsize::new(0),
        }
    }

    /// Bind the four system acceptors and the initial data pool.
    ///
    /// A system bind failure is returned as-is (the caller treats it as
    /// fatal); anything already bound is torn down again first.
    pub async fn start(&self, initial_data: usize) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.system.is_empty() {
                return Ok(());
            }

            let channels = [
                (Channel::Health, SYS_OFFSET_HEALTH),
                (Channel::Telemetry, SYS_OFFSET_TELEMETRY),
                (Channel::Control, SYS_OFFSET_CONTROL),
                (Channel::Ack, SYS_OFFSET_ACK),
            ];
            for (channel, offset) in channels {
                let port = self.sys_base + offset;
                match self.bind_acceptor(channel, port).await {
                    Ok(acceptor) => state.system.push(acceptor),
                    Err(e) => {
                        warn!(channel = channel.name(), port, error = %e, "system bind failed");
                        for acceptor in state.system.drain(..).rev() {
                            acceptor.shutdown().await;
                        }
                        return Err(e);
                    }
                }
            }
            info!(
                sys_base = self.sys_base,
                "system acceptors listening (health, telemetry, control, ack)"
            );
        }

        self.resize(initial_data).await?;
        Ok(())
    }

    /// Grow or shrink the data pool to exactly `new_count` acceptors.
    ///
    /// Growing binds at the next indices; a bind failure rolls the new
    /// acceptors back and leaves the pool unchanged. Shrinking cancels the
    /// surplus acceptors newest-first and joins their workers.
    pub async fn resize(&self, new_count: usize) -> Result<usize> {
        let mut state = self.state.lock().await;
        let current = state.data.len();

        if new_count > current {
            let mut added = Vec::new();
            for index in current..new_count {
                let port = self.data_base + index as u16;
                match self.bind_acceptor(Channel::Data(index), port).await {
                    Ok(acceptor) => added.push(acceptor),
                    Err(e) => {
                        warn!(port, error = %e, "data bind failed, rolling back resize");
                        for acceptor in added.into_iter().rev() {
                            acceptor.shutdown().await;
                        }
                        return Err(e);
                    }
                }
            }
            state.data.append(&mut added);
        } else {
            while state.data.len() > new_count {
                if let Some(acceptor) = state.data.pop() {
                    acceptor.shutdown().await;
                }
            }
        }

        self.data_count.store(state.data.len(), Ordering::Relaxed);
        info!(data_listeners = state.data.len(), "data pool resized");
        Ok(state.data.len())
    }

    /// Cancel every acceptor and join all workers.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let data = std::mem::take(&mut state.data);
        let system = std::mem::take(&mut state.system);
        join_all(data.into_iter().rev().map(Acceptor::shutdown)).await;
        join_all(system.into_iter().rev().map(Acceptor::shutdown)).await;
        self.data_count.store(0, Ordering::Relaxed);
        info!("listener fleet stopped");
    }

    /// Number of data acceptors currently bound.
    pub fn data_count(&self) -> usize {
        self.data_count.load(Ordering::Relaxed)
    }

    async fn bind_acceptor(&self, channel: Channel, port: u16) -> Result<Acceptor> {
        let listener = TcpListener::bind((self.address, port))
            .await
            .map_err(|e| Error::Transport {
                message: format!("bind {}:{} failed: {}", self.address, port, e),
            })?;
        debug!(channel = channel.name(), port, "acceptor listening");

        let cancel = CancellationToken::new();
        let dispatcher = Arc::clone(&self.dispatcher);
        let worker = tokio::spawn(accept_loop(
            listener,
            channel,
            dispatcher,
            cancel.clone(),
        ));
        Ok(Acceptor {
            channel,
            port,
            cancel,
            worker,
        })
    }
}

/// One acceptor's loop: accept, dispatch, back off on transient errors.
async fn accept_loop(
    listener: TcpListener,
    channel: Channel,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            result = listener.accept() => match result {
                Ok((socket, peer)) => {
                    if cancel.is_cancelled() {
                        debug!(channel = channel.name(), peer = %peer, "dropping socket accepted during teardown");
                        return;
                    }
                    debug!(channel = channel.name(), peer = %peer, "connection accepted");
                    (dispatcher)(channel, socket);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    warn!(channel = channel.name(), error = %e, "accept error, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }
}
